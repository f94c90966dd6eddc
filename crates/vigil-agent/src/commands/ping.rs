//! PING: liveness check for authenticated clients.

use serde_json::json;

use crate::registry::CommandDefinition;

pub fn definition() -> CommandDefinition {
    CommandDefinition {
        name: "PING",
        required_scopes: vec![],
        validator: None,
        handler: Box::new(|_payload, _ctx| {
            Box::pin(async {
                Ok(json!({
                    "pong": true,
                    "ts": chrono::Utc::now().timestamp_millis(),
                }))
            })
        }),
    }
}
