//! GET_OS_INFO: host platform details. Authentication is required but no
//! scope is, so any valid token may call it.

use std::time::Instant;

use serde_json::json;

use crate::registry::CommandDefinition;

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".into())
}

pub fn definition() -> CommandDefinition {
    let started = Instant::now();
    CommandDefinition {
        name: "GET_OS_INFO",
        required_scopes: vec![],
        validator: None,
        handler: Box::new(move |_payload, _ctx| {
            let uptime_secs = started.elapsed().as_secs();
            Box::pin(async move {
                Ok(json!({
                    "platform": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                    "hostname": hostname(),
                    "pid": std::process::id(),
                    "uptimeSecs": uptime_secs,
                }))
            })
        }),
    }
}
