//! Built-in commands. AUTH is not here; it lives in the pipeline because
//! it mutates the session.

pub mod os_info;
pub mod ping;
pub mod snapshot;

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::registry::CommandRegistry;

pub use snapshot::{CameraService, Capture, DisabledCamera};

pub fn builtin_registry(config: &AgentConfig, camera: Arc<dyn CameraService>) -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(ping::definition());
    registry.register(os_info::definition());
    registry.register(snapshot::definition(config.snapshot.clone(), camera));
    registry
}
