//! Configuration types for vigil-agent.
//! Parsed from ~/.vigil/config.toml.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub snapshot: SnapshotSection,
    /// Role name -> granted scopes, used by `token create <role>`.
    #[serde(default = "default_roles")]
    pub roles: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_database")]
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSection {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Concurrent in-flight commands per connection before backpressure.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// How long an unauthenticated connection may live.
    #[serde(default = "default_auth_grace")]
    pub auth_grace_secs: u64,
    /// Token bucket capacity per action per connection.
    #[serde(default = "default_rate_capacity")]
    pub rate_capacity: u32,
    #[serde(default = "default_rate_refill")]
    pub rate_refill_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSection {
    #[serde(default = "default_camera_id")]
    pub camera_id: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_quality")]
    pub quality: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database: default_database(),
        }
    }
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            idle_timeout_secs: 30,
            auth_grace_secs: 10,
            rate_capacity: 10,
            rate_refill_per_sec: 5.0,
        }
    }
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            camera_id: default_camera_id(),
            width: 1280,
            height: 720,
            quality: 80,
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:5001".into()
}
fn default_database() -> String {
    "~/.vigil/vigil.db".into()
}
fn default_max_frame_bytes() -> usize {
    256 * 1024
}
fn default_max_in_flight() -> u32 {
    8
}
fn default_idle_timeout() -> u64 {
    30
}
fn default_auth_grace() -> u64 {
    10
}
fn default_rate_capacity() -> u32 {
    10
}
fn default_rate_refill() -> f64 {
    5.0
}
fn default_camera_id() -> String {
    "/dev/video0".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_quality() -> u32 {
    80
}

fn default_roles() -> HashMap<String, Vec<String>> {
    let mut roles = HashMap::new();
    roles.insert("scheduler".to_string(), vec!["snapshot:create".to_string()]);
    roles.insert("admin".to_string(), vec!["*".to_string()]);
    roles
}

impl AgentConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AgentConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default_with_roles())
        }
    }

    /// `Default` derives an empty role map; a fresh config wants the
    /// built-in roles present.
    pub fn default_with_roles() -> Self {
        Self {
            roles: default_roles(),
            ..Self::default()
        }
    }

    /// Scopes granted to a role name, if configured.
    pub fn role_scopes(&self, role: &str) -> Option<&[String]> {
        self.roles.get(role).map(|s| s.as_slice())
    }
}
