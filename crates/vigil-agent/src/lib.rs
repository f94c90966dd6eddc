//! Vigil Agent -- library crate for the TCP command protocol server.
//!
//! Re-exports the internal modules so integration tests can drive the
//! server, registry, and pipeline directly.

pub mod commands;
pub mod config;
pub mod connection;
pub mod limiter;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod session;

use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
