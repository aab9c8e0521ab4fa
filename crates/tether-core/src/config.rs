//! Configuration for the Tether engine.
//!
//! Hosts usually build a [`TetherConfig`] in code; `load_from` reads the same
//! structure from a TOML file for deployments that prefer one. Every section
//! has working defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Capabilities this endpoint declares on connect. May be extended at
    /// runtime through the engine.
    pub capabilities: Vec<String>,

    pub http: HttpSettings,
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Default deadline for relayed requests, in milliseconds.
    pub timeout_ms: u64,
    /// Charset advertised with relayed requests.
    pub charset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Directory where received files are written. Created on demand.
    pub incoming_dir: PathBuf,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            charset: "utf-8".to_owned(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            incoming_dir: std::env::temp_dir().join("tether-incoming"),
        }
    }
}

impl TetherConfig {
    pub fn load_from(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
