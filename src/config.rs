use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Server settings.
///
/// Every field has a default, so a YAML file only needs to list what it
/// changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Served for a bare `/`.
    pub default_document: String,
    pub server_name: String,
    /// Only accept peers on loopback or the listener's own address.
    pub local_only: bool,
    pub idle_timeout_secs: u64,
    /// Readiness wait when the server owns its thread.
    pub poll_timeout_ms: u64,
    pub rx_buffer_size: usize,
    pub tx_segment_size: usize,
    pub fs_buffer_size: usize,
    pub max_output_bytes: usize,
    pub max_include_depth: usize,
    /// Honour `Connection: keep-alive` from clients.
    pub keep_alive: bool,
    /// GET of this URI stops the server. Disabled when unset.
    pub shutdown_uri: Option<String>,
    pub doc_root: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub allow_put: bool,
    pub max_restarts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4242".to_string(),
            default_document: "index.htm".to_string(),
            server_name: "Vane embedded server".to_string(),
            local_only: false,
            idle_timeout_secs: 15,
            poll_timeout_ms: 3000,
            rx_buffer_size: 1536,
            tx_segment_size: 1400,
            fs_buffer_size: 4096,
            max_output_bytes: 256 * 1024,
            max_include_depth: 8,
            keep_alive: false,
            shutdown_uri: None,
            doc_root: None,
            media_root: None,
            allow_put: false,
            max_restarts: 5,
        }
    }
}

impl Config {
    /// Reads a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Defaults, overlaid by the file named in `VANE_CONFIG`, then by the
    /// `LISTEN` address.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("VANE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.listen_addr = listen;
        }
        Ok(cfg)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
