//! Service configuration

use crate::error::{CraftsError, CraftsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration, read from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bind address
    pub address: String,
    /// Port
    pub port: u16,
    /// Directory holding one JSON configuration per API
    pub apis_dir: Option<PathBuf>,
    /// Age after which cache entries are swept
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    /// Timeout of every request sent to a SPARQL endpoint
    pub http_timeout_secs: u64,
    /// Replace long IRIs with PREFIX declarations before sending queries
    pub compaction: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 9000,
            apis_dir: None,
            retention_secs: 3 * 24 * 3600,
            sweep_interval_secs: 3600,
            http_timeout_secs: 60,
            compaction: true,
        }
    }
}

impl ServiceConfig {
    /// Read a YAML file; an empty file yields the defaults
    pub fn load(path: &Path) -> CraftsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CraftsError::InvalidConfig(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> CraftsResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| CraftsError::InvalidConfig(e.to_string()))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
