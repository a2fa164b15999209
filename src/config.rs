//! Service Configuration
//!
//! Defaults match the production profile. A YAML file can override any
//! subset; command-line flags and environment variables override the file.
//!
//! ```yaml
//! server:
//!   listen_addr: "0.0.0.0:5000"
//!   default_ttl_secs: 86400
//! rate_limit:
//!   write_limit: 10
//! reaper:
//!   store_sweep_secs: 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::guard::abuse::MAX_RECORD_TTL_SECS;
use crate::guard::rate_limit::MAX_WINDOW_SECS;
use crate::guard::{AbuseConfig, RateLimitConfig};
use crate::reaper::ReaperConfig;
use crate::store::{DEFAULT_MAX_FILE_BYTES, DEFAULT_TTL};

/// HTTP surface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// API bind address
    pub listen_addr: String,
    /// Metrics bind address
    pub metrics_addr: String,
    /// Directory for file bodies; in-memory when unset
    pub storage_dir: Option<PathBuf>,
    /// Lifetime of stored items in seconds
    pub default_ttl_secs: u64,
    /// Largest accepted file body in bytes
    pub max_file_bytes: u64,
    /// Honour forwarded-address headers. Enable only behind a reverse proxy
    /// that overwrites them; otherwise clients can pick their own identity.
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            metrics_addr: "0.0.0.0:9090".to_string(),
            storage_dir: None,
            default_ttl_secs: DEFAULT_TTL.as_secs(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            trust_proxy_headers: false,
        }
    }
}

impl ServerConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub abuse: AbuseConfig,
    pub reaper: ReaperConfig,
}

impl ServiceConfig {
    /// Load from a YAML file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Reject settings that would break core invariants
    pub fn validate(&self) -> Result<()> {
        if self.server.default_ttl_secs == 0 {
            return Err(Error::Config("default_ttl_secs must be positive".into()));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(Error::Config("rate_limit.window_secs must be positive".into()));
        }
        if self.rate_limit.window_delta().is_none() {
            return Err(Error::Config(format!(
                "rate_limit.window_secs must be at most {}",
                MAX_WINDOW_SECS
            )));
        }
        if self.abuse.record_ttl_delta().is_none() {
            return Err(Error::Config(format!(
                "abuse.record_ttl_secs must be at most {}",
                MAX_RECORD_TTL_SECS
            )));
        }
        if self.abuse.block_threshold == 0 {
            return Err(Error::Config("abuse.block_threshold must be positive".into()));
        }
        if self.abuse.max_content_bytes == 0 {
            return Err(Error::Config("abuse.max_content_bytes must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
