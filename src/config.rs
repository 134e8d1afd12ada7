//! Configuration loading
//!
//! Settings come from an INI (or TOML/JSON) file plus `VLAN_RANGE__*`
//! environment overrides and are read once at startup:
//!
//! ```text
//! [range]
//! start = 100
//! end = 4099
//! delta = 50
//!
//! [store]
//! path = /var/lib/vlan-range
//! lock_timeout_ms = 5000
//! ```

use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "vlan_range.conf";

/// Prefix for environment overrides (`VLAN_RANGE__RANGE__START=100`)
pub const ENV_PREFIX: &str = "VLAN_RANGE";

/// Geometry of the pool: the bounded space `[start, end]` cut into
/// slots of `delta` values each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub start: i64,
    pub end: i64,
    pub delta: i64,
}

impl PoolConfig {
    /// Create a validated pool configuration
    pub fn new(start: i64, end: i64, delta: i64) -> Result<Self> {
        let pool = Self { start, end, delta };
        pool.validate()?;
        Ok(pool)
    }

    pub fn validate(&self) -> Result<()> {
        if self.delta < 1 {
            return Err(Error::Config(format!(
                "range.delta must be at least 1, got {}",
                self.delta
            )));
        }
        if self.end < self.start {
            return Err(Error::Config(format!(
                "range.end ({}) is below range.start ({})",
                self.end, self.start
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={} step {}", self.start, self.end, self.delta)
    }
}

/// Where and how the allocation log is kept
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `pool.log` and `pool.lock`
    pub path: PathBuf,
    /// Upper bound on waiting for the store lock
    pub lock_timeout_ms: u64,
    /// Attempts after a lost lock race before giving up
    pub max_retries: u32,
    /// Rewrite the log once it holds this many batches
    pub compact_after: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/vlan-range"),
            lock_timeout_ms: 5000,
            max_retries: 3,
            compact_after: 512,
        }
    }
}

/// Complete tool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub range: PoolConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Settings {
    /// Load settings from `path` (or the default file, which may be absent)
    /// layered under environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        debug!(path = ?file, required, "Loading configuration");

        let settings: Settings = Config::builder()
            .add_source(config_file(&file).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.range.validate()?;
        if self.store.lock_timeout_ms == 0 {
            return Err(Error::Config(
                "store.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let width = self.range.end as i128 - self.range.start as i128 + 1;
        let remainder = width % self.range.delta as i128;
        if remainder != 0 {
            warn!(
                pool = %self.range,
                unusable = remainder,
                "Range width is not a multiple of delta; trailing values are never allocated"
            );
        }
        Ok(())
    }
}

/// The original tool kept its settings in an INI file named `*.conf`,
/// which `config` cannot detect from the extension.
fn config_file(path: &Path) -> File<config::FileSourceFile, FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("conf") | Some("ini") => File::new(&path.to_string_lossy(), FileFormat::Ini),
        _ => File::from(path),
    }
}
