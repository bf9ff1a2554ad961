//! Master configuration, read once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::NetAddress;

/// Configuration for the metadata master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Installation home. Recomputation output logs and the worker restart
    /// script live under this directory.
    pub home: PathBuf,
    /// Address the master is reachable at.
    pub master_address: NetAddress,
    /// Path prefixes whose files are eligible for in-memory caching,
    /// comma or semicolon separated.
    pub whitelist: String,
    /// Path prefixes whose files must never be evicted, comma or semicolon
    /// separated.
    pub pinlist: String,
    /// Write-ahead log file.
    pub log_file: PathBuf,
    /// Checkpoint file the log is compacted into.
    pub checkpoint_file: PathBuf,
    /// A worker is considered lost after this many milliseconds without a
    /// heartbeat.
    pub worker_timeout_ms: i64,
    /// Interval of the liveness monitor in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Exclusive upper bound on raw table column counts.
    pub max_columns: u32,
    /// When true, lost files are recovered proactively elsewhere and the
    /// liveness monitor does not queue their dependencies for recomputation.
    pub proactive_recovery: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("/var/lib/lineagefs"),
            master_address: NetAddress::new("127.0.0.1", 9700),
            whitelist: String::from("/"),
            pinlist: String::new(),
            log_file: PathBuf::from("/var/lib/lineagefs/journal/log"),
            checkpoint_file: PathBuf::from("/var/lib/lineagefs/journal/checkpoint"),
            worker_timeout_ms: 10_000,
            heartbeat_interval_ms: 1_000,
            max_columns: 1000,
            proactive_recovery: false,
        }
    }
}

impl MasterConfig {
    /// Loads a configuration from a TOML or JSON file, by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MasterConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MasterConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
