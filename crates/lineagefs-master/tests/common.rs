//! Shared helpers for the master integration tests.

use std::path::Path;
use std::sync::Arc;

use lineagefs_master::config::MasterConfig;
use lineagefs_master::launcher::RecordingLauncher;
use lineagefs_master::master::Master;

/// A configuration rooted in a test directory: a 10 second worker
/// timeout and 1000 max columns.
pub fn test_config(dir: &Path) -> MasterConfig {
    MasterConfig {
        home: dir.to_path_buf(),
        log_file: dir.join("journal/log"),
        checkpoint_file: dir.join("journal/checkpoint"),
        whitelist: "/".to_string(),
        pinlist: String::new(),
        worker_timeout_ms: 10_000,
        max_columns: 1000,
        ..MasterConfig::default()
    }
}

/// Starts a master over `dir` with a recording command launcher.
pub fn new_master(dir: &Path) -> (Master, Arc<RecordingLauncher>) {
    let launcher = Arc::new(RecordingLauncher::new());
    let master = Master::new(test_config(dir), launcher.clone()).expect("start master");
    (master, launcher)
}
