//! Command launching port. Recomputation commands and the worker restart
//! hook are fire-and-forget process spawns; the trait seam keeps the
//! scheduler deterministic under test.

use std::io;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::info;

/// Launches shell command strings detached from the master process.
pub trait CommandLauncher: Send + Sync {
    /// Spawns `command` without waiting for it. The command string may use
    /// shell redirection to route its output to a log file.
    fn launch(&self, command: &str) -> io::Result<()>;
}

/// Production launcher: hands the command string to `sh -c` and drops the
/// child handle.
pub struct ShellLauncher;

impl CommandLauncher for ShellLauncher {
    fn launch(&self, command: &str) -> io::Result<()> {
        info!(command, "launching command");
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}

/// Test launcher that records command strings instead of spawning.
#[derive(Default)]
pub struct RecordingLauncher {
    commands: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the commands launched so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandLauncher for RecordingLauncher {
    fn launch(&self, command: &str) -> io::Result<()> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }
}
