//! Core identifiers, client-facing views, and the master error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of an inode. Positive while the inode is live; journal
/// tombstone records carry the negated id.
pub type InodeId = i32;

/// Identifier of a lineage dependency.
pub type DependencyId = i32;

/// Identifier of a worker. Ids embed the master's start time so that ids
/// from a previous master incarnation never collide with a new one.
pub type WorkerId = i64;

/// The root inode's id. The root always exists and is never deleted.
pub const ROOT_INODE_ID: InodeId = 1;

/// Sentinel dependency id for files that were not produced by any command.
pub const NO_DEPENDENCY: DependencyId = -1;

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as i64
}

/// Network address of a worker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetAddress {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NetAddress {
    /// Creates an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Command returned to a worker from a heartbeat.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Nothing to do.
    Nothing,
    /// The master does not know this worker; it must re-register.
    Register,
}

/// Client view of a file or folder inode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientFileInfo {
    /// Inode id.
    pub id: InodeId,
    /// Entry name within its parent folder.
    pub name: String,
    /// Absolute path.
    pub path: String,
    /// File length in bytes; 0 for folders, -1 for files not yet sized.
    pub size_bytes: i64,
    /// Creation time in milliseconds since the epoch.
    pub creation_time_ms: i64,
    /// Checkpoint location in the external store; empty if none.
    pub checkpoint_path: String,
    /// True if at least one worker holds an in-memory copy.
    pub in_memory: bool,
    /// True once the file has been sized. Folders are always ready.
    pub ready: bool,
    /// True for folders and raw tables.
    pub folder: bool,
    /// True if the file must never be evicted from worker memory.
    pub need_pin: bool,
    /// True if the file is eligible for in-memory caching.
    pub need_cache: bool,
    /// Producing dependency, or [`NO_DEPENDENCY`].
    pub dependency_id: DependencyId,
}

/// Client view of a raw table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientRawTableInfo {
    /// Inode id of the table folder.
    pub id: InodeId,
    /// Table name.
    pub name: String,
    /// Absolute path.
    pub path: String,
    /// Number of columns.
    pub columns: u32,
    /// Opaque table metadata.
    pub metadata: Vec<u8>,
}

/// Client view of a lineage dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientDependencyInfo {
    /// Dependency id.
    pub id: DependencyId,
    /// Input file ids.
    pub parents: Vec<InodeId>,
    /// Output file ids.
    pub children: Vec<InodeId>,
    /// Opaque per-dependency payloads.
    pub data: Vec<Vec<u8>>,
}

/// Client view of a registered worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientWorkerInfo {
    /// Worker id.
    pub id: WorkerId,
    /// Worker address.
    pub address: NetAddress,
    /// Total memory capacity in bytes.
    pub capacity_bytes: i64,
    /// Bytes currently in use.
    pub used_bytes: i64,
    /// Last heartbeat in milliseconds since the epoch.
    pub last_updated_ms: i64,
}

/// Errors surfaced by master operations.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// The path is syntactically invalid or descends through a file.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The target path already resolves to an inode.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// The target path or id does not resolve to an inode.
    #[error("file does not exist: {0}")]
    FileDoesNotExist(String),

    /// Raw table column count out of range.
    #[error("table column count {columns} must be between 1 and {max}")]
    TableColumn {
        /// Requested column count.
        columns: i64,
        /// Exclusive upper bound from the configuration.
        max: u32,
    },

    /// The target is not a raw table.
    #[error("table does not exist: {0}")]
    TableDoesNotExist(String),

    /// Unknown dependency id.
    #[error("dependency {0} does not exist")]
    DependencyDoesNotExist(DependencyId),

    /// A worker reported a size that contradicts the recorded length.
    #[error("suspected file size for file {file_id}: recorded {recorded}, reported {reported}")]
    SuspectedFileSize {
        /// File whose size was contradicted.
        file_id: InodeId,
        /// Length already recorded on the master.
        recorded: i64,
        /// Length reported by the worker.
        reported: i64,
    },

    /// No worker matches the requested host (or the registry is empty).
    #[error("no local worker on {0}")]
    NoLocalWorker(String),

    /// The journal or checkpoint is unreadable. Fatal at startup.
    #[error("journal corrupted: {0}")]
    Corrupt(String),

    /// A lower-level I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_ms_reasonable() {
        assert!(current_time_ms() > 1_700_000_000_000);
    }

    #[test]
    fn test_net_address_display() {
        let addr = NetAddress::new("worker-3", 29998);
        assert_eq!(format!("{}", addr), "worker-3:29998");
    }

    #[test]
    fn test_net_address_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(NetAddress::new("h", 1), 7i64);
        assert_eq!(map.get(&NetAddress::new("h", 1)), Some(&7));
        assert_eq!(map.get(&NetAddress::new("h", 2)), None);
    }

    #[test]
    fn test_error_display() {
        let err = MasterError::SuspectedFileSize {
            file_id: 9,
            recorded: 42,
            reported: 43,
        };
        assert_eq!(
            format!("{}", err),
            "suspected file size for file 9: recorded 42, reported 43"
        );
        let err = MasterError::TableColumn {
            columns: 0,
            max: 1000,
        };
        assert!(format!("{}", err).contains("between 1 and 1000"));
    }

    #[test]
    fn test_client_file_info_serde_roundtrip() {
        let info = ClientFileInfo {
            id: 3,
            name: "b".to_string(),
            path: "/a/b".to_string(),
            size_bytes: -1,
            creation_time_ms: 1,
            checkpoint_path: String::new(),
            in_memory: false,
            ready: false,
            folder: false,
            need_pin: false,
            need_cache: true,
            dependency_id: NO_DEPENDENCY,
        };
        let encoded = bincode::serialize(&info).unwrap();
        let decoded: ClientFileInfo = bincode::deserialize(&encoded).unwrap();
        assert_eq!(info, decoded);
    }
}
