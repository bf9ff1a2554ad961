//! Write-ahead log and checkpoint persistence. Both files are sequences
//! of frames: a little-endian u32 payload length followed by a
//! bincode-encoded [`JournalRecord`].
//!
//! Multi-record operations are appended as a single `Transaction` frame,
//! so one write and one flush cover the whole operation; a torn frame at
//! the tail of the log is an aborted operation, tolerated on replay. The
//! checkpoint is written to a temporary file and atomically renamed into
//! place, so torn checkpoint data is always real corruption and fatal.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::dependency::Dependency;
use crate::depgraph::DependencyGraph;
use crate::inode::Inode;
use crate::namespace::Namespace;
use crate::types::MasterError;

/// Upper bound on a single record payload; larger lengths mean the frame
/// header itself is garbage.
const MAX_RECORD_BYTES: u32 = 64 * 1024 * 1024;

/// Counter snapshot persisted at the end of every checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Highest inode id ever allocated.
    pub inode_counter: i32,
    /// Highest dependency id ever allocated.
    pub dependency_counter: i32,
}

/// A single journal frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Full state of an inode; a negated id is a tombstone.
    Inode(Inode),
    /// A dependency at creation time.
    Dependency(Dependency),
    /// Counter snapshot, the last record of a checkpoint.
    Checkpoint(CheckpointInfo),
    /// An atomically-replayed group of records from one logical operation.
    Transaction(Vec<JournalRecord>),
}

/// Errors from streaming records back out of a journal file.
#[derive(Debug, thiserror::Error)]
pub enum JournalReadError {
    /// The file ends in the middle of a frame.
    #[error("truncated record at end of journal")]
    Torn,
    /// A frame is present but undecodable.
    #[error("corrupted journal record: {0}")]
    Corrupt(String),
    /// A lower-level I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Append-only journal writer. Each committed append is durable before
/// the call returns.
pub struct LogWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl LogWriter {
    /// Creates (or truncates) the file at `path`, creating parent
    /// directories as needed.
    pub fn create(path: &Path) -> Result<Self, MasterError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    /// Path this writer appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffers one frame. Not durable until [`LogWriter::commit`].
    pub fn append(&mut self, record: &JournalRecord) -> Result<(), MasterError> {
        let payload = bincode::serialize(record)
            .map_err(|e| MasterError::Corrupt(format!("encoding journal record: {}", e)))?;
        let len = payload.len() as u32;
        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(&payload)?;
        Ok(())
    }

    /// Flushes buffered frames and syncs file data to disk.
    pub fn commit(&mut self) -> Result<(), MasterError> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        Ok(())
    }

    /// Appends one frame and commits it.
    pub fn append_durable(&mut self, record: &JournalRecord) -> Result<(), MasterError> {
        self.append(record)?;
        self.commit()
    }

    /// Appends a logical operation. A single record goes out bare; several
    /// are wrapped in one `Transaction` frame so replay applies all or
    /// none of them.
    pub fn append_transaction(&mut self, mut records: Vec<JournalRecord>) -> Result<(), MasterError> {
        debug_assert!(!records.is_empty());
        let record = if records.len() == 1 {
            records.pop().expect("non-empty transaction")
        } else {
            JournalRecord::Transaction(records)
        };
        self.append_durable(&record)
    }
}

/// Streaming journal reader.
pub struct LogReader {
    input: BufReader<File>,
}

impl LogReader {
    /// Opens a journal file for replay.
    pub fn open(path: &Path) -> Result<Self, MasterError> {
        let file = File::open(path)?;
        Ok(Self {
            input: BufReader::new(file),
        })
    }

    fn read_frame_len(&mut self) -> Result<Option<u32>, JournalReadError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(buf))),
            _ => Err(JournalReadError::Torn),
        }
    }

    /// Reads the next frame; `Ok(None)` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<JournalRecord>, JournalReadError> {
        let Some(len) = self.read_frame_len()? else {
            return Ok(None);
        };
        if len > MAX_RECORD_BYTES {
            return Err(JournalReadError::Corrupt(format!(
                "frame length {} exceeds limit",
                len
            )));
        }
        let mut payload = vec![0u8; len as usize];
        if let Err(e) = self.input.read_exact(&mut payload) {
            return match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Err(JournalReadError::Torn),
                _ => Err(e.into()),
            };
        }
        bincode::deserialize(&payload)
            .map(Some)
            .map_err(|e| JournalReadError::Corrupt(e.to_string()))
    }
}

fn apply(
    record: JournalRecord,
    ns: &mut Namespace,
    deps: &mut DependencyGraph,
    inode_counter: &mut i32,
    dependency_counter: &mut i32,
) {
    match record {
        JournalRecord::Transaction(records) => {
            for inner in records {
                apply(inner, ns, deps, inode_counter, dependency_counter);
            }
        }
        JournalRecord::Inode(inode) => {
            let id = inode.id;
            *inode_counter = (*inode_counter).max(id.abs());
            if id > 0 {
                ns.install_recovered(inode);
            } else {
                ns.remove_recovered(-id);
            }
        }
        JournalRecord::Dependency(dep) => {
            *dependency_counter = (*dependency_counter).max(dep.id);
            deps.insert(dep);
        }
        JournalRecord::Checkpoint(cp) => {
            *inode_counter = (*inode_counter).max(cp.inode_counter);
            *dependency_counter = (*dependency_counter).max(cp.dependency_counter);
        }
    }
}

/// Replays a journal file into the namespace and dependency graph,
/// returning the highest inode and dependency ids observed. A missing
/// file replays as empty. When `tolerate_torn_tail` is set a truncated
/// frame at the end of the file is an aborted operation and replay stops
/// there; otherwise it is corruption.
pub fn replay(
    path: &Path,
    tolerate_torn_tail: bool,
    ns: &mut Namespace,
    deps: &mut DependencyGraph,
) -> Result<(i32, i32), MasterError> {
    let mut inode_counter = 0;
    let mut dependency_counter = 0;
    if !path.exists() {
        info!(path = %path.display(), "journal file absent, nothing to replay");
        return Ok((0, 0));
    }
    info!(path = %path.display(), "replaying journal");
    let mut reader = LogReader::open(path)?;
    loop {
        match reader.next_record() {
            Ok(Some(record)) => apply(
                record,
                ns,
                deps,
                &mut inode_counter,
                &mut dependency_counter,
            ),
            Ok(None) => break,
            Err(JournalReadError::Torn) if tolerate_torn_tail => {
                warn!(
                    path = %path.display(),
                    "torn record at journal tail, treating as aborted operation"
                );
                break;
            }
            Err(JournalReadError::Torn) => {
                return Err(MasterError::Corrupt(format!(
                    "truncated record in {}",
                    path.display()
                )));
            }
            Err(JournalReadError::Corrupt(msg)) => return Err(MasterError::Corrupt(msg)),
            Err(JournalReadError::Io(e)) => return Err(e.into()),
        }
    }
    debug!(
        inode_counter,
        dependency_counter,
        "journal replay complete"
    );
    Ok((inode_counter, dependency_counter))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Writes a full checkpoint — every inode breadth first from the root,
/// every dependency, then the counter snapshot — to `<path>.tmp` and
/// atomically renames it over `path`.
pub fn write_checkpoint(
    path: &Path,
    ns: &Namespace,
    deps: &DependencyGraph,
    inode_counter: i32,
    dependency_counter: i32,
) -> Result<(), MasterError> {
    let tmp = tmp_path(path);
    let mut writer = LogWriter::create(&tmp)?;
    for inode in ns.bfs_inodes() {
        writer.append(&JournalRecord::Inode(inode.clone()))?;
    }
    for dep in deps.iter_sorted() {
        writer.append(&JournalRecord::Dependency(dep.clone()))?;
    }
    writer.append(&JournalRecord::Checkpoint(CheckpointInfo {
        inode_counter,
        dependency_counter,
    }))?;
    writer.commit()?;
    drop(writer);
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), "checkpoint written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyType;
    use crate::types::{NO_DEPENDENCY, ROOT_INODE_ID};
    use std::collections::HashSet;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn file_record(id: i32) -> JournalRecord {
        JournalRecord::Inode(Inode::new_file(&format!("f{}", id), id, ROOT_INODE_ID, 0))
    }

    #[test]
    fn test_frame_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.append_durable(&file_record(2)).unwrap();
        writer.append_durable(&file_record(3)).unwrap();
        drop(writer);

        let mut reader = LogReader::open(&path).unwrap();
        match reader.next_record().unwrap().unwrap() {
            JournalRecord::Inode(inode) => assert_eq!(inode.id, 2),
            other => panic!("unexpected record {:?}", other),
        }
        match reader.next_record().unwrap().unwrap() {
            JournalRecord::Inode(inode) => assert_eq!(inode.id, 3),
            other => panic!("unexpected record {:?}", other),
        }
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_transaction_of_one_is_unwrapped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.append_transaction(vec![file_record(2)]).unwrap();
        drop(writer);

        let mut reader = LogReader::open(&path).unwrap();
        assert!(matches!(
            reader.next_record().unwrap().unwrap(),
            JournalRecord::Inode(_)
        ));
    }

    #[test]
    fn test_torn_tail_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.append_durable(&file_record(2)).unwrap();
        drop(writer);
        // simulate a crash mid-frame
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x10, 0x00]).unwrap();

        let mut reader = LogReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(JournalReadError::Torn)
        ));
    }

    #[test]
    fn test_oversized_frame_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        let mut reader = LogReader::open(&path).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(JournalReadError::Corrupt(_))
        ));
    }

    #[test]
    fn test_undecodable_payload_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[0xff, 0xff, 0xff]);
        fs::write(&path, bytes).unwrap();
        let mut reader = LogReader::open(&path).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(JournalReadError::Corrupt(_))
        ));
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut ns = Namespace::new(0);
        let mut deps = DependencyGraph::new();
        let counters = replay(&dir.path().join("absent"), true, &mut ns, &mut deps).unwrap();
        assert_eq!(counters, (0, 0));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_replay_applies_tombstones_and_counters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let mut writer = LogWriter::create(&path).unwrap();
        let mut root = Namespace::new(0);
        // create /a (2) and /b (3), then delete /a
        let mut folder = Inode::new_folder("a", 2, ROOT_INODE_ID, 0);
        root.get_mut(ROOT_INODE_ID).unwrap().add_child("a", 2);
        root.get_mut(ROOT_INODE_ID).unwrap().add_child("b", 3);
        let root_clone = root.get(ROOT_INODE_ID).unwrap().clone();
        writer
            .append_transaction(vec![
                JournalRecord::Inode(root_clone.clone()),
                JournalRecord::Inode(folder.clone()),
                JournalRecord::Inode(Inode::new_file("b", 3, ROOT_INODE_ID, 0)),
            ])
            .unwrap();
        folder.tombstone();
        let mut rootless = root_clone;
        rootless.remove_child("a");
        writer
            .append_transaction(vec![
                JournalRecord::Inode(folder),
                JournalRecord::Inode(rootless),
            ])
            .unwrap();
        drop(writer);

        let mut ns = Namespace::new(0);
        let mut deps = DependencyGraph::new();
        let (inode_counter, dep_counter) = replay(&path, true, &mut ns, &mut deps).unwrap();
        assert_eq!(inode_counter, 3);
        assert_eq!(dep_counter, 0);
        assert!(!ns.contains(2));
        assert!(ns.contains(3));
        assert!(ns.validate().is_ok());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint");

        let mut ns = Namespace::new(0);
        let file = Inode::new_file("f", 2, ROOT_INODE_ID, 5);
        ns.attach(file);
        let mut deps = DependencyGraph::new();
        deps.insert(Dependency::new(
            1,
            vec![],
            vec![2],
            "prog".to_string(),
            Vec::new(),
            String::new(),
            "fw".to_string(),
            "1".to_string(),
            DependencyType::Narrow,
            HashSet::from([NO_DEPENDENCY]),
            7,
        ));
        write_checkpoint(&path, &ns, &deps, 2, 1).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());

        let mut ns2 = Namespace::new(0);
        let mut deps2 = DependencyGraph::new();
        let (inode_counter, dep_counter) = replay(&path, false, &mut ns2, &mut deps2).unwrap();
        assert_eq!((inode_counter, dep_counter), (2, 1));
        assert_eq!(ns2.len(), 2);
        assert_eq!(ns2.resolve("/f").unwrap(), Some(2));
        assert_eq!(deps2.len(), 1);
        assert!(deps2.uncheckpointed.contains(&1));
        assert!(ns2.validate().is_ok());
    }
}
