//! The inode model: a tagged sum of File, Folder, and RawTable sharing a
//! common header. Folders index their children by name; raw tables are
//! folders with a column count and opaque metadata. Tombstoning negates
//! the id, which is how journal records encode deletion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{DependencyId, InodeId, NetAddress, WorkerId, NO_DEPENDENCY};

/// Mutable state specific to a File inode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    /// Length in bytes; -1 until first sized.
    pub length: i64,
    /// True once the length has been set. Immutable afterwards.
    pub ready: bool,
    /// Location of the persisted copy in the external store; empty if none.
    pub checkpoint_path: String,
    /// Producing dependency, or [`NO_DEPENDENCY`].
    pub dependency_id: DependencyId,
    /// Never evict the in-memory copy.
    pub pin: bool,
    /// Eligible for in-memory caching.
    pub cache: bool,
    /// Workers currently holding an in-memory copy. Runtime state: not
    /// persisted, rebuilt as workers re-register.
    #[serde(skip)]
    pub locations: HashMap<WorkerId, NetAddress>,
}

impl FileState {
    fn new() -> Self {
        Self {
            length: -1,
            ready: false,
            checkpoint_path: String::new(),
            dependency_id: NO_DEPENDENCY,
            pin: false,
            cache: false,
            locations: HashMap::new(),
        }
    }

    /// True if a checkpoint location has been recorded.
    pub fn has_checkpoint(&self) -> bool {
        !self.checkpoint_path.is_empty()
    }

    /// True if at least one worker holds an in-memory copy.
    pub fn is_in_memory(&self) -> bool {
        !self.locations.is_empty()
    }

    /// True if the file was produced by a dependency.
    pub fn has_dependency(&self) -> bool {
        self.dependency_id != NO_DEPENDENCY
    }

    /// Records an in-memory copy on `worker_id`.
    pub fn add_location(&mut self, worker_id: WorkerId, address: NetAddress) {
        self.locations.insert(worker_id, address);
    }

    /// Drops the in-memory copy on `worker_id`, if recorded.
    pub fn remove_location(&mut self, worker_id: WorkerId) {
        self.locations.remove(&worker_id);
    }

    /// Addresses of all workers holding a copy.
    pub fn location_addresses(&self) -> Vec<NetAddress> {
        self.locations.values().cloned().collect()
    }
}

/// Mutable state specific to a Folder inode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderState {
    /// Children indexed by name. Names are unique within a folder.
    pub children: HashMap<String, InodeId>,
}

/// Mutable state specific to a RawTable inode: a folder plus a column
/// count and metadata. The table has exactly `columns` child folders
/// named `COL_0 .. COL_{columns-1}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawTableState {
    /// Children indexed by name, as for a plain folder.
    pub children: HashMap<String, InodeId>,
    /// Number of columns.
    pub columns: u32,
    /// Opaque table metadata.
    pub metadata: Vec<u8>,
}

/// The per-variant payload of an inode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InodeKind {
    /// A regular file.
    File(FileState),
    /// A folder.
    Folder(FolderState),
    /// A raw table: a folder with typed columns.
    RawTable(RawTableState),
}

/// A namespace entry. The header fields are common to all variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    /// Positive while live; negated in tombstone journal records.
    pub id: InodeId,
    /// Entry name within the parent folder. The root's name is empty.
    pub name: String,
    /// Parent folder id; -1 for the root.
    pub parent_id: InodeId,
    /// Creation time in milliseconds since the epoch.
    pub creation_time_ms: i64,
    /// Variant payload.
    pub kind: InodeKind,
}

impl Inode {
    /// Creates a new File inode.
    pub fn new_file(name: &str, id: InodeId, parent_id: InodeId, now_ms: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent_id,
            creation_time_ms: now_ms,
            kind: InodeKind::File(FileState::new()),
        }
    }

    /// Creates a new empty Folder inode.
    pub fn new_folder(name: &str, id: InodeId, parent_id: InodeId, now_ms: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent_id,
            creation_time_ms: now_ms,
            kind: InodeKind::Folder(FolderState::default()),
        }
    }

    /// Creates a new RawTable inode with no columns attached yet.
    pub fn new_raw_table(
        name: &str,
        id: InodeId,
        parent_id: InodeId,
        columns: u32,
        metadata: Vec<u8>,
        now_ms: i64,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent_id,
            creation_time_ms: now_ms,
            kind: InodeKind::RawTable(RawTableState {
                children: HashMap::new(),
                columns,
                metadata,
            }),
        }
    }

    /// True for the File variant.
    pub fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File(_))
    }

    /// True for Folder and RawTable variants.
    pub fn is_folder(&self) -> bool {
        !self.is_file()
    }

    /// True for the RawTable variant.
    pub fn is_raw_table(&self) -> bool {
        matches!(self.kind, InodeKind::RawTable(_))
    }

    /// File state, if this is a File.
    pub fn file(&self) -> Option<&FileState> {
        match &self.kind {
            InodeKind::File(f) => Some(f),
            _ => None,
        }
    }

    /// Mutable file state, if this is a File.
    pub fn file_mut(&mut self) -> Option<&mut FileState> {
        match &mut self.kind {
            InodeKind::File(f) => Some(f),
            _ => None,
        }
    }

    /// The children index, if this is a Folder or RawTable.
    pub fn children(&self) -> Option<&HashMap<String, InodeId>> {
        match &self.kind {
            InodeKind::Folder(f) => Some(&f.children),
            InodeKind::RawTable(t) => Some(&t.children),
            InodeKind::File(_) => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut HashMap<String, InodeId>> {
        match &mut self.kind {
            InodeKind::Folder(f) => Some(&mut f.children),
            InodeKind::RawTable(t) => Some(&mut t.children),
            InodeKind::File(_) => None,
        }
    }

    /// Looks up a child id by name.
    pub fn child(&self, name: &str) -> Option<InodeId> {
        self.children().and_then(|c| c.get(name)).copied()
    }

    /// Adds a child entry. Returns false if this inode is a file.
    pub fn add_child(&mut self, name: &str, id: InodeId) -> bool {
        match self.children_mut() {
            Some(children) => {
                children.insert(name.to_string(), id);
                true
            }
            None => false,
        }
    }

    /// Removes a child entry by name.
    pub fn remove_child(&mut self, name: &str) {
        if let Some(children) = self.children_mut() {
            children.remove(name);
        }
    }

    /// Ids of all children, in index order.
    pub fn child_ids(&self) -> Vec<InodeId> {
        self.children()
            .map(|c| c.values().copied().collect())
            .unwrap_or_default()
    }

    /// Marks this inode deleted by negating its id, the encoding used by
    /// tombstone journal records.
    pub fn tombstone(&mut self) {
        self.id = -self.id;
    }

    /// True if the id carries the tombstone encoding.
    pub fn is_tombstone(&self) -> bool {
        self.id < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_defaults() {
        let inode = Inode::new_file("f", 2, 1, 10);
        assert!(inode.is_file());
        assert!(!inode.is_folder());
        let file = inode.file().unwrap();
        assert_eq!(file.length, -1);
        assert!(!file.ready);
        assert!(!file.has_checkpoint());
        assert!(!file.is_in_memory());
        assert!(!file.has_dependency());
    }

    #[test]
    fn test_folder_children_index() {
        let mut folder = Inode::new_folder("d", 2, 1, 10);
        assert!(folder.add_child("a", 3));
        assert!(folder.add_child("b", 4));
        assert_eq!(folder.child("a"), Some(3));
        assert_eq!(folder.child("missing"), None);
        folder.remove_child("a");
        assert_eq!(folder.child("a"), None);
        assert_eq!(folder.child_ids().len(), 1);
    }

    #[test]
    fn test_file_rejects_children() {
        let mut file = Inode::new_file("f", 2, 1, 10);
        assert!(!file.add_child("x", 3));
        assert!(file.children().is_none());
        assert!(file.child_ids().is_empty());
    }

    #[test]
    fn test_raw_table_is_folder() {
        let mut table = Inode::new_raw_table("t", 2, 1, 3, b"m".to_vec(), 10);
        assert!(table.is_folder());
        assert!(table.is_raw_table());
        assert!(!table.is_file());
        assert!(table.add_child("COL_0", 3));
        assert_eq!(table.child("COL_0"), Some(3));
    }

    #[test]
    fn test_tombstone_negates_id() {
        let mut inode = Inode::new_file("f", 7, 1, 10);
        inode.tombstone();
        assert_eq!(inode.id, -7);
        assert!(inode.is_tombstone());
    }

    #[test]
    fn test_locations_tracking() {
        let mut inode = Inode::new_file("f", 2, 1, 10);
        let file = inode.file_mut().unwrap();
        file.add_location(100, NetAddress::new("w1", 1));
        file.add_location(101, NetAddress::new("w2", 2));
        assert!(file.is_in_memory());
        assert_eq!(file.location_addresses().len(), 2);
        file.remove_location(100);
        file.remove_location(100);
        assert_eq!(file.location_addresses().len(), 1);
        file.remove_location(101);
        assert!(!file.is_in_memory());
    }

    #[test]
    fn test_serde_skips_locations() {
        let mut inode = Inode::new_file("f", 2, 1, 10);
        {
            let file = inode.file_mut().unwrap();
            file.length = 42;
            file.ready = true;
            file.add_location(100, NetAddress::new("w1", 1));
        }
        let encoded = bincode::serialize(&inode).unwrap();
        let decoded: Inode = bincode::deserialize(&encoded).unwrap();
        let file = decoded.file().unwrap();
        assert_eq!(file.length, 42);
        assert!(file.ready);
        assert!(file.locations.is_empty());
    }
}
