//! The namespace index: inode map, path resolution, traversals, and the
//! pinned-id set. All methods assume the caller holds the master's
//! namespace lock; this type itself is a plain data structure.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::inode::Inode;
use crate::types::{InodeId, MasterError, ROOT_INODE_ID};

/// Path separator.
pub const SEPARATOR: &str = "/";

/// Joins an absolute base path and a child name without doubling the
/// separator at the root.
pub fn join_paths(base: &str, name: &str) -> String {
    if base == SEPARATOR {
        format!("{}{}", SEPARATOR, name)
    } else {
        format!("{}{}{}", base, SEPARATOR, name)
    }
}

/// The inode graph rooted at id [`ROOT_INODE_ID`].
pub struct Namespace {
    inodes: HashMap<InodeId, Inode>,
    id_pin_list: HashSet<InodeId>,
}

impl Namespace {
    /// Creates a namespace holding only the root folder.
    pub fn new(now_ms: i64) -> Self {
        let root = Inode::new_folder("", ROOT_INODE_ID, -1, now_ms);
        let mut inodes = HashMap::new();
        inodes.insert(ROOT_INODE_ID, root);
        Self {
            inodes,
            id_pin_list: HashSet::new(),
        }
    }

    /// Number of live inodes, the root included.
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    /// True if the map holds no inodes. Never the case in practice: the
    /// root always exists.
    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// Looks up a live inode.
    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.inodes.get(&id)
    }

    /// Looks up a live inode mutably.
    pub fn get_mut(&mut self, id: InodeId) -> Option<&mut Inode> {
        self.inodes.get_mut(&id)
    }

    /// True if `id` is live.
    pub fn contains(&self, id: InodeId) -> bool {
        self.inodes.contains_key(&id)
    }

    /// Splits an absolute path into components. `/` alone yields no
    /// components. Fails with `InvalidPath` for relative paths and empty
    /// names (doubled or trailing separators).
    pub fn parse_path(path: &str) -> Result<Vec<String>, MasterError> {
        if !path.starts_with(SEPARATOR) {
            return Err(MasterError::InvalidPath(path.to_string()));
        }
        if path == SEPARATOR {
            return Ok(Vec::new());
        }
        let mut components = Vec::new();
        for name in path[1..].split(SEPARATOR) {
            if name.is_empty() {
                return Err(MasterError::InvalidPath(path.to_string()));
            }
            components.push(name.to_string());
        }
        Ok(components)
    }

    /// Resolves a path to an inode id. `Ok(None)` when a component is
    /// absent; `InvalidPath` when the descent passes through a file.
    pub fn resolve(&self, path: &str) -> Result<Option<InodeId>, MasterError> {
        let components = Self::parse_path(path)?;
        self.resolve_components(&components)
    }

    /// Resolves pre-split components, starting at the root.
    pub fn resolve_components(&self, components: &[String]) -> Result<Option<InodeId>, MasterError> {
        let mut cur = ROOT_INODE_ID;
        for name in components {
            let inode = self
                .inodes
                .get(&cur)
                .expect("resolved id missing from inode map");
            if inode.is_file() {
                return Err(MasterError::InvalidPath(format!(
                    "{} is a file",
                    self.path_of(cur)
                )));
            }
            match inode.child(name) {
                Some(next) => cur = next,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    /// Absolute path of a live inode.
    pub fn path_of(&self, id: InodeId) -> String {
        if id == ROOT_INODE_ID {
            return SEPARATOR.to_string();
        }
        let mut segments = Vec::new();
        let mut cur = id;
        while cur != ROOT_INODE_ID {
            match self.inodes.get(&cur) {
                Some(inode) => {
                    segments.push(inode.name.clone());
                    cur = inode.parent_id;
                }
                None => break,
            }
        }
        let mut path = String::new();
        for segment in segments.iter().rev() {
            path.push_str(SEPARATOR);
            path.push_str(segment);
        }
        path
    }

    /// Inserts an inode and links it into its parent's children index.
    pub fn attach(&mut self, inode: Inode) {
        let parent_id = inode.parent_id;
        let name = inode.name.clone();
        let id = inode.id;
        self.inodes.insert(id, inode);
        if let Some(parent) = self.inodes.get_mut(&parent_id) {
            parent.add_child(&name, id);
        }
    }

    /// Removes an inode from the map only; the caller maintains the parent
    /// children index.
    pub fn remove(&mut self, id: InodeId) -> Option<Inode> {
        self.inodes.remove(&id)
    }

    /// Drops a name from a folder's children index.
    pub fn remove_child_entry(&mut self, parent_id: InodeId, name: &str) {
        if let Some(parent) = self.inodes.get_mut(&parent_id) {
            parent.remove_child(name);
        }
    }

    /// Adds a name to a folder's children index.
    pub fn add_child_entry(&mut self, parent_id: InodeId, name: &str, id: InodeId) {
        if let Some(parent) = self.inodes.get_mut(&parent_id) {
            parent.add_child(name, id);
        }
    }

    /// Adds an id to the pinned set.
    pub fn pin(&mut self, id: InodeId) {
        self.id_pin_list.insert(id);
    }

    /// Drops an id from the pinned set.
    pub fn unpin(&mut self, id: InodeId) {
        self.id_pin_list.remove(&id);
    }

    /// True if the id is pinned.
    pub fn is_pinned(&self, id: InodeId) -> bool {
        self.id_pin_list.contains(&id)
    }

    /// Snapshot of the pinned ids.
    pub fn pin_ids(&self) -> Vec<InodeId> {
        self.id_pin_list.iter().copied().collect()
    }

    /// File ids under an inode. For a file, the id itself. For a folder,
    /// the direct child files, or every descendant file (breadth first)
    /// when `recursive`. Order within a folder is unspecified.
    pub fn list_files(&self, id: InodeId, recursive: bool) -> Vec<InodeId> {
        let Some(start) = self.inodes.get(&id) else {
            return Vec::new();
        };
        if start.is_file() {
            return vec![id];
        }
        let mut ret = Vec::new();
        if recursive {
            let mut queue: VecDeque<InodeId> = start.child_ids().into();
            while let Some(next) = queue.pop_front() {
                let Some(inode) = self.inodes.get(&next) else {
                    continue;
                };
                if inode.is_folder() {
                    queue.extend(inode.child_ids());
                } else {
                    ret.push(next);
                }
            }
        } else {
            for child_id in start.child_ids() {
                if self.inodes.get(&child_id).is_some_and(|i| i.is_file()) {
                    ret.push(child_id);
                }
            }
        }
        ret
    }

    /// Absolute paths under an inode. For a file, its own path. For a
    /// folder, the direct children, or every descendant (breadth first)
    /// when `recursive`.
    pub fn ls(&self, id: InodeId, recursive: bool) -> Vec<String> {
        let Some(start) = self.inodes.get(&id) else {
            return Vec::new();
        };
        let base = self.path_of(id);
        if start.is_file() {
            return vec![base];
        }
        let mut ret = Vec::new();
        let mut queue: VecDeque<(InodeId, String)> = VecDeque::new();
        queue.push_back((id, base));
        while let Some((next, path)) = queue.pop_front() {
            let Some(inode) = self.inodes.get(&next) else {
                continue;
            };
            if let Some(children) = inode.children() {
                for (name, child_id) in children {
                    let child_path = join_paths(&path, name);
                    if recursive && self.inodes.get(child_id).is_some_and(|c| c.is_folder()) {
                        queue.push_back((*child_id, child_path.clone()));
                    }
                    ret.push(child_path);
                }
            }
            if !recursive {
                break;
            }
        }
        ret
    }

    /// Absolute paths of every file with at least one in-memory copy,
    /// collected breadth first from the root.
    pub fn in_memory_files(&self) -> Vec<String> {
        let mut ret = Vec::new();
        let mut queue: VecDeque<(InodeId, String)> = VecDeque::new();
        queue.push_back((ROOT_INODE_ID, SEPARATOR.to_string()));
        while let Some((id, path)) = queue.pop_front() {
            let Some(inode) = self.inodes.get(&id) else {
                continue;
            };
            if let Some(children) = inode.children() {
                for (name, child_id) in children {
                    let child_path = join_paths(&path, name);
                    match self.inodes.get(child_id) {
                        Some(child) if child.is_folder() => {
                            queue.push_back((*child_id, child_path));
                        }
                        Some(child) => {
                            if child.file().is_some_and(|f| f.is_in_memory()) {
                                ret.push(child_path);
                            }
                        }
                        None => {}
                    }
                }
            }
        }
        ret
    }

    /// Every live inode, root first then breadth first, the order the
    /// checkpoint writer persists them in.
    pub fn bfs_inodes(&self) -> Vec<&Inode> {
        let mut ret = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(ROOT_INODE_ID);
        while let Some(id) = queue.pop_front() {
            let Some(inode) = self.inodes.get(&id) else {
                continue;
            };
            ret.push(inode);
            if inode.is_folder() {
                queue.extend(inode.child_ids());
            }
        }
        ret
    }

    /// Installs an inode from a journal record, replacing any previous
    /// state and maintaining the pinned set.
    pub fn install_recovered(&mut self, inode: Inode) {
        let id = inode.id;
        if let Some(file) = inode.file() {
            if file.pin {
                self.id_pin_list.insert(id);
            } else {
                self.id_pin_list.remove(&id);
            }
        }
        self.inodes.insert(id, inode);
    }

    /// Applies a tombstone record: drops the inode and its pin entry.
    pub fn remove_recovered(&mut self, id: InodeId) {
        self.inodes.remove(&id);
        self.id_pin_list.remove(&id);
    }

    /// Structural self-check used by tests: every child link points at a
    /// live inode whose parent link points back, the root is intact, and
    /// the pinned set matches the pin flags.
    pub fn validate(&self) -> Result<(), String> {
        let root = self
            .inodes
            .get(&ROOT_INODE_ID)
            .ok_or_else(|| "root missing".to_string())?;
        if !root.is_folder() || root.parent_id != -1 {
            return Err("root is not a parentless folder".to_string());
        }
        for (id, inode) in &self.inodes {
            if *id != inode.id || inode.id <= 0 {
                return Err(format!("inode {} keyed under {}", inode.id, id));
            }
            if let Some(children) = inode.children() {
                for (name, child_id) in children {
                    match self.inodes.get(child_id) {
                        Some(child) if child.parent_id == *id && &child.name == name => {}
                        Some(child) => {
                            return Err(format!(
                                "child {} of {} has parent {} name {:?}",
                                child_id, id, child.parent_id, child.name
                            ));
                        }
                        None => return Err(format!("child {} of {} is dead", child_id, id)),
                    }
                }
            }
        }
        for id in &self.id_pin_list {
            match self.inodes.get(id) {
                Some(inode) if inode.file().is_some_and(|f| f.pin) => {}
                _ => return Err(format!("pinned id {} is not a pinned file", id)),
            }
        }
        Ok(())
    }
}
