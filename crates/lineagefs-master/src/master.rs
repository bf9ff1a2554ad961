//! The metadata master: a global view of the file system. Client and
//! worker operations mutate the namespace, dependency graph, and worker
//! registry under three coarse locks, appending journal records before
//! they return. Two background loops drive worker failure detection and
//! lineage recomputation.
//!
//! Lock order: `ns` before `deps`; `workers` is never held while taking
//! either of the other two. The journal writer is internally locked and
//! always taken last.

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::MasterConfig;
use crate::depgraph::DependencyGraph;
use crate::dependency::{Dependency, DependencyType};
use crate::inode::{Inode, InodeKind};
use crate::journal::{self, JournalRecord, LogWriter};
use crate::launcher::CommandLauncher;
use crate::namespace::{join_paths, Namespace, SEPARATOR};
use crate::prefix::PrefixList;
use crate::types::{
    current_time_ms, ClientDependencyInfo, ClientFileInfo, ClientRawTableInfo, ClientWorkerInfo,
    DependencyId, InodeId, MasterError, NetAddress, WorkerCommand, WorkerId, NO_DEPENDENCY,
    ROOT_INODE_ID,
};
use crate::worker::WorkerRegistry;

/// Name prefix of the per-column folders under a raw table.
pub const COLUMN_PREFIX: &str = "COL_";

/// Sleep between recomputation passes that launched nothing.
const RECOMPUTE_IDLE_SLEEP_MS: u64 = 1000;

/// Condvar-backed shutdown flag shared with the background loops.
struct ShutdownSignal {
    state: Mutex<bool>,
    cv: Condvar,
}

impl ShutdownSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        *state = true;
        self.cv.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    /// Sleeps up to `timeout`; returns true when shutdown was signalled.
    fn wait(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        if *state {
            return true;
        }
        let (state, _) = self.cv.wait_timeout(state, timeout).unwrap();
        *state
    }
}

/// Handles of the spawned background loops.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Waits for the loops to exit. Call after [`Master::shutdown`].
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

/// The in-memory master state and every operation over it.
pub struct Master {
    config: MasterConfig,
    start_time_ms: i64,
    whitelist: PrefixList,
    pin_list: PrefixList,
    inode_counter: AtomicI32,
    dependency_counter: AtomicI32,
    rerun_counter: AtomicI32,
    user_counter: AtomicI64,
    ns: Mutex<Namespace>,
    deps: Mutex<DependencyGraph>,
    workers: Mutex<WorkerRegistry>,
    log: Mutex<LogWriter>,
    launcher: Arc<dyn CommandLauncher>,
    shutdown: ShutdownSignal,
}

impl Master {
    /// Starts a master: replays the checkpoint and log, compacts them into
    /// a fresh checkpoint, and opens an empty log. Fails on unreadable
    /// journal data.
    pub fn new(
        config: MasterConfig,
        launcher: Arc<dyn CommandLauncher>,
    ) -> Result<Self, MasterError> {
        let start_time_ms = current_time_ms();
        let whitelist = PrefixList::from_spec(&config.whitelist);
        let pin_list = PrefixList::from_spec(&config.pinlist);

        let mut ns = Namespace::new(start_time_ms);
        let mut deps = DependencyGraph::new();
        let (cp_inode, cp_dep) = journal::replay(&config.checkpoint_file, false, &mut ns, &mut deps)?;
        let (log_inode, log_dep) = journal::replay(&config.log_file, true, &mut ns, &mut deps)?;
        let inode_counter = cp_inode.max(log_inode).max(ROOT_INODE_ID);
        let dependency_counter = cp_dep.max(log_dep);

        journal::write_checkpoint(
            &config.checkpoint_file,
            &ns,
            &deps,
            inode_counter,
            dependency_counter,
        )?;
        if config.log_file.exists() {
            fs::remove_file(&config.log_file)?;
        }
        let log = LogWriter::create(&config.log_file)?;

        info!(
            start_time_ms,
            inode_counter,
            dependency_counter,
            inodes = ns.len(),
            "master started"
        );

        Ok(Self {
            workers: Mutex::new(WorkerRegistry::new(start_time_ms)),
            config,
            start_time_ms,
            whitelist,
            pin_list,
            inode_counter: AtomicI32::new(inode_counter),
            dependency_counter: AtomicI32::new(dependency_counter),
            rerun_counter: AtomicI32::new(0),
            user_counter: AtomicI64::new(0),
            ns: Mutex::new(ns),
            deps: Mutex::new(deps),
            log: Mutex::new(log),
            launcher,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// The configuration this master was started with.
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Wall-clock start time in milliseconds since the epoch.
    pub fn get_start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    /// Address the master serves on.
    pub fn get_master_address(&self) -> NetAddress {
        self.config.master_address.clone()
    }

    /// Allocates a fresh user id. Ids start at 1.
    pub fn get_new_user_id(&self) -> i64 {
        self.user_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn alloc_inode_id(&self) -> InodeId {
        self.inode_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn alloc_dependency_id(&self) -> DependencyId {
        self.dependency_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_rerun(&self) -> i32 {
        self.rerun_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn append_record(&self, record: JournalRecord) -> Result<(), MasterError> {
        self.log.lock().unwrap().append_durable(&record)
    }

    fn append_transaction(&self, records: Vec<JournalRecord>) -> Result<(), MasterError> {
        if records.is_empty() {
            return Ok(());
        }
        self.log.lock().unwrap().append_transaction(records)
    }

    // ---- namespace operations ----

    /// Creates a file, with parent folders created as needed.
    pub fn create_file(&self, path: &str, directory: bool) -> Result<InodeId, MasterError> {
        self.create(path, directory, true, -1, Vec::new())
    }

    /// Creates an inode at `path`: a raw table when `columns >= 0`, else a
    /// folder when `directory`, else a file. Missing parent folders are
    /// created when `recursive`. New files pick up their pin and cache
    /// flags from the configured prefix lists.
    pub fn create(
        &self,
        path: &str,
        directory: bool,
        recursive: bool,
        columns: i32,
        metadata: Vec<u8>,
    ) -> Result<InodeId, MasterError> {
        let mut ns = self.ns.lock().unwrap();
        let mut records = Vec::new();
        let id = self.create_locked(&mut ns, path, directory, recursive, columns, metadata, &mut records)?;
        self.append_transaction(records)?;
        debug!(path, id, "created inode");
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_locked(
        &self,
        ns: &mut Namespace,
        path: &str,
        directory: bool,
        recursive: bool,
        columns: i32,
        metadata: Vec<u8>,
        records: &mut Vec<JournalRecord>,
    ) -> Result<InodeId, MasterError> {
        let components = Namespace::parse_path(path)?;
        if ns.resolve_components(&components)?.is_some() {
            info!(path, "create failed, path already exists");
            return Err(MasterError::FileAlreadyExists(path.to_string()));
        }
        // the root always resolves, so there is at least one component
        let (parent_components, name) = components.split_at(components.len() - 1);
        let name = &name[0];

        let parent_id = match ns.resolve_components(parent_components)? {
            Some(pid) => {
                if ns.get(pid).is_some_and(Inode::is_file) {
                    return Err(MasterError::InvalidPath(format!(
                        "{} is a file",
                        ns.path_of(pid)
                    )));
                }
                pid
            }
            None => {
                if !recursive {
                    return Err(MasterError::InvalidPath(format!(
                        "parent folder of {} does not exist",
                        path
                    )));
                }
                let parent_path = format!("{}{}", SEPARATOR, parent_components.join(SEPARATOR));
                self.create_locked(ns, &parent_path, true, true, -1, Vec::new(), records)?
            }
        };

        let id = self.alloc_inode_id();
        let now = current_time_ms();
        let inode = if columns >= 0 {
            Inode::new_raw_table(name, id, parent_id, columns as u32, metadata, now)
        } else if directory {
            Inode::new_folder(name, id, parent_id, now)
        } else {
            let mut file = Inode::new_file(name, id, parent_id, now);
            let abs_path = join_paths(&ns.path_of(parent_id), name);
            let state = file.file_mut().expect("new file inode");
            if self.pin_list.in_list(&abs_path) {
                state.pin = true;
                ns.pin(id);
            }
            if self.whitelist.in_list(&abs_path) {
                state.cache = true;
            }
            file
        };
        ns.attach(inode);

        records.push(JournalRecord::Inode(
            ns.get(parent_id).expect("parent folder").clone(),
        ));
        records.push(JournalRecord::Inode(ns.get(id).expect("new inode").clone()));
        Ok(id)
    }

    /// Creates a raw table with `columns` pre-created child folders named
    /// `COL_0 .. COL_{columns-1}`.
    pub fn create_raw_table(
        &self,
        path: &str,
        columns: i32,
        metadata: Vec<u8>,
    ) -> Result<InodeId, MasterError> {
        if columns <= 0 || columns as i64 >= self.config.max_columns as i64 {
            return Err(MasterError::TableColumn {
                columns: columns as i64,
                max: self.config.max_columns,
            });
        }

        let mut ns = self.ns.lock().unwrap();
        let mut records = Vec::new();
        let id = self.create_locked(&mut ns, path, true, true, columns, metadata, &mut records)?;
        for k in 0..columns {
            let column_path = join_paths(path, &format!("{}{}", COLUMN_PREFIX, k));
            self.create_locked(&mut ns, &column_path, true, true, -1, Vec::new(), &mut records)?;
        }
        self.append_transaction(records)?;
        info!(path, id, columns, "created raw table");
        Ok(id)
    }

    /// Deletes an inode and its subtree. A missing id is a no-op. Only
    /// metadata is removed; worker copies age out on their own, and
    /// dependencies that referenced the files survive for ancestor
    /// recomputation.
    pub fn delete_id(&self, id: InodeId) -> Result<(), MasterError> {
        let mut ns = self.ns.lock().unwrap();
        self.delete_under_lock(&mut ns, id)
    }

    /// Deletes the inode at `path`; fails if the path does not resolve.
    pub fn delete_path(&self, path: &str) -> Result<(), MasterError> {
        let mut ns = self.ns.lock().unwrap();
        let Some(id) = ns.resolve(path)? else {
            return Err(MasterError::FileDoesNotExist(path.to_string()));
        };
        self.delete_under_lock(&mut ns, id)
    }

    fn delete_under_lock(&self, ns: &mut Namespace, id: InodeId) -> Result<(), MasterError> {
        if id == ROOT_INODE_ID {
            warn!("refusing to delete the root folder");
            return Ok(());
        }
        let Some(parent_id) = ns.get(id).map(|i| i.parent_id) else {
            debug!(id, "delete of a missing id is a no-op");
            return Ok(());
        };
        let mut records = Vec::new();
        Self::delete_subtree(ns, id, &mut records);
        if let Some(parent) = ns.get(parent_id) {
            records.push(JournalRecord::Inode(parent.clone()));
        }
        self.append_transaction(records)?;
        info!(id, "deleted inode");
        Ok(())
    }

    fn delete_subtree(ns: &mut Namespace, id: InodeId, records: &mut Vec<JournalRecord>) {
        let child_ids = ns.get(id).map(Inode::child_ids).unwrap_or_default();
        for child in child_ids {
            Self::delete_subtree(ns, child, records);
        }
        let Some(mut inode) = ns.remove(id) else {
            return;
        };
        ns.remove_child_entry(inode.parent_id, &inode.name);
        ns.unpin(id);
        inode.tombstone();
        records.push(JournalRecord::Inode(inode));
    }

    /// Renames a single inode. The destination must not exist and its
    /// parent folder must.
    pub fn rename(&self, src: &str, dst: &str) -> Result<(), MasterError> {
        let mut ns = self.ns.lock().unwrap();
        let src_id = ns
            .resolve(src)?
            .ok_or_else(|| MasterError::FileDoesNotExist(src.to_string()))?;
        if src_id == ROOT_INODE_ID {
            return Err(MasterError::InvalidPath("cannot rename the root".to_string()));
        }
        if ns.resolve(dst)?.is_some() {
            return Err(MasterError::FileAlreadyExists(dst.to_string()));
        }
        let dst_components = Namespace::parse_path(dst)?;
        let (dst_parent_components, dst_name) = dst_components.split_at(dst_components.len() - 1);
        let dst_name = dst_name[0].clone();
        let dst_parent_id = match ns.resolve_components(dst_parent_components)? {
            Some(pid) if ns.get(pid).is_some_and(Inode::is_folder) => pid,
            _ => {
                return Err(MasterError::FileDoesNotExist(format!(
                    "parent folder for {}",
                    dst
                )));
            }
        };
        // moving a folder under itself would detach it into a cycle
        let mut cursor = dst_parent_id;
        while cursor != ROOT_INODE_ID {
            if cursor == src_id {
                return Err(MasterError::InvalidPath(format!(
                    "cannot move {} into its own subtree",
                    src
                )));
            }
            cursor = ns.get(cursor).map(|i| i.parent_id).unwrap_or(ROOT_INODE_ID);
        }

        let (old_parent_id, old_name) = {
            let inode = ns.get(src_id).expect("resolved inode");
            (inode.parent_id, inode.name.clone())
        };
        ns.remove_child_entry(old_parent_id, &old_name);
        {
            let inode = ns.get_mut(src_id).expect("resolved inode");
            inode.name = dst_name.clone();
            inode.parent_id = dst_parent_id;
        }
        ns.add_child_entry(dst_parent_id, &dst_name, src_id);

        let mut records = vec![JournalRecord::Inode(
            ns.get(old_parent_id).expect("old parent").clone(),
        )];
        if dst_parent_id != old_parent_id {
            records.push(JournalRecord::Inode(
                ns.get(dst_parent_id).expect("new parent").clone(),
            ));
        }
        records.push(JournalRecord::Inode(ns.get(src_id).expect("renamed inode").clone()));
        self.append_transaction(records)?;
        info!(src, dst, "renamed inode");
        Ok(())
    }

    /// Resolves a path to its inode id, or -1 when absent.
    pub fn get_file_id(&self, path: &str) -> Result<InodeId, MasterError> {
        let ns = self.ns.lock().unwrap();
        Ok(ns.resolve(path)?.unwrap_or(-1))
    }

    fn client_file_info(ns: &Namespace, id: InodeId) -> Result<ClientFileInfo, MasterError> {
        let inode = ns
            .get(id)
            .ok_or_else(|| MasterError::FileDoesNotExist(format!("file id {}", id)))?;
        let mut info = ClientFileInfo {
            id,
            name: inode.name.clone(),
            path: ns.path_of(id),
            size_bytes: 0,
            creation_time_ms: inode.creation_time_ms,
            checkpoint_path: String::new(),
            in_memory: false,
            ready: true,
            folder: inode.is_folder(),
            need_pin: false,
            need_cache: false,
            dependency_id: NO_DEPENDENCY,
        };
        if let Some(file) = inode.file() {
            info.size_bytes = file.length;
            info.in_memory = file.is_in_memory();
            info.ready = file.ready;
            info.checkpoint_path = file.checkpoint_path.clone();
            info.need_pin = file.pin;
            info.need_cache = file.cache;
            info.dependency_id = file.dependency_id;
        }
        Ok(info)
    }

    /// Client view of the inode with the given id.
    pub fn get_file_info_by_id(&self, id: InodeId) -> Result<ClientFileInfo, MasterError> {
        let ns = self.ns.lock().unwrap();
        Self::client_file_info(&ns, id)
    }

    /// Client view of the inode at `path`.
    pub fn get_file_info(&self, path: &str) -> Result<ClientFileInfo, MasterError> {
        let ns = self.ns.lock().unwrap();
        let id = ns
            .resolve(path)?
            .ok_or_else(|| MasterError::FileDoesNotExist(path.to_string()))?;
        Self::client_file_info(&ns, id)
    }

    /// Client views of the inode at `path`, or of each direct child when
    /// it is a folder.
    pub fn get_files_info(&self, path: &str) -> Result<Vec<ClientFileInfo>, MasterError> {
        let ns = self.ns.lock().unwrap();
        let id = ns
            .resolve(path)?
            .ok_or_else(|| MasterError::FileDoesNotExist(path.to_string()))?;
        let inode = ns.get(id).expect("resolved inode");
        if inode.is_file() {
            return Ok(vec![Self::client_file_info(&ns, id)?]);
        }
        inode
            .child_ids()
            .into_iter()
            .map(|child| Self::client_file_info(&ns, child))
            .collect()
    }

    fn raw_table_info(ns: &Namespace, id: InodeId) -> Result<ClientRawTableInfo, MasterError> {
        let Some(inode) = ns.get(id) else {
            return Err(MasterError::TableDoesNotExist(format!("table id {}", id)));
        };
        match &inode.kind {
            InodeKind::RawTable(table) => Ok(ClientRawTableInfo {
                id,
                name: inode.name.clone(),
                path: ns.path_of(id),
                columns: table.columns,
                metadata: table.metadata.clone(),
            }),
            _ => Err(MasterError::TableDoesNotExist(format!("table id {}", id))),
        }
    }

    /// Client view of the raw table with the given id.
    pub fn get_raw_table_info_by_id(&self, id: InodeId) -> Result<ClientRawTableInfo, MasterError> {
        let ns = self.ns.lock().unwrap();
        Self::raw_table_info(&ns, id)
    }

    /// Client view of the raw table at `path`.
    pub fn get_raw_table_info(&self, path: &str) -> Result<ClientRawTableInfo, MasterError> {
        let ns = self.ns.lock().unwrap();
        let id = ns
            .resolve(path)?
            .ok_or_else(|| MasterError::TableDoesNotExist(path.to_string()))?;
        Self::raw_table_info(&ns, id)
    }

    /// Id of the raw table at `path`, or -1 when the path is absent or not
    /// a raw table.
    pub fn get_raw_table_id(&self, path: &str) -> Result<InodeId, MasterError> {
        let ns = self.ns.lock().unwrap();
        match ns.resolve(path)? {
            Some(id) if ns.get(id).is_some_and(Inode::is_raw_table) => Ok(id),
            _ => Ok(-1),
        }
    }

    /// Worker locations of the file with the given id. May be empty.
    pub fn get_file_locations_by_id(&self, id: InodeId) -> Result<Vec<NetAddress>, MasterError> {
        let ns = self.ns.lock().unwrap();
        match ns.get(id) {
            Some(inode) if inode.is_file() => {
                Ok(inode.file().expect("file inode").location_addresses())
            }
            _ => Err(MasterError::FileDoesNotExist(format!("file id {}", id))),
        }
    }

    /// Worker locations of the file at `path`.
    pub fn get_file_locations(&self, path: &str) -> Result<Vec<NetAddress>, MasterError> {
        let id = {
            let ns = self.ns.lock().unwrap();
            ns.resolve(path)?
                .ok_or_else(|| MasterError::FileDoesNotExist(path.to_string()))?
        };
        self.get_file_locations_by_id(id)
    }

    /// File ids under `path`; see [`Namespace::list_files`].
    pub fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<InodeId>, MasterError> {
        let ns = self.ns.lock().unwrap();
        let id = ns
            .resolve(path)?
            .ok_or_else(|| MasterError::FileDoesNotExist(path.to_string()))?;
        Ok(ns.list_files(id, recursive))
    }

    /// Paths under `path`; see [`Namespace::ls`].
    pub fn ls(&self, path: &str, recursive: bool) -> Result<Vec<String>, MasterError> {
        let ns = self.ns.lock().unwrap();
        let id = ns
            .resolve(path)?
            .ok_or_else(|| MasterError::FileDoesNotExist(path.to_string()))?;
        Ok(ns.ls(id, recursive))
    }

    /// Number of entries at `path`: 1 for a file, the child count for a
    /// folder.
    pub fn get_number_of_files(&self, path: &str) -> Result<usize, MasterError> {
        let ns = self.ns.lock().unwrap();
        let id = ns
            .resolve(path)?
            .ok_or_else(|| MasterError::FileDoesNotExist(path.to_string()))?;
        let inode = ns.get(id).expect("resolved inode");
        if inode.is_file() {
            Ok(1)
        } else {
            Ok(inode.child_ids().len())
        }
    }

    /// Absolute paths of every file currently held in worker memory.
    pub fn get_in_memory_files(&self) -> Vec<String> {
        self.ns.lock().unwrap().in_memory_files()
    }

    /// Configured pin prefixes.
    pub fn get_pin_list(&self) -> Vec<String> {
        self.pin_list.list()
    }

    /// Configured whitelist prefixes.
    pub fn get_white_list(&self) -> Vec<String> {
        self.whitelist.list()
    }

    /// Ids of all currently pinned files.
    pub fn get_pin_id_list(&self) -> Vec<InodeId> {
        self.ns.lock().unwrap().pin_ids()
    }

    /// Clears the pin flag of a file so workers may evict it again.
    pub fn unpin_file(&self, id: InodeId) -> Result<(), MasterError> {
        let mut ns = self.ns.lock().unwrap();
        match ns.get_mut(id) {
            Some(inode) if inode.is_file() => {
                inode.file_mut().expect("file inode").pin = false;
            }
            _ => return Err(MasterError::FileDoesNotExist(format!("file id {}", id))),
        }
        ns.unpin(id);
        let record = JournalRecord::Inode(ns.get(id).expect("unpinned file").clone());
        self.append_record(record)?;
        info!(file_id = id, "unpinned file");
        Ok(())
    }

    // ---- worker operations ----

    /// Registers a worker, evicting any prior registration at the same
    /// address, and records its current files' locations.
    pub fn register_worker(
        &self,
        address: NetAddress,
        capacity_bytes: i64,
        used_bytes: i64,
        current_files: &[InodeId],
    ) -> WorkerId {
        let id = {
            let mut workers = self.workers.lock().unwrap();
            workers.register(
                address.clone(),
                capacity_bytes,
                used_bytes,
                current_files,
                current_time_ms(),
            )
        };
        let mut ns = self.ns.lock().unwrap();
        for file_id in current_files {
            match ns.get_mut(*file_id) {
                Some(inode) if inode.is_file() => {
                    inode
                        .file_mut()
                        .expect("file inode")
                        .add_location(id, address.clone());
                }
                _ => warn!(file_id = *file_id, "registerWorker could not attach location"),
            }
        }
        info!(worker_id = id, address = %address, "registered worker");
        id
    }

    /// Applies a worker heartbeat. Unknown ids are told to re-register.
    pub fn worker_heartbeat(
        &self,
        worker_id: WorkerId,
        used_bytes: i64,
        removed_files: &[InodeId],
    ) -> WorkerCommand {
        {
            let mut workers = self.workers.lock().unwrap();
            match workers.get_mut(worker_id) {
                None => {
                    info!(worker_id, "heartbeat from unknown worker, requesting re-register");
                    return WorkerCommand::Register;
                }
                Some(worker) => {
                    worker.used_bytes = used_bytes;
                    for file_id in removed_files {
                        worker.files.remove(file_id);
                    }
                    worker.touch(current_time_ms());
                }
            }
        }
        let mut ns = self.ns.lock().unwrap();
        for file_id in removed_files {
            match ns.get_mut(*file_id) {
                Some(inode) if inode.is_file() => {
                    inode.file_mut().expect("file inode").remove_location(worker_id);
                }
                Some(_) => {}
                None => error!(file_id = *file_id, "removed file does not exist"),
            }
        }
        WorkerCommand::Nothing
    }

    /// Records that a worker cached a file, sizing it on first report.
    /// Returns the file's dependency id when it still needs a checkpoint,
    /// else -1.
    pub fn cached_file(
        &self,
        worker_id: WorkerId,
        used_bytes: i64,
        file_id: InodeId,
        size_bytes: i64,
    ) -> Result<DependencyId, MasterError> {
        let address = {
            let mut workers = self.workers.lock().unwrap();
            match workers.get_mut(worker_id) {
                Some(worker) => {
                    worker.files.insert(file_id);
                    worker.used_bytes = used_bytes;
                    worker.touch(current_time_ms());
                    Some(worker.address.clone())
                }
                None => {
                    warn!(worker_id, file_id, "cachedFile from unknown worker");
                    None
                }
            }
        };

        let mut ns = self.ns.lock().unwrap();
        let (dep_id, checkpointed, need_log) = {
            let file = ns
                .get_mut(file_id)
                .filter(|inode| inode.is_file())
                .and_then(Inode::file_mut)
                .ok_or_else(|| MasterError::FileDoesNotExist(format!("file id {}", file_id)))?;
            let mut need_log = false;
            if file.ready {
                if file.length != size_bytes {
                    return Err(MasterError::SuspectedFileSize {
                        file_id,
                        recorded: file.length,
                        reported: size_bytes,
                    });
                }
            } else {
                file.length = size_bytes;
                file.ready = true;
                need_log = true;
            }
            if let Some(address) = address {
                file.add_location(worker_id, address);
            }
            (file.dependency_id, file.has_checkpoint(), need_log)
        };
        self.deps.lock().unwrap().file_recovered(file_id);
        if need_log {
            self.append_record(JournalRecord::Inode(
                ns.get(file_id).expect("cached file").clone(),
            ))?;
        }
        debug!(worker_id, file_id, size_bytes, "cached file");
        Ok(if checkpointed { NO_DEPENDENCY } else { dep_id })
    }

    /// Records a checkpoint of a file in the external store. `worker_id`
    /// may be -1 for checkpoints reported outside any registered worker.
    pub fn add_checkpoint(
        &self,
        worker_id: WorkerId,
        file_id: InodeId,
        size_bytes: i64,
        checkpoint_path: &str,
    ) -> Result<bool, MasterError> {
        if worker_id != -1 {
            let mut workers = self.workers.lock().unwrap();
            match workers.get_mut(worker_id) {
                Some(worker) => worker.touch(current_time_ms()),
                None => warn!(worker_id, "addCheckpoint from unknown worker"),
            }
        }

        let mut ns = self.ns.lock().unwrap();
        let need_log = {
            let file = ns
                .get_mut(file_id)
                .filter(|inode| inode.is_file())
                .and_then(Inode::file_mut)
                .ok_or_else(|| MasterError::FileDoesNotExist(format!("file id {}", file_id)))?;
            let mut need_log = false;
            if file.ready {
                if file.length != size_bytes {
                    return Err(MasterError::SuspectedFileSize {
                        file_id,
                        recorded: file.length,
                        reported: size_bytes,
                    });
                }
            } else {
                file.length = size_bytes;
                file.ready = true;
                need_log = true;
            }
            if !file.has_checkpoint() {
                file.checkpoint_path = checkpoint_path.to_string();
                need_log = true;
                let dep_id = file.dependency_id;
                if dep_id != NO_DEPENDENCY {
                    let mut deps = self.deps.lock().unwrap();
                    if let Some(dep) = deps.get_mut(dep_id) {
                        dep.child_checkpointed(file_id);
                        if dep.is_checkpointed() {
                            deps.mark_checkpointed(dep_id);
                        }
                    }
                }
            }
            need_log
        };
        self.deps.lock().unwrap().file_recovered(file_id);
        if need_log {
            self.append_record(JournalRecord::Inode(
                ns.get(file_id).expect("checkpointed file").clone(),
            ))?;
        }
        info!(worker_id, file_id, checkpoint_path, "added checkpoint");
        Ok(true)
    }

    /// Picks a worker: uniformly at random, or by host name. Fails when no
    /// worker matches (or none is registered).
    pub fn get_worker(&self, random: bool, host: &str) -> Result<NetAddress, MasterError> {
        let workers = self.workers.lock().unwrap();
        if random {
            workers
                .pick_random()
                .ok_or_else(|| MasterError::NoLocalWorker("no worker registered".to_string()))
        } else {
            workers
                .pick_local(host)
                .ok_or_else(|| MasterError::NoLocalWorker(host.to_string()))
        }
    }

    /// Sum of registered worker capacities.
    pub fn get_capacity_bytes(&self) -> i64 {
        self.workers.lock().unwrap().total_capacity_bytes()
    }

    /// Sum of registered worker used bytes.
    pub fn get_used_bytes(&self) -> i64 {
        self.workers.lock().unwrap().total_used_bytes()
    }

    /// Number of registered workers.
    pub fn get_worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Client projections of every registered worker.
    pub fn get_workers_info(&self) -> Vec<ClientWorkerInfo> {
        self.workers.lock().unwrap().infos()
    }

    // ---- dependency operations ----

    fn files_ids_locked(
        &self,
        ns: &Namespace,
        paths: &[String],
    ) -> Result<Vec<InodeId>, MasterError> {
        let mut ret = Vec::new();
        for path in paths {
            let id = ns
                .resolve(path)?
                .ok_or_else(|| MasterError::FileDoesNotExist(path.clone()))?;
            ret.extend(ns.list_files(id, true));
        }
        Ok(ret)
    }

    /// Records the lineage of `children` as produced from `parents` by the
    /// given command. Folder paths expand to their descendant files. Each
    /// child file is stamped with the new dependency id; children that
    /// already have checkpoints start finished.
    #[allow(clippy::too_many_arguments)]
    pub fn create_dependency(
        &self,
        parents: &[String],
        children: &[String],
        command_prefix: &str,
        data: Vec<Vec<u8>>,
        comment: &str,
        framework: &str,
        framework_version: &str,
        dependency_type: DependencyType,
    ) -> Result<DependencyId, MasterError> {
        let mut ns = self.ns.lock().unwrap();
        let parent_ids = self.files_ids_locked(&ns, parents)?;
        let child_ids = self.files_ids_locked(&ns, children)?;

        let mut parent_dependencies = HashSet::new();
        for parent_id in &parent_ids {
            let inode = ns
                .get(*parent_id)
                .ok_or_else(|| MasterError::FileDoesNotExist(format!("file id {}", parent_id)))?;
            match inode.file() {
                Some(file) => {
                    parent_dependencies.insert(file.dependency_id);
                }
                None => {
                    return Err(MasterError::InvalidPath(format!(
                        "parent {} is not a file",
                        ns.path_of(*parent_id)
                    )));
                }
            }
        }

        let dep_id = self.alloc_dependency_id();
        let mut dep = Dependency::new(
            dep_id,
            parent_ids,
            child_ids.clone(),
            command_prefix.to_string(),
            data,
            comment.to_string(),
            framework.to_string(),
            framework_version.to_string(),
            dependency_type,
            parent_dependencies,
            current_time_ms(),
        );

        for child_id in &child_ids {
            let file = ns
                .get_mut(*child_id)
                .and_then(Inode::file_mut)
                .ok_or_else(|| {
                    MasterError::InvalidPath(format!("child {} is not a file", child_id))
                })?;
            file.dependency_id = dep_id;
            if file.has_checkpoint() {
                dep.child_checkpointed(*child_id);
            }
        }

        let mut records: Vec<JournalRecord> = child_ids
            .iter()
            .map(|child_id| JournalRecord::Inode(ns.get(*child_id).expect("child file").clone()))
            .collect();
        {
            let mut deps = self.deps.lock().unwrap();
            deps.insert(dep.clone());
        }
        records.push(JournalRecord::Dependency(dep));
        self.append_transaction(records)?;
        info!(dependency_id = dep_id, framework, "created dependency");
        Ok(dep_id)
    }

    /// Client view of a dependency.
    pub fn get_client_dependency_info(
        &self,
        dep_id: DependencyId,
    ) -> Result<ClientDependencyInfo, MasterError> {
        let deps = self.deps.lock().unwrap();
        deps.get(dep_id)
            .map(Dependency::client_info)
            .ok_or(MasterError::DependencyDoesNotExist(dep_id))
    }

    /// Marks a file lost and queues its dependency for recomputation. A
    /// file without lineage is logged as unrecoverable.
    pub fn report_lost_file(&self, file_id: InodeId) {
        let ns = self.ns.lock().unwrap();
        match ns.get(file_id) {
            None => warn!(file_id, "reported lost file does not exist"),
            Some(inode) if inode.is_folder() => {
                warn!(file_id, "reported lost inode is a folder");
            }
            Some(inode) => {
                let dep_id = inode.file().expect("file inode").dependency_id;
                let mut deps = self.deps.lock().unwrap();
                deps.lost_files.insert(file_id);
                if dep_id == NO_DEPENDENCY {
                    error!(file_id, "no lineage for lost file, it cannot be recovered");
                } else {
                    if let Some(dep) = deps.get_mut(dep_id) {
                        dep.add_lost_file(file_id);
                    }
                    deps.must_recompute.insert(dep_id);
                    info!(file_id, dependency_id = dep_id, "lost file queued for recomputation");
                }
            }
        }
    }

    /// Dependencies preferred for proactive checkpointing; see
    /// [`DependencyGraph::priority_list`].
    pub fn get_priority_dependency_list(&self) -> Vec<DependencyId> {
        self.deps.lock().unwrap().priority_list()
    }

    // ---- liveness and recomputation ----

    /// Runs one liveness pass against the current wall clock.
    pub fn liveness_sweep(&self) -> usize {
        self.liveness_sweep_at(current_time_ms())
    }

    /// Runs one liveness pass against the given clock: times out stale
    /// workers, drops their file locations, marks orphaned files lost, and
    /// invokes the worker restart hook when anything was cleaned up.
    /// Returns the number of lost workers processed.
    pub fn liveness_sweep_at(&self, now_ms: i64) -> usize {
        let lost = {
            let mut workers = self.workers.lock().unwrap();
            workers.sweep_timed_out(now_ms, self.config.worker_timeout_ms);
            workers.drain_lost()
        };
        if lost.is_empty() {
            return 0;
        }

        {
            let mut ns = self.ns.lock().unwrap();
            let mut deps = self.deps.lock().unwrap();
            for worker in &lost {
                for file_id in &worker.files {
                    let Some(file) = ns.get_mut(*file_id).and_then(Inode::file_mut) else {
                        continue;
                    };
                    file.remove_location(worker.id);
                    if !file.has_checkpoint() && !file.is_in_memory() {
                        let dep_id = file.dependency_id;
                        deps.lost_files.insert(*file_id);
                        if dep_id == NO_DEPENDENCY {
                            error!(
                                file_id = *file_id,
                                worker_id = worker.id,
                                "permanent data loss: no checkpoint and no lineage"
                            );
                        } else {
                            if let Some(dep) = deps.get_mut(dep_id) {
                                dep.add_lost_file(*file_id);
                            }
                            if !self.config.proactive_recovery {
                                deps.must_recompute.insert(dep_id);
                            }
                        }
                    } else {
                        info!(
                            file_id = *file_id,
                            worker_id = worker.id,
                            "file lost an in-memory copy only"
                        );
                    }
                }
            }
        }

        warn!(lost_workers = lost.len(), "restarting failed workers");
        let script = format!("{}/bin/restart-failed-workers.sh", self.config.home.display());
        if let Err(e) = self.launcher.launch(&script) {
            error!(error = %e, "failed to run the worker restart hook");
        }
        lost.len()
    }

    /// Runs one recomputation pass: launches every queued dependency whose
    /// parent files are all available, cascading recomputation to
    /// ancestors of lost parents. Returns true when anything launched.
    pub fn schedule_recomputation_once(&self) -> bool {
        let commands = {
            let ns = self.ns.lock().unwrap();
            let mut deps = self.deps.lock().unwrap();
            if deps.must_recompute.is_empty() {
                return false;
            }
            let plan = deps.plan_recomputation(|file_id| {
                ns.get(file_id)
                    .and_then(Inode::file)
                    .map(|f| f.dependency_id)
                    .filter(|dep_id| *dep_id != NO_DEPENDENCY)
            });
            let mut commands = Vec::new();
            for dep_id in plan {
                deps.mark_launched(dep_id);
                if let Some(dep) = deps.get(dep_id) {
                    let command = format!(
                        "{} &> {}/logs/rerun {}",
                        dep.command(),
                        self.config.home.display(),
                        self.next_rerun()
                    );
                    commands.push((dep_id, command));
                }
            }
            if commands.is_empty() {
                info!("lost files present but no dependency can be launched");
            }
            commands
        };

        let launched = !commands.is_empty();
        for (dep_id, command) in commands {
            info!(dependency_id = dep_id, command = %command, "launching recomputation");
            if let Err(e) = self.launcher.launch(&command) {
                error!(dependency_id = dep_id, error = %e, "recomputation launch failed");
            }
        }
        launched
    }

    /// Compacts the journal: writes a fresh checkpoint of the current
    /// state and truncates the log.
    pub fn checkpoint(&self) -> Result<(), MasterError> {
        let ns = self.ns.lock().unwrap();
        let deps = self.deps.lock().unwrap();
        let mut log = self.log.lock().unwrap();
        journal::write_checkpoint(
            &self.config.checkpoint_file,
            &ns,
            &deps,
            self.inode_counter.load(Ordering::SeqCst),
            self.dependency_counter.load(Ordering::SeqCst),
        )?;
        *log = LogWriter::create(&self.config.log_file)?;
        Ok(())
    }

    // ---- background loops ----

    /// Spawns the liveness monitor and the recomputation scheduler. Both
    /// run until [`Master::shutdown`].
    pub fn spawn_background(self: Arc<Self>) -> BackgroundTasks {
        let liveness = {
            let master = Arc::clone(&self);
            thread::Builder::new()
                .name("liveness-monitor".to_string())
                .spawn(move || {
                    let interval = Duration::from_millis(master.config.heartbeat_interval_ms);
                    while !master.shutdown.wait(interval) {
                        master.liveness_sweep();
                    }
                })
                .expect("spawn liveness monitor")
        };
        let scheduler = {
            let master = self;
            thread::Builder::new()
                .name("recompute-scheduler".to_string())
                .spawn(move || {
                    while !master.shutdown.is_set() {
                        let launched = master.schedule_recomputation_once();
                        if !launched {
                            let idle = Duration::from_millis(RECOMPUTE_IDLE_SLEEP_MS);
                            if master.shutdown.wait(idle) {
                                break;
                            }
                        }
                    }
                })
                .expect("spawn recomputation scheduler")
        };
        BackgroundTasks {
            handles: vec![liveness, scheduler],
        }
    }

    /// Signals the background loops to exit.
    pub fn shutdown(&self) {
        self.shutdown.signal();
    }
}
