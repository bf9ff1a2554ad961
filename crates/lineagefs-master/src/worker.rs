//! Worker registry: per-worker state, id allocation prefixed by the
//! master's start time, the address reverse index, and the queue of lost
//! workers awaiting cleanup by the liveness monitor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

use rand::seq::IteratorRandom;
use tracing::{error, warn};

use crate::types::{ClientWorkerInfo, InodeId, NetAddress, WorkerId};

/// Worker ids from different master incarnations never collide: each id is
/// the master's start time rounded down to this granularity, plus a
/// monotone counter.
const WORKER_ID_PREFIX_GRANULARITY_MS: i64 = 1_000_000;

/// Initial capacity of the lost-worker queue. The queue is drained on
/// every liveness sweep, so it grows past this only under bursts.
const LOST_WORKERS_CAPACITY: usize = 32;

/// Registered state of a single worker.
#[derive(Clone, Debug)]
pub struct WorkerInfo {
    /// Worker id.
    pub id: WorkerId,
    /// Address the worker serves on.
    pub address: NetAddress,
    /// Total memory capacity in bytes.
    pub capacity_bytes: i64,
    /// Bytes currently in use.
    pub used_bytes: i64,
    /// Files the worker holds in memory.
    pub files: HashSet<InodeId>,
    /// Last heartbeat in milliseconds since the epoch.
    pub last_updated_ms: i64,
}

impl WorkerInfo {
    /// Creates a worker record with an empty file set.
    pub fn new(id: WorkerId, address: NetAddress, capacity_bytes: i64, now_ms: i64) -> Self {
        Self {
            id,
            address,
            capacity_bytes,
            used_bytes: 0,
            files: HashSet::new(),
            last_updated_ms: now_ms,
        }
    }

    /// Refreshes the heartbeat timestamp.
    pub fn touch(&mut self, now_ms: i64) {
        self.last_updated_ms = now_ms;
    }

    /// Client projection of this worker.
    pub fn client_info(&self) -> ClientWorkerInfo {
        ClientWorkerInfo {
            id: self.id,
            address: self.address.clone(),
            capacity_bytes: self.capacity_bytes,
            used_bytes: self.used_bytes,
            last_updated_ms: self.last_updated_ms,
        }
    }
}

/// Worker-id indexed registry plus the address reverse index and the
/// lost-worker queue. All methods assume the caller holds the master's
/// workers lock.
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerInfo>,
    address_to_id: HashMap<NetAddress, WorkerId>,
    lost: VecDeque<WorkerInfo>,
    counter: AtomicI64,
    id_prefix: i64,
}

impl WorkerRegistry {
    /// Creates a registry whose ids are prefixed by the given master start
    /// time. Id 0 is never allocated.
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            workers: HashMap::new(),
            address_to_id: HashMap::new(),
            lost: VecDeque::with_capacity(LOST_WORKERS_CAPACITY),
            counter: AtomicI64::new(0),
            id_prefix: start_time_ms - start_time_ms % WORKER_ID_PREFIX_GRANULARITY_MS,
        }
    }

    /// Registers a worker. A prior registration under the same address is
    /// removed from both indices together and queued as lost so the
    /// liveness monitor cleans up its file locations.
    pub fn register(
        &mut self,
        address: NetAddress,
        capacity_bytes: i64,
        used_bytes: i64,
        current_files: &[InodeId],
        now_ms: i64,
    ) -> WorkerId {
        if let Some(old_id) = self.address_to_id.remove(&address) {
            if let Some(old_info) = self.workers.remove(&old_id) {
                warn!(
                    worker_id = old_id,
                    address = %address,
                    "worker re-registered, evicting previous record"
                );
                self.lost.push_back(old_info);
            }
        }

        let id = self.id_prefix + self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut info = WorkerInfo::new(id, address.clone(), capacity_bytes, now_ms);
        info.used_bytes = used_bytes;
        info.files = current_files.iter().copied().collect();
        self.workers.insert(id, info);
        self.address_to_id.insert(address, id);
        id
    }

    /// Looks up a worker by id.
    pub fn get(&self, id: WorkerId) -> Option<&WorkerInfo> {
        self.workers.get(&id)
    }

    /// Looks up a worker by id, mutably.
    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut WorkerInfo> {
        self.workers.get_mut(&id)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True if no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Sum of worker capacities.
    pub fn total_capacity_bytes(&self) -> i64 {
        self.workers.values().map(|w| w.capacity_bytes).sum()
    }

    /// Sum of worker used bytes.
    pub fn total_used_bytes(&self) -> i64 {
        self.workers.values().map(|w| w.used_bytes).sum()
    }

    /// Client projections of every registered worker.
    pub fn infos(&self) -> Vec<ClientWorkerInfo> {
        self.workers.values().map(WorkerInfo::client_info).collect()
    }

    /// Uniformly random worker address, if any worker is registered.
    pub fn pick_random(&self) -> Option<NetAddress> {
        let mut rng = rand::thread_rng();
        self.workers
            .values()
            .choose(&mut rng)
            .map(|w| w.address.clone())
    }

    /// Address of a worker whose host matches, if any.
    pub fn pick_local(&self, host: &str) -> Option<NetAddress> {
        self.workers
            .values()
            .find(|w| w.address.host == host)
            .map(|w| w.address.clone())
    }

    /// Moves every worker whose heartbeat is older than the timeout onto
    /// the lost queue. Returns how many timed out.
    pub fn sweep_timed_out(&mut self, now_ms: i64, timeout_ms: i64) -> usize {
        let timed_out: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| now_ms - w.last_updated_ms > timeout_ms)
            .map(|w| w.id)
            .collect();
        for id in &timed_out {
            if let Some(info) = self.workers.remove(id) {
                error!(worker_id = *id, address = %info.address, "worker timed out");
                self.address_to_id.remove(&info.address);
                self.lost.push_back(info);
            }
        }
        timed_out.len()
    }

    /// Drains the lost-worker queue.
    pub fn drain_lost(&mut self) -> Vec<WorkerInfo> {
        self.lost.drain(..).collect()
    }
}
