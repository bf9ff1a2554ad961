//! The dependency graph and its bookkeeping sets: uncheckpointed and
//! priority dependencies, lost and being-recomputed files, and the set of
//! dependencies that must be recomputed. All methods assume the caller
//! holds the master's dependency lock.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::dependency::Dependency;
use crate::types::{DependencyId, InodeId};

/// Lineage DAG plus recovery bookkeeping. The DAG is represented as an id
/// map with adjacency sets of ids, never as shared ownership references.
pub struct DependencyGraph {
    deps: HashMap<DependencyId, Dependency>,
    pub(crate) uncheckpointed: HashSet<DependencyId>,
    pub(crate) priority: HashSet<DependencyId>,
    pub(crate) lost_files: HashSet<InodeId>,
    pub(crate) being_recomputed: HashSet<InodeId>,
    pub(crate) must_recompute: HashSet<DependencyId>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            deps: HashMap::new(),
            uncheckpointed: HashSet::new(),
            priority: HashSet::new(),
            lost_files: HashSet::new(),
            being_recomputed: HashSet::new(),
            must_recompute: HashSet::new(),
        }
    }

    /// Installs a dependency: indexes it, registers it as a child of each
    /// parent dependency present in the map, and tracks it as
    /// uncheckpointed when children remain unfinished. Used for both live
    /// creation and journal replay.
    pub fn insert(&mut self, dep: Dependency) {
        let id = dep.id;
        if !dep.is_checkpointed() {
            self.uncheckpointed.insert(id);
        }
        for parent_dep in dep.parent_dependencies.iter() {
            if let Some(parent) = self.deps.get_mut(parent_dep) {
                parent.children_dependencies.insert(id);
            }
        }
        self.deps.insert(id, dep);
    }

    /// Looks up a dependency.
    pub fn get(&self, id: DependencyId) -> Option<&Dependency> {
        self.deps.get(&id)
    }

    /// Looks up a dependency mutably.
    pub fn get_mut(&mut self, id: DependencyId) -> Option<&mut Dependency> {
        self.deps.get_mut(&id)
    }

    /// True if the id is known.
    pub fn contains(&self, id: DependencyId) -> bool {
        self.deps.contains_key(&id)
    }

    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// True if no dependency has been recorded.
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// All dependencies ordered by id, the order the checkpoint writer
    /// persists them in.
    pub fn iter_sorted(&self) -> Vec<&Dependency> {
        let mut deps: Vec<&Dependency> = self.deps.values().collect();
        deps.sort_by_key(|d| d.id);
        deps
    }

    /// Clears lost and being-recomputed state for a file that came back
    /// into worker memory or gained a checkpoint.
    pub fn file_recovered(&mut self, file_id: InodeId) {
        self.lost_files.remove(&file_id);
        self.being_recomputed.remove(&file_id);
    }

    /// Marks a dependency fully checkpointed: it is no longer tracked as
    /// uncheckpointed nor offered for priority checkpointing.
    pub fn mark_checkpointed(&mut self, id: DependencyId) {
        self.uncheckpointed.remove(&id);
        self.priority.remove(&id);
    }

    /// Returns the dependencies currently preferred for proactive
    /// checkpointing. When the cached set is empty it is rebuilt from the
    /// uncheckpointed set: leaves of the lineage DAG first, falling back to
    /// the single oldest uncheckpointed dependency.
    pub fn priority_list(&mut self) -> Vec<DependencyId> {
        if self.priority.is_empty() {
            let mut earliest = i64::MAX;
            let mut earliest_id = None;
            for dep_id in &self.uncheckpointed {
                let Some(dep) = self.deps.get(dep_id) else {
                    continue;
                };
                if !dep.has_children_dependencies() {
                    self.priority.insert(*dep_id);
                }
                if dep.creation_time_ms < earliest {
                    earliest = dep.creation_time_ms;
                    earliest_id = Some(*dep_id);
                }
            }
            if self.priority.is_empty() {
                if let Some(id) = earliest_id {
                    self.priority.insert(id);
                }
            }
        }
        self.priority.iter().copied().collect()
    }

    /// Finds the dependencies in `must_recompute` whose parent files are
    /// all available (present, or already under recomputation). While
    /// scanning, any lost parent produced by a dependency not yet queued
    /// cascades that ancestor into `must_recompute` and the scan.
    ///
    /// `dependency_of` maps a file id to its producing dependency, if any.
    pub fn plan_recomputation<F>(&mut self, dependency_of: F) -> Vec<DependencyId>
    where
        F: Fn(InodeId) -> Option<DependencyId>,
    {
        let mut launchable = Vec::new();
        let mut queue: VecDeque<DependencyId> = self.must_recompute.iter().copied().collect();
        while let Some(dep_id) = queue.pop_front() {
            let Some(dep) = self.deps.get(&dep_id) else {
                continue;
            };
            let mut can_launch = true;
            for parent_file in &dep.parent_files {
                if self.lost_files.contains(parent_file) {
                    can_launch = false;
                    if !self.being_recomputed.contains(parent_file) {
                        if let Some(ancestor) = dependency_of(*parent_file) {
                            if !self.must_recompute.contains(&ancestor) {
                                debug!(
                                    dependency_id = ancestor,
                                    "cascading recomputation to ancestor"
                                );
                                self.must_recompute.insert(ancestor);
                                queue.push_back(ancestor);
                            }
                        }
                    }
                }
            }
            if can_launch {
                launchable.push(dep_id);
            }
        }
        launchable
    }

    /// Transitions a planned dependency into the launched state: it leaves
    /// `must_recompute` and its lost files move from `lost_files` to
    /// `being_recomputed` (under recovery, not currently lost).
    pub fn mark_launched(&mut self, id: DependencyId) {
        self.must_recompute.remove(&id);
        let lost: Vec<InodeId> = self
            .deps
            .get(&id)
            .map(|d| d.lost_files.iter().copied().collect())
            .unwrap_or_default();
        for file_id in lost {
            self.lost_files.remove(&file_id);
            self.being_recomputed.insert(file_id);
        }
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
