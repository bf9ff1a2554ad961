//! The lineage dependency record: the command that produced a set of
//! child files from a set of parent files. Dependencies are created with
//! their children and never deleted; they remain available for
//! recomputing descendants.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::{ClientDependencyInfo, DependencyId, InodeId};

/// Shape of a dependency in the lineage DAG.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyType {
    /// Each child partition depends on a bounded set of parent partitions.
    Narrow,
    /// Children depend on all parents (a shuffle).
    Wide,
}

/// A recorded lineage edge set plus the command to replay it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependency id.
    pub id: DependencyId,
    /// Input file ids, in the order the client supplied them.
    pub parent_files: Vec<InodeId>,
    /// Output file ids, in the order the client supplied them.
    pub child_files: Vec<InodeId>,
    /// Command to re-run to regenerate the children.
    pub command_prefix: String,
    /// Opaque per-dependency payloads.
    pub data: Vec<Vec<u8>>,
    /// Free-form client comment.
    pub comment: String,
    /// Producing framework name.
    pub framework: String,
    /// Producing framework version.
    pub framework_version: String,
    /// Narrow or wide.
    pub dependency_type: DependencyType,
    /// Creation time in milliseconds since the epoch.
    pub creation_time_ms: i64,
    /// Dependency ids of the parent files, including
    /// [`crate::types::NO_DEPENDENCY`] for independent parents.
    pub parent_dependencies: HashSet<DependencyId>,
    /// Dependencies whose parents include a child of this one. Rebuilt
    /// from parent links on recovery.
    #[serde(skip)]
    pub children_dependencies: HashSet<DependencyId>,
    /// Children not yet checkpointed. The dependency is checkpointed when
    /// this set drains.
    pub unfinished_children: HashSet<InodeId>,
    /// Children currently lost from worker memory. Runtime state.
    #[serde(skip)]
    pub lost_files: HashSet<InodeId>,
}

impl Dependency {
    /// Creates a dependency over resolved parent and child file ids. All
    /// children start unfinished; the caller marks the already-checkpointed
    /// ones with [`Dependency::child_checkpointed`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: DependencyId,
        parent_files: Vec<InodeId>,
        child_files: Vec<InodeId>,
        command_prefix: String,
        data: Vec<Vec<u8>>,
        comment: String,
        framework: String,
        framework_version: String,
        dependency_type: DependencyType,
        parent_dependencies: HashSet<DependencyId>,
        now_ms: i64,
    ) -> Self {
        let unfinished_children = child_files.iter().copied().collect();
        Self {
            id,
            parent_files,
            child_files,
            command_prefix,
            data,
            comment,
            framework,
            framework_version,
            dependency_type,
            creation_time_ms: now_ms,
            parent_dependencies,
            children_dependencies: HashSet::new(),
            unfinished_children,
            lost_files: HashSet::new(),
        }
    }

    /// Marks one child as checkpointed.
    pub fn child_checkpointed(&mut self, file_id: InodeId) {
        self.unfinished_children.remove(&file_id);
    }

    /// True once every child has a checkpoint.
    pub fn is_checkpointed(&self) -> bool {
        self.unfinished_children.is_empty()
    }

    /// True if any later dependency consumes a child of this one.
    pub fn has_children_dependencies(&self) -> bool {
        !self.children_dependencies.is_empty()
    }

    /// Records that a child file lost its last in-memory copy.
    pub fn add_lost_file(&mut self, file_id: InodeId) {
        self.lost_files.insert(file_id);
    }

    /// The command to launch for recomputation.
    pub fn command(&self) -> &str {
        &self.command_prefix
    }

    /// Client projection of this dependency.
    pub fn client_info(&self) -> ClientDependencyInfo {
        ClientDependencyInfo {
            id: self.id,
            parents: self.parent_files.clone(),
            children: self.child_files.clone(),
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_DEPENDENCY;

    fn make_dep(children: &[InodeId]) -> Dependency {
        Dependency::new(
            1,
            vec![10],
            children.to_vec(),
            "prog --out /c".to_string(),
            Vec::new(),
            String::new(),
            "fw".to_string(),
            "1".to_string(),
            DependencyType::Narrow,
            [NO_DEPENDENCY].into_iter().collect(),
            1000,
        )
    }

    #[test]
    fn test_new_children_start_unfinished() {
        let dep = make_dep(&[20, 21]);
        assert!(!dep.is_checkpointed());
        assert_eq!(dep.unfinished_children.len(), 2);
    }

    #[test]
    fn test_checkpointed_when_all_children_done() {
        let mut dep = make_dep(&[20, 21]);
        dep.child_checkpointed(20);
        assert!(!dep.is_checkpointed());
        dep.child_checkpointed(21);
        assert!(dep.is_checkpointed());
        // idempotent
        dep.child_checkpointed(21);
        assert!(dep.is_checkpointed());
    }

    #[test]
    fn test_no_children_means_checkpointed() {
        let dep = make_dep(&[]);
        assert!(dep.is_checkpointed());
    }

    #[test]
    fn test_lost_files_tracking() {
        let mut dep = make_dep(&[20]);
        dep.add_lost_file(20);
        dep.add_lost_file(20);
        assert_eq!(dep.lost_files.len(), 1);
    }

    #[test]
    fn test_client_info_projection() {
        let dep = make_dep(&[20, 21]);
        let info = dep.client_info();
        assert_eq!(info.id, 1);
        assert_eq!(info.parents, vec![10]);
        assert_eq!(info.children, vec![20, 21]);
    }

    #[test]
    fn test_serde_skips_runtime_sets() {
        let mut dep = make_dep(&[20]);
        dep.children_dependencies.insert(9);
        dep.add_lost_file(20);
        let encoded = bincode::serialize(&dep).unwrap();
        let decoded: Dependency = bincode::deserialize(&encoded).unwrap();
        assert!(decoded.children_dependencies.is_empty());
        assert!(decoded.lost_files.is_empty());
        assert_eq!(decoded.unfinished_children, dep.unfinished_children);
    }
}
