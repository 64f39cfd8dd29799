//! Cluster data model: resource specs and cluster state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of node resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    ControlPlaneNode,
    WorkerNode,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::ControlPlaneNode => "control-plane",
            NodeKind::WorkerNode => "worker",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control-plane" => Ok(NodeKind::ControlPlaneNode),
            "worker" => Ok(NodeKind::WorkerNode),
            other => Err(Error::InvalidConfig(format!("unknown node kind: {other}"))),
        }
    }
}

/// A group of identical nodes, identified within its cluster by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub id: String,
    pub kind: NodeKind,
    pub replicas: u32,
    pub image: String,
}

impl ResourceSpec {
    pub fn new(id: impl Into<String>, kind: NodeKind, replicas: u32, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            replicas,
            image: image.into(),
        }
    }

    /// Single-replica control-plane node.
    pub fn control_plane(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self::new(id, NodeKind::ControlPlaneNode, 1, image)
    }

    pub fn worker(id: impl Into<String>, replicas: u32, image: impl Into<String>) -> Self {
        Self::new(id, NodeKind::WorkerNode, replicas, image)
    }

    pub fn is_control_plane(&self) -> bool {
        self.kind == NodeKind::ControlPlaneNode
    }
}

/// Lifecycle status of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Pending,
    Provisioning,
    Ready,
    Deleting,
    Deleted,
    Failed,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Pending => "pending",
            ClusterStatus::Provisioning => "provisioning",
            ClusterStatus::Ready => "ready",
            ClusterStatus::Deleting => "deleting",
            ClusterStatus::Deleted => "deleted",
            ClusterStatus::Failed => "failed",
        }
    }

    /// Whether the lifecycle state machine allows moving from `self` to `next`.
    ///
    /// Provisioning and Deleting may be re-entered or swapped: a call that
    /// hit its deadline leaves the cluster there for a later create or
    /// delete. A Deleted cluster can be deleted again when nodes reappear.
    pub fn can_transition_to(self, next: ClusterStatus) -> bool {
        use ClusterStatus::*;
        match (self, next) {
            (_, Failed) => self != Deleted,
            (Pending, Provisioning | Deleting) => true,
            (Provisioning, Provisioning | Ready | Deleting) => true,
            (Ready, Provisioning | Deleting) => true,
            (Deleting, Provisioning | Deleting | Deleted) => true,
            (Deleted, Pending | Deleting) => true,
            (Failed, Provisioning | Deleting) => true,
            _ => false,
        }
    }

    /// Whether a reconcile is (or was left) in flight.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, ClusterStatus::Provisioning | ClusterStatus::Deleting)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of resources belonging to one cluster, plus its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub cluster_id: String,
    pub resources: Vec<ResourceSpec>,
    pub status: ClusterStatus,
}

impl ClusterState {
    pub fn new(cluster_id: impl Into<String>, resources: Vec<ResourceSpec>, status: ClusterStatus) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            resources,
            status,
        }
    }

    /// A cluster with no resources yet.
    pub fn empty(cluster_id: impl Into<String>) -> Self {
        Self::new(cluster_id, Vec::new(), ClusterStatus::Pending)
    }

    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn ids(&self) -> BTreeSet<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }

    /// Map from resource id to spec.
    pub fn index(&self) -> BTreeMap<&str, &ResourceSpec> {
        self.resources.iter().map(|r| (r.id.as_str(), r)).collect()
    }

    pub fn control_planes(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.iter().filter(|r| r.is_control_plane())
    }

    /// Total node count across all resources.
    pub fn total_replicas(&self) -> u64 {
        self.resources.iter().map(|r| u64::from(r.replicas)).sum()
    }

    /// Insert a spec, replacing any existing one with the same id in place.
    pub fn upsert(&mut self, spec: ResourceSpec) {
        match self.resources.iter_mut().find(|r| r.id == spec.id) {
            Some(existing) => *existing = spec,
            None => self.resources.push(spec),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<ResourceSpec> {
        let pos = self.resources.iter().position(|r| r.id == id)?;
        Some(self.resources.remove(pos))
    }

    /// Check ids are unique and a non-empty cluster has exactly one control plane.
    pub fn validate_topology(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for r in &self.resources {
            if !seen.insert(r.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate resource id '{}' in cluster {}",
                    r.id, self.cluster_id
                )));
            }
        }

        if self.is_empty() {
            return Ok(());
        }

        match self.control_planes().count() {
            1 => Ok(()),
            n => Err(Error::InvalidConfig(format!(
                "cluster {} must have exactly one control-plane node, found {}",
                self.cluster_id, n
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str = "kindest/node:v1.13.2";

    #[test]
    fn test_upsert_and_remove() {
        let mut state = ClusterState::empty("c1");
        state.upsert(ResourceSpec::control_plane("cp", IMAGE));
        state.upsert(ResourceSpec::worker("w", 1, IMAGE));
        state.upsert(ResourceSpec::worker("w", 3, IMAGE));

        assert_eq!(state.resources.len(), 2);
        assert_eq!(state.get("w").map(|r| r.replicas), Some(3));
        assert_eq!(state.total_replicas(), 4);

        let removed = state.remove("cp").unwrap();
        assert!(removed.is_control_plane());
        assert!(state.remove("cp").is_none());
        assert_eq!(state.ids().into_iter().collect::<Vec<_>>(), vec!["w"]);
    }

    #[test]
    fn test_validate_topology() {
        let empty = ClusterState::empty("c1");
        assert!(empty.validate_topology().is_ok());

        let workers_only = ClusterState::new(
            "c1",
            vec![ResourceSpec::worker("w", 2, IMAGE)],
            ClusterStatus::Pending,
        );
        assert!(matches!(
            workers_only.validate_topology(),
            Err(Error::InvalidConfig(_))
        ));

        let duplicate = ClusterState::new(
            "c1",
            vec![
                ResourceSpec::control_plane("n", IMAGE),
                ResourceSpec::worker("n", 1, IMAGE),
            ],
            ClusterStatus::Pending,
        );
        assert!(duplicate.validate_topology().is_err());

        let valid = ClusterState::new(
            "c1",
            vec![
                ResourceSpec::control_plane("cp", IMAGE),
                ResourceSpec::worker("w", 0, IMAGE),
            ],
            ClusterStatus::Pending,
        );
        assert!(valid.validate_topology().is_ok());
    }

    #[test]
    fn test_status_transitions() {
        use ClusterStatus::*;

        assert!(Pending.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Deleting));
        assert!(Deleting.can_transition_to(Deleted));
        assert!(Provisioning.can_transition_to(Provisioning));
        assert!(Ready.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Provisioning));
        assert!(Deleted.can_transition_to(Pending));
        assert!(Deleted.can_transition_to(Deleting));
        assert!(Deleting.can_transition_to(Provisioning));

        assert!(!Pending.can_transition_to(Ready));
        assert!(!Deleted.can_transition_to(Failed));
        assert!(!Deleted.can_transition_to(Provisioning));
        assert!(!Ready.can_transition_to(Deleted));
    }

    #[test]
    fn test_node_kind_roundtrip_labels() {
        for kind in [NodeKind::ControlPlaneNode, NodeKind::WorkerNode] {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        assert!("etcd".parse::<NodeKind>().is_err());
    }
}
