//! Cluster configuration as supplied by the CLI or a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::NodeKind;

/// Node image used when a group does not name one.
pub const DEFAULT_NODE_IMAGE: &str = "kindest/node:v1.13.2";

/// Cluster name used by the CLI when none is given.
pub const DEFAULT_CLUSTER_NAME: &str = "godays";

/// Role of a node group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl From<NodeRole> for NodeKind {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::ControlPlane => NodeKind::ControlPlaneNode,
            NodeRole::Worker => NodeKind::WorkerNode,
        }
    }
}

fn default_replicas() -> u32 {
    1
}

fn default_image() -> String {
    DEFAULT_NODE_IMAGE.to_string()
}

/// A set of identical nodes with one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    /// Resource id of the group (derived from the role when omitted)
    #[serde(default)]
    pub name: Option<String>,
    pub role: NodeRole,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default = "default_image")]
    pub image: String,
}

impl NodeGroup {
    pub fn control_plane(image: impl Into<String>) -> Self {
        Self {
            name: None,
            role: NodeRole::ControlPlane,
            replicas: 1,
            image: image.into(),
        }
    }

    pub fn workers(replicas: u32, image: impl Into<String>) -> Self {
        Self {
            name: None,
            role: NodeRole::Worker,
            replicas,
            image: image.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Declarative description of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeGroup>,
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>, nodes: Vec<NodeGroup>) -> Self {
        Self {
            name: name.into(),
            nodes,
        }
    }

    /// One single-replica control plane plus `workers` worker nodes.
    pub fn with_workers(name: impl Into<String>, workers: u32, image: &str) -> Self {
        Self::new(
            name,
            vec![
                NodeGroup::control_plane(image),
                NodeGroup::workers(workers, image),
            ],
        )
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse cluster config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Structural checks that do not depend on how groups map to resources.
    pub fn validate(&self) -> Result<()> {
        if !is_dns_label(&self.name) {
            return Err(Error::InvalidConfig(format!(
                "cluster name '{}' must be a lowercase DNS label (a-z, 0-9, '-', max 63 chars)",
                self.name
            )));
        }

        let control_planes: Vec<&NodeGroup> = self
            .nodes
            .iter()
            .filter(|g| g.role == NodeRole::ControlPlane)
            .collect();

        match control_planes.as_slice() {
            [cp] if cp.replicas == 1 => {}
            [cp] => {
                return Err(Error::InvalidConfig(format!(
                    "control-plane group must have exactly 1 replica, got {}",
                    cp.replicas
                )));
            }
            groups => {
                return Err(Error::InvalidConfig(format!(
                    "expected exactly one control-plane group, found {}",
                    groups.len()
                )));
            }
        }

        for group in &self.nodes {
            if group.image.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "node group {:?} has an empty image reference",
                    group.name.as_deref().unwrap_or(role_name(group.role))
                )));
            }
            if let Some(name) = &group.name
                && !is_dns_label(name)
            {
                return Err(Error::InvalidConfig(format!(
                    "node group name '{name}' must be a lowercase DNS label"
                )));
            }
        }

        Ok(())
    }
}

fn role_name(role: NodeRole) -> &'static str {
    NodeKind::from(role).as_str()
}

/// RFC 1123 label: lowercase alphanumerics and '-', not starting or ending with '-'.
pub(crate) fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_with_workers_default_topology() {
        let config = ClusterConfig::with_workers("godays", 2, DEFAULT_NODE_IMAGE);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].role, NodeRole::ControlPlane);
        assert_eq!(config.nodes[0].replicas, 1);
        assert_eq!(config.nodes[1].role, NodeRole::Worker);
        assert_eq!(config.nodes[1].replicas, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_defaults() {
        let config = ClusterConfig::from_json(
            r#"{
                "name": "dev",
                "nodes": [
                    { "role": "control_plane" },
                    { "role": "worker", "replicas": 3, "name": "pool-a" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "dev");
        assert_eq!(config.nodes[0].replicas, 1);
        assert_eq!(config.nodes[0].image, DEFAULT_NODE_IMAGE);
        assert_eq!(config.nodes[1].name.as_deref(), Some("pool-a"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = ClusterConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "name": "filecluster", "nodes": [{{ "role": "control_plane" }}] }}"#
        )
        .unwrap();

        let config = ClusterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name, "filecluster");
        assert_eq!(config.nodes.len(), 1);

        let missing = ClusterConfig::from_file("/nonexistent/cluster.json");
        assert!(matches!(missing, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_topologies() {
        let no_cp = ClusterConfig::new("c", vec![NodeGroup::workers(2, DEFAULT_NODE_IMAGE)]);
        assert!(no_cp.validate().is_err());

        let two_cp = ClusterConfig::new(
            "c",
            vec![
                NodeGroup::control_plane(DEFAULT_NODE_IMAGE),
                NodeGroup::control_plane(DEFAULT_NODE_IMAGE).named("cp2"),
            ],
        );
        assert!(two_cp.validate().is_err());

        let mut ha = ClusterConfig::with_workers("c", 1, DEFAULT_NODE_IMAGE);
        ha.nodes[0].replicas = 3;
        assert!(ha.validate().is_err());

        let empty_image = ClusterConfig::with_workers("c", 1, "  ");
        assert!(empty_image.validate().is_err());
    }

    #[test]
    fn test_validate_cluster_name() {
        assert!(ClusterConfig::with_workers("", 1, DEFAULT_NODE_IMAGE).validate().is_err());
        assert!(ClusterConfig::with_workers("Bad_Name", 1, DEFAULT_NODE_IMAGE).validate().is_err());
        assert!(ClusterConfig::with_workers("-edge", 1, DEFAULT_NODE_IMAGE).validate().is_err());
        assert!(ClusterConfig::with_workers("ok-123", 1, DEFAULT_NODE_IMAGE).validate().is_ok());
    }
}
