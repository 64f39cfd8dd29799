//! Node container naming, labels and `docker ps` parsing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use mcluster_core::{ClusterState, ClusterStatus, NodeKind, ResourceSpec};

use crate::error::DockerError;

pub const LABEL_CLUSTER: &str = "io.mcluster.cluster";
pub const LABEL_RESOURCE: &str = "io.mcluster.resource";
pub const LABEL_ROLE: &str = "io.mcluster.role";
pub const LABEL_REPLICA: &str = "io.mcluster.replica";
pub const LABEL_IMAGE: &str = "io.mcluster.image";

/// `docker ps --format` template matching [`NodeContainer::parse_ps_line`].
pub const PS_FORMAT: &str = "{{.Names}}\t{{.State}}\t{{.Labels}}";

/// Suffix of a replacement container started next to the one it replaces.
pub const STAGING_SUFFIX: &str = ".next";

/// Container name of one replica. Replica indices start at 1.
///
/// Cluster names and resource ids are DNS labels, so `.` cannot occur in
/// them and names of different clusters never collide.
pub fn container_name(cluster_id: &str, resource_id: &str, replica: u32) -> String {
    format!("{cluster_id}.{resource_id}.{replica}")
}

/// Whether a cluster name or resource id can be embedded in container names.
pub fn is_valid_name_part(part: &str) -> bool {
    !part.is_empty() && !part.contains('.')
}

/// kubectl context name, kind style.
pub fn context_name(cluster_id: &str) -> String {
    format!("kind-{cluster_id}")
}

/// One running (or stopped) node container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContainer {
    pub name: String,
    pub cluster: String,
    pub resource: String,
    pub kind: NodeKind,
    pub replica: u32,
    pub image: String,
    pub running: bool,
}

impl NodeContainer {
    pub fn new(cluster_id: &str, spec: &ResourceSpec, replica: u32) -> Self {
        Self {
            name: container_name(cluster_id, &spec.id, replica),
            cluster: cluster_id.to_string(),
            resource: spec.id.clone(),
            kind: spec.kind,
            replica,
            image: spec.image.clone(),
            running: false,
        }
    }

    /// Host name inside the container.
    pub fn hostname(&self) -> String {
        format!("{}-{}-{}", self.cluster, self.resource, self.replica)
    }

    /// This node under its staging name.
    pub fn staged(&self) -> Self {
        Self {
            name: format!("{}{STAGING_SUFFIX}", self.name),
            ..self.clone()
        }
    }

    /// Whether this is a replacement that has not been swapped in yet.
    pub fn is_staging(&self) -> bool {
        self.name.ends_with(STAGING_SUFFIX)
    }

    /// `--label` arguments identifying this container.
    pub fn label_args(&self) -> Vec<String> {
        [
            (LABEL_CLUSTER, self.cluster.clone()),
            (LABEL_RESOURCE, self.resource.clone()),
            (LABEL_ROLE, self.kind.to_string()),
            (LABEL_REPLICA, self.replica.to_string()),
            (LABEL_IMAGE, self.image.clone()),
        ]
        .into_iter()
        .flat_map(|(k, v)| ["--label".to_string(), format!("{k}={v}")])
        .collect()
    }

    /// Parse one line of `docker ps --format` output using [`PS_FORMAT`].
    pub fn parse_ps_line(line: &str) -> Result<Self, DockerError> {
        let mut parts = line.splitn(3, '\t');
        let (Some(name), Some(state), Some(labels)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DockerError::Parse(format!("malformed ps line: {line}")));
        };

        let labels: HashMap<&str, &str> = labels
            .split(',')
            .filter_map(|kv| kv.split_once('='))
            .collect();
        let label = |key: &str| {
            labels
                .get(key)
                .map(|v| v.to_string())
                .ok_or_else(|| DockerError::Parse(format!("container {name} lacks label {key}")))
        };

        let kind = label(LABEL_ROLE)?
            .parse::<NodeKind>()
            .map_err(|e| DockerError::Parse(format!("container {name}: {e}")))?;
        let replica = label(LABEL_REPLICA)?
            .parse::<u32>()
            .map_err(|e| DockerError::Parse(format!("container {name}: bad replica index: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            cluster: label(LABEL_CLUSTER)?,
            resource: label(LABEL_RESOURCE)?,
            kind,
            replica,
            image: label(LABEL_IMAGE)?,
            running: state.trim() == "running",
        })
    }
}

/// Parse full `docker ps` output, skipping blank lines.
pub fn parse_ps(output: &str) -> Result<Vec<NodeContainer>, DockerError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(NodeContainer::parse_ps_line)
        .collect()
}

/// Rebuild a cluster state from its node containers.
///
/// When the replicas of a resource disagree on the image (an image change
/// that stopped part way), the highest replica's image is reported.
/// Recreation goes in ascending replica order, so that is the old image and
/// the next reconcile finishes the change. A staging container counts
/// towards its replica but never doubles it.
pub fn fold_state(cluster_id: &str, containers: &[NodeContainer]) -> ClusterState {
    if containers.is_empty() {
        return ClusterState::empty(cluster_id);
    }

    let mut by_resource: BTreeMap<&str, Vec<&NodeContainer>> = BTreeMap::new();
    for c in containers {
        by_resource.entry(c.resource.as_str()).or_default().push(c);
    }

    let mut resources: Vec<ResourceSpec> = by_resource
        .into_iter()
        .filter_map(|(id, mut nodes)| {
            nodes.sort_by_key(|n| (n.replica, n.is_staging()));
            let top = nodes.last()?.replica;
            let last = nodes.iter().find(|n| n.replica == top)?;
            let replicas = nodes.iter().map(|n| n.replica).collect::<BTreeSet<_>>().len();
            Some(ResourceSpec::new(
                id,
                last.kind,
                replicas as u32,
                last.image.clone(),
            ))
        })
        .collect();
    resources.sort_by_key(|r| !r.is_control_plane());

    let status = if containers.iter().all(|c| c.running) {
        ClusterStatus::Ready
    } else {
        ClusterStatus::Provisioning
    };

    ClusterState::new(cluster_id, resources, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str = "kindest/node:v1.13.2";

    fn ps_line(name: &str, state: &str, resource: &str, role: &str, replica: u32, image: &str) -> String {
        format!(
            "{name}\t{state}\t{LABEL_CLUSTER}=godays,{LABEL_IMAGE}={image},{LABEL_REPLICA}={replica},{LABEL_RESOURCE}={resource},{LABEL_ROLE}={role}"
        )
    }

    #[test]
    fn test_parse_ps_line() {
        let line = ps_line("godays.worker.2", "running", "worker", "worker", 2, IMAGE);
        let node = NodeContainer::parse_ps_line(&line).unwrap();

        assert_eq!(node.name, "godays.worker.2");
        assert_eq!(node.cluster, "godays");
        assert_eq!(node.resource, "worker");
        assert_eq!(node.kind, NodeKind::WorkerNode);
        assert_eq!(node.replica, 2);
        assert_eq!(node.image, IMAGE);
        assert!(node.running);
    }

    #[test]
    fn test_parse_ps_rejects_foreign_containers() {
        assert!(NodeContainer::parse_ps_line("just-a-name").is_err());
        assert!(NodeContainer::parse_ps_line("web\trunning\tcom.example=1").is_err());
    }

    #[test]
    fn test_label_args_roundtrip_through_ps() {
        let spec = ResourceSpec::control_plane("control-plane", IMAGE);
        let node = NodeContainer::new("godays", &spec, 1);
        let args = node.label_args();
        assert_eq!(args.len(), 10);
        assert_eq!(args[0], "--label");
        assert_eq!(args[1], "io.mcluster.cluster=godays");

        let labels: Vec<&str> = args.iter().skip(1).step_by(2).map(String::as_str).collect();
        let line = format!("{}\texited\t{}", node.name, labels.join(","));
        let parsed = NodeContainer::parse_ps_line(&line).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_fold_state() {
        let output = [
            ps_line("godays.worker.1", "running", "worker", "worker", 1, IMAGE),
            ps_line("godays.control-plane.1", "running", "control-plane", "control-plane", 1, IMAGE),
            ps_line("godays.worker.2", "created", "worker", "worker", 2, IMAGE),
            String::new(),
        ]
        .join("\n");

        let containers = parse_ps(&output).unwrap();
        let state = fold_state("godays", &containers);

        assert_eq!(state.status, ClusterStatus::Provisioning);
        assert_eq!(
            state.resources,
            vec![
                ResourceSpec::control_plane("control-plane", IMAGE),
                ResourceSpec::worker("worker", 2, IMAGE),
            ]
        );
    }

    #[test]
    fn test_fold_state_reports_unfinished_image_change() {
        let containers = parse_ps(
            &[
                ps_line("godays.worker.1", "running", "worker", "worker", 1, "kindest/node:v1.14.0"),
                ps_line("godays.worker.2", "running", "worker", "worker", 2, IMAGE),
            ]
            .join("\n"),
        )
        .unwrap();

        let state = fold_state("godays", &containers);
        assert_eq!(state.status, ClusterStatus::Ready);
        assert_eq!(state.get("worker").unwrap().image, IMAGE);
    }

    #[test]
    fn test_fold_empty_is_pending() {
        let state = fold_state("godays", &[]);
        assert!(state.is_empty());
        assert_eq!(state.status, ClusterStatus::Pending);
    }

    #[test]
    fn test_names() {
        assert_eq!(container_name("godays", "worker", 3), "godays.worker.3");
        assert_eq!(context_name("godays"), "kind-godays");

        // Hyphenated cluster and resource names stay apart.
        assert_ne!(container_name("a-b", "c", 1), container_name("a", "b-c", 1));
        assert!(is_valid_name_part("worker-2"));
        assert!(!is_valid_name_part("a.b"));
        assert!(!is_valid_name_part(""));

        let node = NodeContainer::new("godays", &ResourceSpec::worker("worker", 1, IMAGE), 1);
        assert_eq!(node.hostname(), "godays-worker-1");
        let staged = node.staged();
        assert_eq!(staged.name, "godays.worker.1.next");
        assert!(staged.is_staging());
        assert!(!node.is_staging());
    }

    #[test]
    fn test_fold_state_counts_staging_container_once() {
        let containers = parse_ps(
            &[
                ps_line("godays.control-plane.1", "running", "control-plane", "control-plane", 1, IMAGE),
                ps_line("godays.control-plane.1.next", "running", "control-plane", "control-plane", 1, "kindest/node:v1.14.0"),
            ]
            .join("\n"),
        )
        .unwrap();

        let state = fold_state("godays", &containers);
        assert_eq!(
            state.resources,
            vec![ResourceSpec::control_plane("control-plane", IMAGE)]
        );
    }
}
