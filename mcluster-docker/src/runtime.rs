//! Docker-backed environment: inspects and mutates node containers.

use std::slice;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcluster_core::{Actuator, ClusterState, Error, Field, ResourceSpec, StateInspector, Update};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::cli::{DockerCli, Runner};
use crate::error::DockerError;
use crate::node::{
    LABEL_CLUSTER, LABEL_RESOURCE, NodeContainer, PS_FORMAT, STAGING_SUFFIX, fold_state,
    is_valid_name_part, parse_ps,
};

/// How long `wait_ready` polls before giving up.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Environment running cluster nodes as docker containers.
pub struct DockerEnvironment {
    runner: Arc<dyn Runner>,
    ready_timeout: Duration,
    poll_interval: Duration,
}

impl DockerEnvironment {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self {
            runner,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Environment using the docker binary found in `PATH`.
    pub fn with_cli(binary: &str) -> Self {
        Self::new(Arc::new(DockerCli::new(binary)))
    }

    pub fn with_ready_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.ready_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    async fn docker(&self, args: &[&str]) -> Result<String, DockerError> {
        self.runner
            .run(args.iter().map(|a| a.to_string()).collect())
            .await
    }

    /// All node containers of a cluster, optionally only one resource.
    async fn list(&self, cluster_id: &str, resource: Option<&str>) -> Result<Vec<NodeContainer>, DockerError> {
        let cluster_filter = format!("label={LABEL_CLUSTER}={cluster_id}");
        let mut args = vec!["ps", "-a", "--filter", cluster_filter.as_str()];

        let resource_filter = resource.map(|r| format!("label={LABEL_RESOURCE}={r}"));
        if let Some(filter) = &resource_filter {
            args.extend(["--filter", filter.as_str()]);
        }
        args.extend(["--format", PS_FORMAT]);

        let output = self.docker(&args).await?;
        let mut nodes = parse_ps(&output)?;
        nodes.sort_by_key(|n| (n.replica, n.is_staging()));
        Ok(nodes)
    }

    async fn run_node(&self, node: &NodeContainer) -> Result<(), DockerError> {
        info!(container = %node.name, image = %node.image, "Starting node container");

        let mut args: Vec<String> = [
            "run",
            "-d",
            "--privileged",
            "--security-opt",
            "seccomp=unconfined",
            "--tmpfs",
            "/tmp",
            "--tmpfs",
            "/run",
            "--volume",
            "/var",
            "--volume",
            "/lib/modules:/lib/modules:ro",
            "--restart",
            "on-failure:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(["--name".to_string(), node.name.clone()]);
        args.extend(["--hostname".to_string(), node.hostname()]);
        args.extend(node.label_args());
        args.push(node.image.clone());

        self.runner.run(args).await?;
        Ok(())
    }

    async fn remove_nodes(&self, nodes: &[NodeContainer]) -> Result<(), DockerError> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm", "-f", "-v"];
        args.extend(nodes.iter().map(|n| n.name.as_str()));
        debug!("Removing {} node containers", nodes.len());
        self.docker(&args).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), DockerError> {
        self.docker(&["rename", from, to]).await?;
        Ok(())
    }

    /// Start replicas `from..=to` of a spec.
    async fn start_replicas(&self, cluster_id: &str, spec: &ResourceSpec, from: u32, to: u32) -> Result<(), DockerError> {
        for replica in from..=to {
            self.run_node(&NodeContainer::new(cluster_id, spec, replica))
                .await?;
        }
        Ok(())
    }

    /// Whether every named container reports running.
    async fn all_running(&self, names: &[&str]) -> Result<bool, DockerError> {
        let mut args = vec!["inspect", "-f", "{{.State.Running}}"];
        args.extend(names);
        let output = self.docker(&args).await?;
        Ok(output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .all(|l| l.trim() == "true"))
    }

    /// Poll until every named container runs. `false` once the ready timeout passes.
    async fn wait_running(&self, names: &[&str]) -> Result<bool, DockerError> {
        let deadline = Instant::now() + self.ready_timeout;

        loop {
            if self.all_running(names).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Replace `old` by `replacement` without a moment in which the replica
    /// is missing: the replacement starts under its staging name and is only
    /// swapped in once it runs. `old` stays untouched when it does not.
    async fn swap_in(&self, old: &NodeContainer, replacement: &NodeContainer) -> mcluster_core::Result<()> {
        let staged = replacement.staged();
        self.run_node(&staged).await?;

        if !self.wait_running(&[staged.name.as_str()]).await? {
            warn!(container = %staged.name, "Replacement not running after {:?}, keeping {}", self.ready_timeout, old.name);
            self.remove_nodes(slice::from_ref(&staged)).await?;
            return Err(Error::Environment(format!(
                "replacement node {} did not start, keeping {}",
                replacement.name, old.name
            )));
        }

        self.remove_nodes(slice::from_ref(old)).await?;
        self.rename(&staged.name, &replacement.name).await?;
        Ok(())
    }

    /// Deal with staging containers left by an interrupted swap: finish the
    /// swap when the original is gone, drop the staging copy otherwise.
    async fn settle_staging(&self, nodes: Vec<NodeContainer>) -> Result<Vec<NodeContainer>, DockerError> {
        let (staging, mut settled): (Vec<_>, Vec<_>) =
            nodes.into_iter().partition(|n| n.is_staging());

        for node in staging {
            if settled.iter().any(|n| n.replica == node.replica) {
                self.remove_nodes(slice::from_ref(&node)).await?;
            } else {
                let name = node.name.trim_end_matches(STAGING_SUFFIX).to_string();
                self.rename(&node.name, &name).await?;
                settled.push(NodeContainer { name, ..node });
            }
        }

        settled.sort_by_key(|n| n.replica);
        Ok(settled)
    }
}

fn check_names(cluster_id: &str, resource_id: &str) -> mcluster_core::Result<()> {
    for part in [cluster_id, resource_id] {
        if !is_valid_name_part(part) {
            return Err(Error::InvalidConfig(format!(
                "{part:?} cannot be used in a node container name"
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl StateInspector for DockerEnvironment {
    async fn actual(&self, cluster_id: &str) -> mcluster_core::Result<ClusterState> {
        let nodes = self.list(cluster_id, None).await?;
        Ok(fold_state(cluster_id, &nodes))
    }
}

#[async_trait]
impl Actuator for DockerEnvironment {
    async fn create(&self, cluster_id: &str, spec: &ResourceSpec) -> mcluster_core::Result<()> {
        check_names(cluster_id, &spec.id)?;
        self.start_replicas(cluster_id, spec, 1, spec.replicas).await?;
        Ok(())
    }

    /// Control-plane containers are swapped in one replica at a time, so a
    /// replacement that fails to start leaves the old node running.
    async fn update(&self, cluster_id: &str, update: &Update) -> mcluster_core::Result<()> {
        check_names(cluster_id, &update.id)?;
        let listed = self.list(cluster_id, Some(&update.id)).await?;
        let current = self.settle_staging(listed).await?;
        let target = &update.spec;

        // Labels and images are fixed at container creation: recreate.
        if update.changes_field(Field::Image) || update.changes_field(Field::Kind) {
            info!(cluster = %cluster_id, resource = %update.id, "Recreating node containers");
            let keep_running = update.previous.is_control_plane() || target.is_control_plane();

            for node in &current {
                if node.replica > target.replicas {
                    self.remove_nodes(slice::from_ref(node)).await?;
                    continue;
                }
                let replacement = NodeContainer::new(cluster_id, target, node.replica);
                if keep_running {
                    self.swap_in(node, &replacement).await?;
                } else {
                    self.remove_nodes(slice::from_ref(node)).await?;
                    self.run_node(&replacement).await?;
                }
            }
        } else {
            // Drop replicas past the target count, highest index first.
            let surplus: Vec<NodeContainer> = current
                .iter()
                .filter(|n| n.replica > target.replicas)
                .rev()
                .cloned()
                .collect();
            self.remove_nodes(&surplus).await?;
        }

        // Fill any gaps up to the target count.
        let remaining = self.list(cluster_id, Some(&update.id)).await?;
        for replica in 1..=target.replicas {
            if !remaining.iter().any(|n| n.replica == replica) {
                self.run_node(&NodeContainer::new(cluster_id, target, replica))
                    .await?;
            }
        }

        Ok(())
    }

    async fn delete(&self, cluster_id: &str, spec: &ResourceSpec) -> mcluster_core::Result<()> {
        let nodes = self.list(cluster_id, Some(&spec.id)).await?;
        info!(cluster = %cluster_id, resource = %spec.id, "Removing {} node containers", nodes.len());
        self.remove_nodes(&nodes).await?;
        Ok(())
    }

    async fn wait_ready(&self, cluster_id: &str, id: &str) -> mcluster_core::Result<bool> {
        let nodes = self.list(cluster_id, Some(id)).await?;
        if nodes.is_empty() {
            return Ok(false);
        }

        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let ready = self.wait_running(&names).await?;
        if !ready {
            warn!(cluster = %cluster_id, resource = %id, "Nodes not running after {:?}", self.ready_timeout);
        }
        Ok(ready)
    }
}
