//! Provider seams: where expected state comes from, how actual state is
//! observed and how operations reach the environment.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{ClusterConfig, NodeRole};
use crate::diff::{Operation, Update};
use crate::error::Result;
use crate::model::{ClusterState, ClusterStatus, NodeKind, ResourceSpec};

/// Produces the expected state from configuration. No side effects.
pub trait StateProvider: Send + Sync {
    fn expected(&self, config: &ClusterConfig) -> Result<ClusterState>;
}

/// Observes the resources that currently exist for a cluster.
#[async_trait]
pub trait StateInspector: Send + Sync {
    /// Returns an empty `Pending` state when nothing exists yet and
    /// `EnvironmentUnreachable` when the environment cannot be queried.
    async fn actual(&self, cluster_id: &str) -> Result<ClusterState>;
}

/// Applies single operations to the environment.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn create(&self, cluster_id: &str, spec: &ResourceSpec) -> Result<()>;

    /// Converge an existing resource in place. When the nodes of a control
    /// plane have to be replaced, the old node must keep running until its
    /// replacement does.
    async fn update(&self, cluster_id: &str, update: &Update) -> Result<()>;

    async fn delete(&self, cluster_id: &str, spec: &ResourceSpec) -> Result<()>;

    /// Wait until every replica of the resource is up. `Ok(false)` means it
    /// did not become ready in the time the environment allows.
    async fn wait_ready(&self, cluster_id: &str, id: &str) -> Result<bool>;

    async fn apply(&self, cluster_id: &str, op: &Operation) -> Result<()> {
        match op {
            Operation::Create(spec) => self.create(cluster_id, spec).await,
            Operation::Update(update) => self.update(cluster_id, update).await,
            Operation::Delete(spec) => self.delete(cluster_id, spec).await,
        }
    }
}

/// Maps each node group of a [`ClusterConfig`] to one resource.
///
/// Group ids default to `control-plane` and `worker` (`worker-2`, `worker-3`, ...
/// for further unnamed worker groups). Worker groups with zero replicas
/// describe no nodes and are left out.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigStateProvider;

impl ConfigStateProvider {
    pub fn new() -> Self {
        Self
    }
}

impl StateProvider for ConfigStateProvider {
    fn expected(&self, config: &ClusterConfig) -> Result<ClusterState> {
        config.validate()?;

        let mut resources = Vec::with_capacity(config.nodes.len());
        let mut unnamed_workers = 0u32;

        for group in &config.nodes {
            let id = match (&group.name, group.role) {
                (Some(name), _) => name.clone(),
                (None, NodeRole::ControlPlane) => "control-plane".to_string(),
                (None, NodeRole::Worker) => {
                    unnamed_workers += 1;
                    if unnamed_workers == 1 {
                        "worker".to_string()
                    } else {
                        format!("worker-{unnamed_workers}")
                    }
                }
            };

            if group.role == NodeRole::Worker && group.replicas == 0 {
                debug!(cluster = %config.name, group = %id, "Skipping empty worker group");
                continue;
            }

            resources.push(ResourceSpec::new(
                id,
                NodeKind::from(group.role),
                group.replicas,
                group.image.clone(),
            ));
        }

        let state = ClusterState::new(config.name.clone(), resources, ClusterStatus::Pending);
        state.validate_topology()?;
        Ok(state)
    }
}

/// The strategies a driver runs with, chosen once at configuration time.
#[derive(Clone)]
pub struct Backend {
    pub provider: Arc<dyn StateProvider>,
    pub inspector: Arc<dyn StateInspector>,
    pub actuator: Arc<dyn Actuator>,
}

impl Backend {
    pub fn new(
        provider: Arc<dyn StateProvider>,
        inspector: Arc<dyn StateInspector>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            provider,
            inspector,
            actuator,
        }
    }

    /// Use one environment as both inspector and actuator, with the
    /// configuration-driven provider.
    pub fn from_environment<E>(env: Arc<E>) -> Self
    where
        E: StateInspector + Actuator + 'static,
    {
        Self {
            provider: Arc::new(ConfigStateProvider::new()),
            inspector: env.clone(),
            actuator: env,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_NODE_IMAGE, NodeGroup};
    use crate::error::Error;

    #[test]
    fn test_expected_default_topology() {
        let config = ClusterConfig::with_workers("godays", 1, DEFAULT_NODE_IMAGE);
        let state = ConfigStateProvider.expected(&config).unwrap();

        assert_eq!(state.cluster_id, "godays");
        assert_eq!(state.status, ClusterStatus::Pending);
        assert_eq!(
            state.resources,
            vec![
                ResourceSpec::control_plane("control-plane", DEFAULT_NODE_IMAGE),
                ResourceSpec::worker("worker", 1, DEFAULT_NODE_IMAGE),
            ]
        );
    }

    #[test]
    fn test_expected_without_control_plane_is_invalid() {
        let config = ClusterConfig::new("c", vec![NodeGroup::workers(2, DEFAULT_NODE_IMAGE)]);
        let err = ConfigStateProvider.expected(&config).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_expected_skips_empty_worker_groups() {
        let config = ClusterConfig::with_workers("c", 0, DEFAULT_NODE_IMAGE);
        let state = ConfigStateProvider.expected(&config).unwrap();
        assert_eq!(state.resources.len(), 1);
        assert!(state.resources[0].is_control_plane());
    }

    #[test]
    fn test_expected_numbers_unnamed_worker_groups() {
        let config = ClusterConfig::new(
            "c",
            vec![
                NodeGroup::control_plane(DEFAULT_NODE_IMAGE),
                NodeGroup::workers(1, DEFAULT_NODE_IMAGE),
                NodeGroup::workers(2, "kindest/node:v1.14.0"),
                NodeGroup::workers(1, DEFAULT_NODE_IMAGE).named("gpu"),
            ],
        );
        let state = ConfigStateProvider.expected(&config).unwrap();
        let ids: Vec<&str> = state.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["control-plane", "worker", "worker-2", "gpu"]);
        assert_eq!(state.get("worker-2").unwrap().image, "kindest/node:v1.14.0");
    }

    #[test]
    fn test_expected_rejects_duplicate_ids() {
        let config = ClusterConfig::new(
            "c",
            vec![
                NodeGroup::control_plane(DEFAULT_NODE_IMAGE),
                NodeGroup::workers(1, DEFAULT_NODE_IMAGE).named("control-plane"),
            ],
        );
        assert!(matches!(
            ConfigStateProvider.expected(&config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
