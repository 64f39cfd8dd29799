//! Lifecycle driver - create and delete entry points over the reconciler.
//!
//! Calls for the same cluster are serialized: a second `create` or `delete`
//! waits until the first has finished diffing and applying. Different
//! clusters proceed independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::config::{ClusterConfig, DEFAULT_NODE_IMAGE};
use crate::error::{Error, Result};
use crate::model::{ClusterState, ClusterStatus};
use crate::provider::{Backend, StateInspector, StateProvider};
use crate::reconciler::{Plan, Reconciler};

/// Driver behaviour knobs.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Upper bound for one reconcile. On expiry the cluster stays
    /// `Provisioning`/`Deleting` and nothing is cleaned up.
    pub deadline: Option<Duration>,
    /// Keep nodes of a failed create. When false, a create that fails part
    /// way tears down what it applied before returning the error.
    pub retain_on_failure: bool,
    /// Image for the default topology built by [`LifecycleDriver::create`].
    pub node_image: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            retain_on_failure: true,
            node_image: DEFAULT_NODE_IMAGE.to_string(),
        }
    }
}

/// Orchestrates provider, inspector and reconciler per cluster.
pub struct LifecycleDriver {
    provider: Arc<dyn StateProvider>,
    inspector: Arc<dyn StateInspector>,
    reconciler: Reconciler,
    audit: Arc<AuditLogger>,
    options: DriverOptions,
    /// One lock per cluster id.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Last known state per cluster id.
    states: RwLock<HashMap<String, ClusterState>>,
}

impl LifecycleDriver {
    pub fn new(backend: Backend, audit: Arc<AuditLogger>, options: DriverOptions) -> Self {
        Self {
            provider: backend.provider,
            inspector: backend.inspector,
            reconciler: Reconciler::new(backend.actuator, Arc::clone(&audit)),
            audit,
            options,
            locks: Mutex::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Create (or converge) a cluster with one control plane and `workers` workers.
    pub async fn create(&self, name: &str, workers: u32) -> Result<ClusterState> {
        let config = ClusterConfig::with_workers(name, workers, &self.options.node_image);
        self.create_with_config(&config).await
    }

    pub async fn create_with_config(&self, config: &ClusterConfig) -> Result<ClusterState> {
        let lock = self.cluster_lock(&config.name).await;
        let _guard = lock.lock().await;
        let name = config.name.as_str();

        let expected = self.provider.expected(config)?;
        self.audit.create_requested(name, expected.resources.len());

        let actual = self.inspector.actual(name).await?;
        let fresh = actual.is_empty();

        if self.current_status(name).await == Some(ClusterStatus::Deleted) {
            self.transition(name, ClusterStatus::Pending).await?;
        }
        self.transition(name, ClusterStatus::Provisioning).await?;

        let result = self
            .within_deadline(name, self.reconciler.reconcile(actual, &expected))
            .await;

        match result {
            Ok(state) => {
                self.transition(name, ClusterStatus::Ready).await?;
                self.audit.ready(name, state.total_replicas());
                self.remember(state.clone()).await;
                Ok(state)
            }
            Err(e @ Error::DeadlineExceeded { .. }) => {
                warn!(cluster = %name, "Create hit its deadline, leaving cluster provisioning");
                Err(e)
            }
            Err(e) => {
                self.fail(name, &e).await;
                // Only nodes this call created are removed; a cluster that
                // already existed is left for the caller to repair.
                if fresh && matches!(e, Error::Reconcile(_)) && !self.options.retain_on_failure {
                    self.teardown_after_failure(name).await;
                }
                Err(e)
            }
        }
    }

    /// Remove every resource of the cluster.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let lock = self.cluster_lock(name).await;
        let _guard = lock.lock().await;

        self.audit.delete_requested(name);
        let actual = self.inspector.actual(name).await?;

        if actual.is_empty() {
            info!(cluster = %name, "Nothing to delete");
            self.transition(name, ClusterStatus::Deleting).await?;
            self.transition(name, ClusterStatus::Deleted).await?;
            self.remember(ClusterState::empty(name).with_status(ClusterStatus::Deleted))
                .await;
            self.audit.deleted(name);
            self.release_lock(name, &lock).await;
            return Ok(());
        }

        self.transition(name, ClusterStatus::Deleting).await?;
        let expected = ClusterState::empty(name);
        let result = self
            .within_deadline(name, self.reconciler.reconcile(actual, &expected))
            .await;

        match result {
            Ok(state) => {
                self.transition(name, ClusterStatus::Deleted).await?;
                self.remember(state).await;
                self.audit.deleted(name);
                self.release_lock(name, &lock).await;
                Ok(())
            }
            Err(e @ Error::DeadlineExceeded { .. }) => {
                warn!(cluster = %name, "Delete hit its deadline, leaving cluster deleting");
                Err(e)
            }
            Err(e) => {
                self.fail(name, &e).await;
                Err(e)
            }
        }
    }

    /// Last state recorded by this driver, or the environment's view of a
    /// cluster the driver has not touched yet.
    pub async fn status(&self, name: &str) -> Result<ClusterState> {
        if let Some(state) = self.states.read().await.get(name) {
            return Ok(state.clone());
        }
        self.inspector.actual(name).await
    }

    /// Operations a `create_with_config` would apply right now.
    pub async fn plan(&self, config: &ClusterConfig) -> Result<Plan> {
        let expected = self.provider.expected(config)?;
        let actual = self.inspector.actual(&config.name).await?;
        self.reconciler.plan(&actual, &expected)
    }

    async fn cluster_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Forget the lock of a deleted cluster unless another call holds it.
    async fn release_lock(&self, name: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference lives in the map, one with the caller.
        if locks.get(name).is_some_and(|l| Arc::ptr_eq(l, lock)) && Arc::strong_count(lock) == 2 {
            locks.remove(name);
        }
    }

    async fn within_deadline<F>(&self, name: &str, fut: F) -> Result<ClusterState>
    where
        F: Future<Output = Result<ClusterState>>,
    {
        match self.options.deadline {
            Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
                Error::DeadlineExceeded {
                    cluster_id: name.to_string(),
                    timeout,
                }
            })?,
            None => fut.await,
        }
    }

    async fn current_status(&self, name: &str) -> Option<ClusterStatus> {
        self.states.read().await.get(name).map(|s| s.status)
    }

    /// Move the tracked status, enforcing the lifecycle state machine.
    async fn transition(&self, name: &str, next: ClusterStatus) -> Result<()> {
        let mut states = self.states.write().await;
        let state = states
            .entry(name.to_string())
            .or_insert_with(|| ClusterState::empty(name));
        let from = state.status;

        if !from.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                cluster_id: name.to_string(),
                from,
                to: next,
            });
        }

        state.status = next;
        self.audit.status_changed(name, from, next);
        Ok(())
    }

    async fn remember(&self, state: ClusterState) {
        self.states
            .write()
            .await
            .insert(state.cluster_id.clone(), state);
    }

    /// Record a failed reconcile. Keeps the partially applied state when the
    /// error carries one.
    async fn fail(&self, name: &str, error: &Error) {
        self.audit.reconcile_failed(name, error);

        let mut states = self.states.write().await;
        let tracked = states
            .entry(name.to_string())
            .or_insert_with(|| ClusterState::empty(name));
        let from = tracked.status;
        if let Some(partial) = error.state() {
            tracked.resources = partial.resources.clone();
        }
        tracked.status = ClusterStatus::Failed;
        self.audit.status_changed(name, from, ClusterStatus::Failed);
    }

    /// Best-effort removal of what a failed create applied. The create's own
    /// error is what gets returned, so a teardown failure is only logged.
    async fn teardown_after_failure(&self, name: &str) {
        info!(cluster = %name, "Removing nodes of failed create");

        let actual = match self.inspector.actual(name).await {
            Ok(actual) => actual,
            Err(e) => {
                warn!(cluster = %name, "Cannot inspect failed cluster for teardown: {}", e);
                return;
            }
        };

        let expected = ClusterState::empty(name);
        let result = self
            .within_deadline(name, self.reconciler.reconcile(actual, &expected))
            .await;

        match result {
            Ok(state) => {
                for next in [ClusterStatus::Deleting, ClusterStatus::Deleted] {
                    if let Err(e) = self.transition(name, next).await {
                        warn!(cluster = %name, "Cannot record teardown of failed cluster: {}", e);
                        return;
                    }
                }
                self.remember(state).await;
            }
            Err(e) => warn!(cluster = %name, "Teardown of failed cluster incomplete: {}", e),
        }
    }
}
