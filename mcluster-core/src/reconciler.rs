//! Reconciler - converges the actual cluster state towards the expected one.
//!
//! A reconcile computes the [`Diff`] between both states, orders it into a
//! [`Plan`] and applies the operations one by one through the [`Actuator`].
//! Nothing is rolled back on failure: the error carries the state as far as
//! it got, and the caller decides whether to retry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::diff::{Diff, Direction, Operation};
use crate::error::{Error, ReconcileError, Result};
use crate::model::{ClusterState, ClusterStatus};
use crate::provider::Actuator;

/// Replacement of the cluster's only control plane.
///
/// `retiring` is only removed once `replacement` reports ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlPlaneHandoff {
    pub replacement: String,
    pub retiring: String,
}

/// Ordered operations for one reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub cluster_id: String,
    pub direction: Direction,
    pub operations: Vec<Operation>,
    pub handoff: Option<ControlPlaneHandoff>,
}

impl Plan {
    pub fn build(actual: &ClusterState, expected: &ClusterState) -> Result<Self> {
        if actual.cluster_id != expected.cluster_id {
            return Err(Error::InvalidConfig(format!(
                "cannot reconcile cluster {} against expected state of {}",
                actual.cluster_id, expected.cluster_id
            )));
        }
        expected.validate_topology()?;

        let direction = Direction::between(actual, expected);
        let mut operations = Diff::compute(actual, expected).into_operations(direction);
        let handoff = guard_control_plane(actual, expected, &mut operations)?;

        Ok(Self {
            cluster_id: expected.cluster_id.clone(),
            direction,
            operations,
            handoff,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

fn removes_control_plane(op: &Operation) -> bool {
    match op {
        Operation::Delete(spec) => spec.is_control_plane(),
        Operation::Update(u) => u.previous.is_control_plane() && !u.spec.is_control_plane(),
        Operation::Create(_) => false,
    }
}

fn installs_control_plane(op: &Operation) -> bool {
    match op {
        Operation::Create(spec) => spec.is_control_plane(),
        Operation::Update(u) => u.spec.is_control_plane() && !u.previous.is_control_plane(),
        Operation::Delete(_) => false,
    }
}

/// Reorder `ops` so the sole control plane is never removed before its
/// replacement exists. On teardown the control plane goes last.
fn guard_control_plane(
    actual: &ClusterState,
    expected: &ClusterState,
    ops: &mut Vec<Operation>,
) -> Result<Option<ControlPlaneHandoff>> {
    let mut current = actual.control_planes();
    let (Some(sole), None) = (current.next(), current.next()) else {
        return Ok(None);
    };
    let Some(loss) = ops.iter().position(removes_control_plane) else {
        return Ok(None);
    };

    if expected.control_planes().next().is_none() {
        let op = ops.remove(loss);
        ops.push(op);
        return Ok(None);
    }

    let Some(install) = ops.iter().position(installs_control_plane) else {
        return Err(Error::Fatal(format!(
            "cluster {}: control plane {} would be removed without a replacement",
            actual.cluster_id, sole.id
        )));
    };
    let replacement = ops[install].id().to_string();

    if install > loss {
        let op = ops.remove(loss);
        // `install` now points one past the replacement.
        ops.insert(install, op);
    }

    Ok(Some(ControlPlaneHandoff {
        replacement,
        retiring: sole.id.clone(),
    }))
}

/// Applies plans through an [`Actuator`].
pub struct Reconciler {
    actuator: Arc<dyn Actuator>,
    audit: Arc<AuditLogger>,
}

impl Reconciler {
    pub fn new(actuator: Arc<dyn Actuator>, audit: Arc<AuditLogger>) -> Self {
        Self { actuator, audit }
    }

    /// Compute the ordered operations without applying them.
    pub fn plan(&self, actual: &ClusterState, expected: &ClusterState) -> Result<Plan> {
        Plan::build(actual, expected)
    }

    /// Converge `actual` to `expected`.
    ///
    /// Returns the converged state (`Ready`, or `Deleted` when `expected` is
    /// empty). On the first failing operation returns [`Error::Reconcile`]
    /// with the state reflecting what was applied before it. A replacement
    /// control plane that never becomes ready fails the retiring operation
    /// with a [`Error::Fatal`] source and the old control plane is kept.
    pub async fn reconcile(
        &self,
        actual: ClusterState,
        expected: &ClusterState,
    ) -> Result<ClusterState> {
        let Plan {
            cluster_id,
            direction,
            operations,
            handoff,
        } = Plan::build(&actual, expected)?;

        let teardown = expected.is_empty();
        let mut state = actual.with_status(if teardown {
            ClusterStatus::Deleting
        } else {
            ClusterStatus::Provisioning
        });

        let run = Uuid::new_v4();
        if operations.is_empty() {
            debug!(cluster = %cluster_id, %run, "Already converged");
        } else {
            info!(
                cluster = %cluster_id,
                %run,
                ?direction,
                operations = operations.len(),
                "Reconciling"
            );
        }

        for op in operations {
            // The replacement is already applied at this point, so a failed
            // handoff still reports it in the returned state.
            if let Some(handoff) = &handoff
                && op.id() == handoff.retiring
                && let Err(source) = self.await_replacement(&cluster_id, handoff).await
            {
                return Err(ReconcileError {
                    state: state.with_status(ClusterStatus::Failed),
                    operation: op,
                    source: Box::new(source),
                }
                .into());
            }

            debug!(cluster = %cluster_id, %run, op = %op, "Applying");
            if let Err(source) = self.actuator.apply(&cluster_id, &op).await {
                error!(cluster = %cluster_id, %run, op = %op, "Operation failed: {}", source);
                return Err(ReconcileError {
                    state: state.with_status(ClusterStatus::Failed),
                    operation: op,
                    source: Box::new(source),
                }
                .into());
            }

            state.apply(&op);
            self.audit.operation_applied(&cluster_id, &op);
        }

        let status = if teardown {
            ClusterStatus::Deleted
        } else {
            ClusterStatus::Ready
        };
        info!(cluster = %cluster_id, %run, %status, "Reconcile complete");

        // Converged: same resources as expected, in the expected order.
        Ok(ClusterState::new(
            cluster_id,
            expected.resources.clone(),
            status,
        ))
    }

    async fn await_replacement(&self, cluster_id: &str, handoff: &ControlPlaneHandoff) -> Result<()> {
        info!(
            cluster = %cluster_id,
            replacement = %handoff.replacement,
            "Waiting for replacement control plane before removing {}",
            handoff.retiring
        );

        match self.actuator.wait_ready(cluster_id, &handoff.replacement).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(cluster = %cluster_id, replacement = %handoff.replacement, "Replacement control plane not ready");
                Err(Error::Fatal(format!(
                    "cluster {}: replacement control plane {} did not become ready, keeping {}",
                    cluster_id, handoff.replacement, handoff.retiring
                )))
            }
            Err(e) => Err(Error::Fatal(format!(
                "cluster {}: readiness of replacement control plane {} unknown ({}), keeping {}",
                cluster_id, handoff.replacement, e, handoff.retiring
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryEnvironment;
    use crate::model::ResourceSpec;
    use crate::provider::StateInspector;

    const IMAGE: &str = "kindest/node:v1.13.2";

    fn state(resources: Vec<ResourceSpec>) -> ClusterState {
        ClusterState::new("c1", resources, ClusterStatus::Ready)
    }

    fn cp(id: &str) -> ResourceSpec {
        ResourceSpec::control_plane(id, IMAGE)
    }

    fn worker(id: &str, replicas: u32) -> ResourceSpec {
        ResourceSpec::worker(id, replicas, IMAGE)
    }

    fn reconciler(env: &Arc<MemoryEnvironment>) -> Reconciler {
        Reconciler::new(env.clone(), Arc::new(AuditLogger::new_noop()))
    }

    #[test]
    fn test_plan_teardown_removes_control_plane_last() {
        let actual = state(vec![cp("cp"), worker("a", 1), worker("b", 2)]);
        let plan = Plan::build(&actual, &ClusterState::empty("c1")).unwrap();

        let ids: Vec<&str> = plan.operations.iter().map(|o| o.id()).collect();
        assert_eq!(ids, vec!["a", "b", "cp"]);
        assert_eq!(plan.direction, Direction::Shrinking);
        assert!(plan.handoff.is_none());
    }

    #[test]
    fn test_plan_control_plane_replacement_precedes_removal() {
        let actual = state(vec![cp("cp-old"), worker("a", 3)]);
        let expected = state(vec![cp("cp-new"), worker("a", 1)]);
        let plan = Plan::build(&actual, &expected).unwrap();

        // Shrinking would put the delete first; the guard moves it behind the create.
        assert_eq!(plan.direction, Direction::Shrinking);
        let ops: Vec<String> = plan
            .operations
            .iter()
            .map(|o| format!("{} {}", o.verb(), o.id()))
            .collect();
        assert_eq!(ops, vec!["update a", "create cp-new", "delete cp-old"]);
        assert_eq!(
            plan.handoff,
            Some(ControlPlaneHandoff {
                replacement: "cp-new".to_string(),
                retiring: "cp-old".to_string(),
            })
        );
    }

    #[test]
    fn test_plan_rejects_mismatched_clusters() {
        let actual = ClusterState::empty("a");
        let expected = ClusterState::new("b", vec![cp("cp")], ClusterStatus::Pending);
        assert!(matches!(
            Plan::build(&actual, &expected),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_from_empty() {
        let env = Arc::new(MemoryEnvironment::new());
        let expected = state(vec![cp("1"), worker("2", 1)]);

        let result = reconciler(&env)
            .reconcile(ClusterState::empty("c1"), &expected)
            .await
            .unwrap();

        assert_eq!(result.status, ClusterStatus::Ready);
        assert_eq!(result.resources, expected.resources);
        assert_eq!(env.journal().await, vec!["create 1", "create 2"]);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let env = Arc::new(MemoryEnvironment::new());
        let expected = state(vec![cp("cp"), worker("w", 2)]);
        let r = reconciler(&env);

        r.reconcile(ClusterState::empty("c1"), &expected).await.unwrap();
        let actual = env.actual("c1").await.unwrap();
        let again = r.reconcile(actual, &expected).await.unwrap();

        assert_eq!(again.status, ClusterStatus::Ready);
        assert_eq!(env.journal().await.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_applied_operations() {
        let env = Arc::new(MemoryEnvironment::new());
        env.fail_on("b").await;
        let expected = state(vec![cp("cp"), worker("a", 1), worker("b", 1), worker("c", 1)]);

        let err = reconciler(&env)
            .reconcile(ClusterState::empty("c1"), &expected)
            .await
            .unwrap_err();

        let Error::Reconcile(e) = err else {
            panic!("expected reconcile error, got {err:?}");
        };
        assert_eq!(e.operation.id(), "b");
        assert_eq!(e.state.status, ClusterStatus::Failed);
        let applied: Vec<&str> = e.state.ids().into_iter().collect();
        assert_eq!(applied, vec!["a", "cp"]);

        // Nothing rolled back, nothing after the failure attempted.
        let actual = env.actual("c1").await.unwrap();
        assert_eq!(actual.ids(), e.state.ids());
    }

    #[tokio::test]
    async fn test_control_plane_never_ready_is_fatal() {
        let env = Arc::new(MemoryEnvironment::new());
        env.seed("c1", vec![cp("cp-old"), worker("w", 1)]).await;
        env.never_ready("cp-new").await;

        let actual = env.actual("c1").await.unwrap();
        let expected = state(vec![cp("cp-new"), worker("w", 1)]);
        let err = reconciler(&env).reconcile(actual, &expected).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        let Error::Reconcile(e) = &err else {
            panic!("expected reconcile error, got {err:?}");
        };
        assert!(matches!(*e.source, Error::Fatal(_)));
        assert_eq!(e.operation.to_string(), "delete cp-old");

        // The old control plane is still there, next to the applied replacement.
        let partial: Vec<&str> = e.state.ids().into_iter().collect();
        assert_eq!(partial, vec!["cp-new", "cp-old", "w"]);
        let actual = env.actual("c1").await.unwrap();
        assert_eq!(actual.ids(), e.state.ids());
    }

    #[tokio::test]
    async fn test_control_plane_handoff_succeeds() {
        let env = Arc::new(MemoryEnvironment::new());
        env.seed("c1", vec![cp("cp-old")]).await;

        let actual = env.actual("c1").await.unwrap();
        let expected = state(vec![cp("cp-new")]);
        let result = reconciler(&env).reconcile(actual, &expected).await.unwrap();

        assert_eq!(result.status, ClusterStatus::Ready);
        assert_eq!(env.journal().await, vec!["create cp-new", "delete cp-old"]);
    }
}
