//! Error types for the reconciliation core.

use std::time::Duration;

use thiserror::Error;

use crate::diff::Operation;
use crate::model::{ClusterState, ClusterStatus};

/// Errors that can occur while computing or converging cluster state.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected before any state was produced.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The backing environment could not be queried or reached.
    #[error("environment unreachable: {0}")]
    EnvironmentUnreachable(String),

    /// The environment rejected or failed an operation.
    #[error("environment error: {0}")]
    Environment(String),

    /// An operation failed part way through a reconcile.
    #[error(transparent)]
    Reconcile(Box<ReconcileError>),

    /// Control-plane loss. Never retried automatically.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The caller's deadline expired before the reconcile finished.
    #[error("deadline of {timeout:?} exceeded for cluster {cluster_id}")]
    DeadlineExceeded {
        cluster_id: String,
        timeout: Duration,
    },

    /// Lifecycle status change that the state machine does not allow.
    #[error("invalid status transition for cluster {cluster_id}: {from} -> {to}")]
    InvalidTransition {
        cluster_id: String,
        from: ClusterStatus,
        to: ClusterStatus,
    },
}

impl Error {
    /// Whether retrying the same call later may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EnvironmentUnreachable(_) | Error::DeadlineExceeded { .. }
        )
    }

    /// Control-plane loss, either directly or as the cause of a partial apply.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Fatal(_) => true,
            Error::Reconcile(e) => e.source.is_fatal(),
            _ => false,
        }
    }

    /// Last known cluster state carried by a partial-apply failure.
    pub fn state(&self) -> Option<&ClusterState> {
        match self {
            Error::Reconcile(e) => Some(&e.state),
            _ => None,
        }
    }
}

/// Partial-apply failure: the first failing operation and what was applied before it.
#[derive(Debug, Error)]
#[error("{operation} failed on cluster {cluster}: {source}", cluster = .state.cluster_id)]
pub struct ReconcileError {
    /// State reflecting the operations that did get applied.
    pub state: ClusterState,
    /// The operation that failed.
    pub operation: Operation,
    #[source]
    pub source: Box<Error>,
}

impl From<ReconcileError> for Error {
    fn from(e: ReconcileError) -> Self {
        Error::Reconcile(Box::new(e))
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
