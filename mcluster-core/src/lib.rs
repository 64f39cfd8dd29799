//! mcluster-core: expected vs. actual state reconciliation for node clusters.
//!
//! The pipeline is:
//! - a [`StateProvider`] turns a [`ClusterConfig`] into the expected [`ClusterState`]
//! - a [`StateInspector`] observes the environment and reports the actual state
//! - the [`Reconciler`] diffs both and applies the operations through an [`Actuator`]
//! - the [`LifecycleDriver`] wires it together behind `create` / `delete`
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use mcluster_core::{AuditLogger, Backend, DriverOptions, LifecycleDriver};
//! use mcluster_core::backend::MemoryEnvironment;
//!
//! let env = Arc::new(MemoryEnvironment::new());
//! let audit = Arc::new(AuditLogger::tracing("example"));
//! let driver = LifecycleDriver::new(Backend::from_environment(env), audit, DriverOptions::default());
//!
//! let state = driver.create("godays", 1).await?;
//! driver.delete("godays").await?;
//! ```

pub mod audit;
pub mod backend;
pub mod config;
pub mod diff;
pub mod driver;
pub mod error;
pub mod model;
pub mod provider;
pub mod reconciler;

pub use audit::{AuditEvent, AuditLogger, AuditSink, LogLevel, MemorySink, TracingSink};
pub use config::{ClusterConfig, DEFAULT_CLUSTER_NAME, DEFAULT_NODE_IMAGE, NodeGroup, NodeRole};
pub use diff::{Diff, Direction, Field, FieldChange, Operation, Update};
pub use driver::{DriverOptions, LifecycleDriver};
pub use error::{Error, ReconcileError, Result};
pub use model::{ClusterState, ClusterStatus, NodeKind, ResourceSpec};
pub use provider::{Actuator, Backend, ConfigStateProvider, StateInspector, StateProvider};
pub use reconciler::{ControlPlaneHandoff, Plan, Reconciler};
