//! Audit logging for cluster lifecycle events.
//!
//! One [`AuditLogger`] is built at startup and handed to the driver and the
//! reconciler. Events always go to the configured [`AuditSink`]; the default
//! sink writes them through tracing under the `audit` target.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diff::Operation;
use crate::error::Error;
use crate::model::ClusterStatus;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Audit,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub object_ids: Vec<String>,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes events through tracing.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: AuditEvent) {
        let AuditEvent {
            level,
            component,
            message,
            object_ids,
            ..
        } = event;

        match level {
            LogLevel::Error => {
                tracing::error!(target: "audit", component = %component, objects = ?object_ids, "{}", message)
            }
            LogLevel::Warn => {
                tracing::warn!(target: "audit", component = %component, objects = ?object_ids, "{}", message)
            }
            LogLevel::Audit | LogLevel::Info => {
                tracing::info!(target: "audit", component = %component, objects = ?object_ids, "{}", message)
            }
            LogLevel::Debug => {
                tracing::debug!(target: "audit", component = %component, objects = ?object_ids, "{}", message)
            }
        }
    }
}

/// Keeps events in memory (for tests and dry runs).
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

struct NoopSink;

impl AuditSink for NoopSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Component-scoped audit logger.
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    component: String,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>, component: &str) -> Self {
        Self {
            sink,
            component: component.to_string(),
        }
    }

    /// Logger backed by [`TracingSink`].
    pub fn tracing(component: &str) -> Self {
        Self::new(Arc::new(TracingSink), component)
    }

    /// Create a noop audit logger (for testing)
    pub fn new_noop() -> Self {
        Self::new(Arc::new(NoopSink), "")
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, object_ids: Vec<String>) {
        self.sink.record(AuditEvent {
            timestamp: Utc::now(),
            level,
            component: self.component.clone(),
            message: message.into(),
            object_ids,
        });
    }

    pub fn create_requested(&self, cluster_id: &str, resources: usize) {
        self.log(
            LogLevel::Audit,
            format!("Cluster create requested: {} ({} resources)", cluster_id, resources),
            vec![cluster_id.to_string()],
        );
    }

    pub fn delete_requested(&self, cluster_id: &str) {
        self.log(
            LogLevel::Audit,
            format!("Cluster delete requested: {}", cluster_id),
            vec![cluster_id.to_string()],
        );
    }

    pub fn operation_applied(&self, cluster_id: &str, op: &Operation) {
        self.log(
            LogLevel::Info,
            format!("Applied {}", op),
            vec![cluster_id.to_string(), op.id().to_string()],
        );
    }

    pub fn status_changed(&self, cluster_id: &str, from: ClusterStatus, to: ClusterStatus) {
        self.log(
            LogLevel::Debug,
            format!("Cluster {} status: {} -> {}", cluster_id, from, to),
            vec![cluster_id.to_string()],
        );
    }

    pub fn reconcile_failed(&self, cluster_id: &str, error: &Error) {
        self.log(
            LogLevel::Error,
            format!("Reconcile failed: {}", error),
            vec![cluster_id.to_string()],
        );
    }

    pub fn ready(&self, cluster_id: &str, nodes: u64) {
        self.log(
            LogLevel::Audit,
            format!("Cluster ready: {} ({} nodes)", cluster_id, nodes),
            vec![cluster_id.to_string()],
        );
    }

    pub fn deleted(&self, cluster_id: &str) {
        self.log(
            LogLevel::Audit,
            format!("Cluster deleted: {}", cluster_id),
            vec![cluster_id.to_string()],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceSpec;

    #[test]
    fn test_memory_sink_records_events() {
        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(sink.clone(), "test");

        audit.create_requested("godays", 2);
        audit.operation_applied(
            "godays",
            &Operation::Create(ResourceSpec::control_plane("cp", "img")),
        );
        audit.status_changed("godays", ClusterStatus::Pending, ClusterStatus::Provisioning);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].level, LogLevel::Audit);
        assert_eq!(events[0].component, "test");
        assert_eq!(events[1].object_ids, vec!["godays".to_string(), "cp".to_string()]);
        assert_eq!(
            events[2].message,
            "Cluster godays status: pending -> provisioning"
        );
    }

    #[test]
    fn test_reconcile_failure_is_error_level() {
        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(sink.clone(), "test");

        audit.reconcile_failed("godays", &Error::Fatal("control plane lost".to_string()));

        let events = sink.events();
        assert_eq!(events[0].level, LogLevel::Error);
        assert_eq!(events[0].message, "Reconcile failed: fatal: control plane lost");
    }

    #[test]
    fn test_noop_logger_discards() {
        let audit = AuditLogger::new_noop();
        audit.deleted("godays");
    }
}
