//! In-memory environment with fault injection.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::diff::Update;
use crate::error::{Error, Result};
use crate::model::{ClusterState, ClusterStatus, ResourceSpec};
use crate::provider::{Actuator, StateInspector};

#[derive(Default)]
struct Inner {
    clusters: HashMap<String, Vec<ResourceSpec>>,
    unreachable: bool,
    failing: HashSet<String>,
    never_ready: HashSet<String>,
    journal: Vec<String>,
}

/// Environment that keeps resources in a map.
///
/// Every applied operation is appended to a journal (`"<verb> <id>"`) so
/// callers can check what was done and in which order.
#[derive(Default)]
pub struct MemoryEnvironment {
    inner: Mutex<Inner>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the resources of a cluster without journaling.
    pub async fn seed(&self, cluster_id: &str, resources: Vec<ResourceSpec>) {
        let mut inner = self.inner.lock().await;
        inner.clusters.insert(cluster_id.to_string(), resources);
    }

    /// Make every query and operation fail with `EnvironmentUnreachable`.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().await.unreachable = unreachable;
    }

    /// Make every operation on resource `id` fail.
    pub async fn fail_on(&self, id: &str) {
        self.inner.lock().await.failing.insert(id.to_string());
    }

    /// Make resource `id` never report ready.
    pub async fn never_ready(&self, id: &str) {
        self.inner.lock().await.never_ready.insert(id.to_string());
    }

    pub async fn journal(&self) -> Vec<String> {
        self.inner.lock().await.journal.clone()
    }

    async fn mutate<F>(&self, cluster_id: &str, verb: &str, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<ResourceSpec>) -> Result<()> + Send,
    {
        let mut inner = self.inner.lock().await;
        if inner.unreachable {
            return Err(Error::EnvironmentUnreachable(
                "memory environment marked unreachable".to_string(),
            ));
        }
        if inner.failing.contains(id) {
            return Err(Error::Environment(format!("injected failure: {verb} {id}")));
        }

        let resources = inner.clusters.entry(cluster_id.to_string()).or_default();
        f(resources)?;
        if resources.is_empty() {
            inner.clusters.remove(cluster_id);
        }

        debug!(cluster = %cluster_id, "memory: {} {}", verb, id);
        inner.journal.push(format!("{verb} {id}"));
        Ok(())
    }
}

#[async_trait]
impl StateInspector for MemoryEnvironment {
    async fn actual(&self, cluster_id: &str) -> Result<ClusterState> {
        let inner = self.inner.lock().await;
        if inner.unreachable {
            return Err(Error::EnvironmentUnreachable(
                "memory environment marked unreachable".to_string(),
            ));
        }

        Ok(match inner.clusters.get(cluster_id) {
            Some(resources) if !resources.is_empty() => {
                ClusterState::new(cluster_id, resources.clone(), ClusterStatus::Ready)
            }
            _ => ClusterState::empty(cluster_id),
        })
    }
}

#[async_trait]
impl Actuator for MemoryEnvironment {
    async fn create(&self, cluster_id: &str, spec: &ResourceSpec) -> Result<()> {
        let spec = spec.clone();
        self.mutate(cluster_id, "create", &spec.id.clone(), move |resources| {
            if resources.iter().any(|r| r.id == spec.id) {
                return Err(Error::Environment(format!("{} already exists", spec.id)));
            }
            resources.push(spec);
            Ok(())
        })
        .await
    }

    async fn update(&self, cluster_id: &str, update: &Update) -> Result<()> {
        let spec = update.spec.clone();
        self.mutate(cluster_id, "update", &update.id, move |resources| {
            match resources.iter_mut().find(|r| r.id == spec.id) {
                Some(existing) => {
                    *existing = spec;
                    Ok(())
                }
                None => Err(Error::Environment(format!("{} does not exist", spec.id))),
            }
        })
        .await
    }

    async fn delete(&self, cluster_id: &str, spec: &ResourceSpec) -> Result<()> {
        let id = spec.id.clone();
        self.mutate(cluster_id, "delete", &spec.id, move |resources| {
            resources.retain(|r| r.id != id);
            Ok(())
        })
        .await
    }

    async fn wait_ready(&self, cluster_id: &str, id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        if inner.unreachable {
            return Err(Error::EnvironmentUnreachable(
                "memory environment marked unreachable".to_string(),
            ));
        }
        let exists = inner
            .clusters
            .get(cluster_id)
            .is_some_and(|resources| resources.iter().any(|r| r.id == id));
        Ok(exists && !inner.never_ready.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_cluster_is_pending() {
        let env = MemoryEnvironment::new();
        let state = env.actual("nothing").await.unwrap();
        assert!(state.is_empty());
        assert_eq!(state.status, ClusterStatus::Pending);
    }

    #[tokio::test]
    async fn test_unreachable_is_not_empty() {
        let env = MemoryEnvironment::new();
        env.set_unreachable(true).await;
        assert!(matches!(
            env.actual("c1").await,
            Err(Error::EnvironmentUnreachable(_))
        ));

        env.set_unreachable(false).await;
        assert!(env.actual("c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let env = MemoryEnvironment::new();
        let spec = ResourceSpec::worker("w", 1, "img");
        env.create("c1", &spec).await.unwrap();
        assert!(env.create("c1", &spec).await.is_err());

        let update = Update::between(&spec, &ResourceSpec::worker("w", 2, "img")).unwrap();
        env.update("c1", &update).await.unwrap();
        assert_eq!(env.actual("c1").await.unwrap().get("w").unwrap().replicas, 2);
        assert!(env.wait_ready("c1", "w").await.unwrap());

        env.delete("c1", &spec).await.unwrap();
        assert!(env.actual("c1").await.unwrap().is_empty());
        assert!(!env.wait_ready("c1", "w").await.unwrap());

        // The failed duplicate create is not journaled.
        assert_eq!(env.journal().await, vec!["create w", "update w", "delete w"]);
    }
}
