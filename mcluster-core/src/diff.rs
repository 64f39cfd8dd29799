//! Diff between two cluster states and the operations it is made of.

use std::fmt;

use serde::Serialize;

use crate::model::{ClusterState, ResourceSpec};

/// Field of a [`ResourceSpec`] that an update changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Kind,
    Replicas,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: Field,
    pub from: String,
    pub to: String,
}

/// In-place change of an existing resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Update {
    pub id: String,
    pub changes: Vec<FieldChange>,
    /// Spec currently in the environment.
    pub previous: ResourceSpec,
    /// Spec to converge to.
    pub spec: ResourceSpec,
}

impl Update {
    /// Compare two specs with the same id. Returns `None` when nothing differs.
    pub fn between(previous: &ResourceSpec, spec: &ResourceSpec) -> Option<Self> {
        let mut changes = Vec::new();
        if previous.kind != spec.kind {
            changes.push(FieldChange {
                field: Field::Kind,
                from: previous.kind.to_string(),
                to: spec.kind.to_string(),
            });
        }
        if previous.replicas != spec.replicas {
            changes.push(FieldChange {
                field: Field::Replicas,
                from: previous.replicas.to_string(),
                to: spec.replicas.to_string(),
            });
        }
        if previous.image != spec.image {
            changes.push(FieldChange {
                field: Field::Image,
                from: previous.image.clone(),
                to: spec.image.clone(),
            });
        }

        if changes.is_empty() {
            return None;
        }

        Some(Self {
            id: spec.id.clone(),
            changes,
            previous: previous.clone(),
            spec: spec.clone(),
        })
    }

    pub fn changes_field(&self, field: Field) -> bool {
        self.changes.iter().any(|c| c.field == field)
    }
}

/// A single step towards the expected state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create(ResourceSpec),
    Update(Update),
    Delete(ResourceSpec),
}

impl Operation {
    pub fn id(&self) -> &str {
        match self {
            Operation::Create(spec) | Operation::Delete(spec) => &spec.id,
            Operation::Update(update) => &update.id,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Create(_) => "create",
            Operation::Update(_) => "update",
            Operation::Delete(_) => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create(spec) => write!(
                f,
                "create {} ({} x{}, {})",
                spec.id, spec.kind, spec.replicas, spec.image
            ),
            Operation::Update(update) => {
                write!(f, "update {}", update.id)?;
                for (i, c) in update.changes.iter().enumerate() {
                    let sep = if i == 0 { " (" } else { ", " };
                    write!(f, "{sep}{:?}: {} -> {}", c.field, c.from, c.to)?;
                }
                if !update.changes.is_empty() {
                    f.write_str(")")?;
                }
                Ok(())
            }
            Operation::Delete(spec) => write!(f, "delete {}", spec.id),
        }
    }
}

/// Whether the cluster is losing or gaining nodes overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Growing,
    Shrinking,
}

impl Direction {
    pub fn between(actual: &ClusterState, expected: &ClusterState) -> Self {
        if expected.total_replicas() < actual.total_replicas() {
            Direction::Shrinking
        } else {
            Direction::Growing
        }
    }
}

/// Operations needed to turn one state into another, keyed by resource id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub creates: Vec<ResourceSpec>,
    pub updates: Vec<Update>,
    pub deletes: Vec<ResourceSpec>,
}

impl Diff {
    /// Creates and updates follow the order of `expected`, deletes the order of `actual`.
    pub fn compute(actual: &ClusterState, expected: &ClusterState) -> Self {
        let current = actual.index();
        let wanted = expected.index();
        let mut diff = Diff::default();

        for spec in &expected.resources {
            match current.get(spec.id.as_str()) {
                None => diff.creates.push(spec.clone()),
                Some(existing) => {
                    if let Some(update) = Update::between(existing, spec) {
                        diff.updates.push(update);
                    }
                }
            }
        }

        for spec in &actual.resources {
            if !wanted.contains_key(spec.id.as_str()) {
                diff.deletes.push(spec.clone());
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// Flatten into operations: Delete → Update → Create when shrinking,
    /// Create → Update → Delete when growing.
    pub fn into_operations(self, direction: Direction) -> Vec<Operation> {
        let creates = self.creates.into_iter().map(Operation::Create);
        let updates = self.updates.into_iter().map(Operation::Update);
        let deletes = self.deletes.into_iter().map(Operation::Delete);

        match direction {
            Direction::Shrinking => deletes.chain(updates).chain(creates).collect(),
            Direction::Growing => creates.chain(updates).chain(deletes).collect(),
        }
    }
}

impl ClusterState {
    /// Record the effect of an applied operation.
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::Create(spec) => self.upsert(spec.clone()),
            Operation::Update(update) => self.upsert(update.spec.clone()),
            Operation::Delete(spec) => {
                self.remove(&spec.id);
            }
        }
    }
}
