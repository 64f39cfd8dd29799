//! Table and JSON rendering of cluster states and plans.

use clap::ValueEnum;
use mcluster_core::{ClusterState, Operation, Plan};
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "ROLE")]
    role: String,
    #[tabled(rename = "REPLICAS")]
    replicas: u32,
    #[tabled(rename = "IMAGE")]
    image: String,
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    step: usize,
    #[tabled(rename = "OP")]
    op: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

impl OperationRow {
    fn new(step: usize, op: &Operation) -> Self {
        let detail = match op {
            Operation::Create(spec) => format!("{} x{} ({})", spec.kind, spec.replicas, spec.image),
            Operation::Update(update) => update
                .changes
                .iter()
                .map(|c| format!("{:?}: {} -> {}", c.field, c.from, c.to))
                .collect::<Vec<_>>()
                .join(", "),
            Operation::Delete(spec) => format!("{} x{}", spec.kind, spec.replicas),
        };
        Self {
            step: step + 1,
            op: op.verb(),
            id: op.id().to_string(),
            detail,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_state(state: &ClusterState, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(state);
    }

    println!("Cluster: {} ({})", state.cluster_id, state.status);
    if state.is_empty() {
        println!("No nodes found");
        return Ok(());
    }

    let rows: Vec<NodeRow> = state
        .resources
        .iter()
        .map(|r| NodeRow {
            id: r.id.clone(),
            role: r.kind.to_string(),
            replicas: r.replicas,
            image: r.image.clone(),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

pub fn print_plan(plan: &Plan, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(plan);
    }

    if plan.is_empty() {
        println!("Cluster {} is up to date", plan.cluster_id);
        return Ok(());
    }

    println!("Plan for {} ({:?}):", plan.cluster_id, plan.direction);
    let rows: Vec<OperationRow> = plan
        .operations
        .iter()
        .enumerate()
        .map(|(i, op)| OperationRow::new(i, op))
        .collect();
    println!("{}", Table::new(rows));

    if let Some(handoff) = &plan.handoff {
        println!(
            "Control plane {} is retired once {} is ready",
            handoff.retiring, handoff.replacement
        );
    }
    Ok(())
}
