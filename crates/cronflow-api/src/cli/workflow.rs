//! CLI workflow subcommands: import, list, export, run.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use uuid::Uuid;

use cronflow_core::repository::workflow::WorkflowRepository;
use cronflow_core::workflow::definition::{parse_workflow_yaml, serialize_workflow_yaml};
use cronflow_core::workflow::runner::RunOutcome;
use cronflow_types::workflow::WorkflowStatus;

use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Import a workflow definition from a YAML file.
    Import {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// List stored workflows, newest first.
    List,

    /// Print a stored workflow as YAML.
    Export {
        /// Workflow UUID.
        id: Uuid,
    },

    /// Run a workflow once and print the final context.
    Run {
        /// Workflow UUID.
        id: Uuid,

        /// Seed context as a JSON object.
        #[arg(long)]
        context: Option<String>,

        /// Track the run under this idempotency key; a second run with the
        /// same key is skipped.
        #[arg(long)]
        key: Option<String>,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::Import { file } => handle_import(&file, state, json).await,
        WorkflowCommand::List => handle_list(state, json).await,
        WorkflowCommand::Export { id } => handle_export(id, state).await,
        WorkflowCommand::Run { id, context, key } => {
            handle_run(id, context.as_deref(), key.as_deref(), state, json).await
        }
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

async fn handle_import(file: &PathBuf, state: &AppState, json: bool) -> Result<()> {
    let yaml = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let def = parse_workflow_yaml(&yaml)?;

    state
        .workflows
        .save_workflow(&def)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save workflow: {e}"))?;

    if json {
        let out = serde_json::json!({
            "id": def.id.to_string(),
            "name": def.name,
            "nodes": def.nodes.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Imported workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
        println!("  ID: {}", def.id);
        println!("  Nodes: {}", def.nodes.len());
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let defs = state.workflows.list_workflows().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Import one with: {}",
            style("cronflow workflow import <file.yaml>").cyan()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Nodes").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for def in &defs {
        let status_color = match def.status {
            WorkflowStatus::Active => Color::Green,
            WorkflowStatus::Inactive => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(def.id).fg(Color::DarkGrey),
            Cell::new(&def.name).fg(Color::Cyan),
            Cell::new(def.status).fg(status_color),
            Cell::new(def.nodes.len()),
            Cell::new(def.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

async fn handle_export(id: Uuid, state: &AppState) -> Result<()> {
    let Some(def) = state.workflows.get_workflow(&id).await? else {
        bail!("Workflow {id} not found");
    };
    print!("{}", serialize_workflow_yaml(&def)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn handle_run(
    id: Uuid,
    context: Option<&str>,
    key: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let seed = match context {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("Invalid --context JSON")?;
            if !value.is_object() {
                bail!("--context must be a JSON object");
            }
            value
        }
        None => Value::Object(Default::default()),
    };

    let result = match key {
        Some(key) => match state.runner.run_tracked(key, id, None, seed).await? {
            RunOutcome::Skipped { idempotency_key } => {
                if json {
                    let out = serde_json::json!({
                        "status": "SKIPPED",
                        "idempotency_key": idempotency_key,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    println!();
                    println!(
                        "  {} Skipped: key '{}' already claimed",
                        style("-").yellow().bold(),
                        idempotency_key
                    );
                    println!();
                }
                return Ok(());
            }
            RunOutcome::Completed(result) | RunOutcome::Failed(result) => result,
        },
        None => state.engine.run(id, seed).await?,
    };

    if json {
        let out = serde_json::json!({
            "execution_id": result.execution_id.to_string(),
            "status": result.status,
            "completed_nodes": result.completed_nodes,
            "error": result.error,
            "context": result.context,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if result.is_completed() {
        println!(
            "  {} Workflow completed ({} nodes)",
            style("*").green().bold(),
            result.completed_nodes.len()
        );
    } else {
        println!(
            "  {} Workflow failed: {}",
            style("x").red().bold(),
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("  Execution: {}", result.execution_id);
    println!();
    println!("{}", serde_json::to_string_pretty(&result.context)?);
    println!();
    Ok(())
}
