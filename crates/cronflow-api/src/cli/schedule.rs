//! CLI schedule subcommands: create, list, deactivate.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use cronflow_types::schedule::{NewSchedule, ScheduleStatus, WorkflowSchedule};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Schedule a workflow on a cron expression.
    Create {
        /// Workflow UUID.
        workflow_id: Uuid,

        /// Cron expression (5 or 6 fields, or a macro such as @daily).
        #[arg(long)]
        cron: String,

        /// IANA timezone the expression is evaluated in.
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Initial context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },

    /// List all schedules.
    List,

    /// Deactivate a schedule so the dispatcher ignores it.
    Deactivate {
        /// Schedule UUID.
        id: Uuid,
    },
}

pub async fn handle_schedule_command(
    cmd: ScheduleCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ScheduleCommand::Create {
            workflow_id,
            cron,
            timezone,
            context,
        } => {
            let initial_context = match context {
                Some(raw) => serde_json::from_str(&raw)
                    .context("--context must be a JSON object")?,
                None => Default::default(),
            };
            let schedule = state
                .schedules
                .create_schedule(
                    NewSchedule {
                        workflow_id,
                        cron_expression: cron,
                        timezone,
                        initial_context,
                    },
                    Utc::now(),
                )
                .await?;
            print_schedule("Created schedule", &schedule, json)
        }
        ScheduleCommand::List => {
            let schedules = state.schedules.list_schedules().await?;
            print_schedules(&schedules, json)
        }
        ScheduleCommand::Deactivate { id } => {
            let schedule = state.schedules.deactivate_schedule(id, Utc::now()).await?;
            print_schedule("Deactivated schedule", &schedule, json)
        }
    }
}

fn print_schedule(verb: &str, schedule: &WorkflowSchedule, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(schedule)?);
        return Ok(());
    }
    println!();
    println!("  {} {verb} {}", style("*").green().bold(), style(schedule.id).cyan());
    println!("  Workflow: {}", schedule.workflow_id);
    println!("  Cron: {} ({})", schedule.cron_expression, schedule.timezone);
    println!("  Status: {}", schedule.status);
    println!("  Next run: {}", format_next_run(schedule));
    println!();
    Ok(())
}

fn print_schedules(schedules: &[WorkflowSchedule], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(schedules)?);
        return Ok(());
    }
    if schedules.is_empty() {
        println!();
        println!("  No schedules.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Workflow").fg(Color::White),
        Cell::new("Cron").fg(Color::White),
        Cell::new("Timezone").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Next Run (UTC)").fg(Color::White),
    ]);

    for schedule in schedules {
        let status_color = match schedule.status {
            ScheduleStatus::Active => Color::Green,
            ScheduleStatus::Inactive => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(schedule.id).fg(Color::DarkGrey),
            Cell::new(schedule.workflow_id),
            Cell::new(&schedule.cron_expression).fg(Color::Cyan),
            Cell::new(&schedule.timezone),
            Cell::new(schedule.status).fg(status_color),
            Cell::new(format_next_run(schedule)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn format_next_run(schedule: &WorkflowSchedule) -> String {
    schedule
        .next_run_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
