//! One-shot operational commands: dispatch pass, watchdog pass, statistics.

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

/// Run a single dispatch pass over due schedules.
pub async fn dispatch_once(state: &AppState, json: bool) -> Result<()> {
    let report = state.dispatch.run_once(Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!();
    println!(
        "  {} Dispatch pass: {} due",
        style("*").green().bold(),
        report.due
    );
    println!(
        "  completed {}  failed {}  skipped {}  errors {}",
        style(report.completed).green(),
        style(report.failed).red(),
        style(report.skipped).yellow(),
        style(report.errors).red()
    );
    println!();
    Ok(())
}

/// Run a single watchdog pass over stale executions.
pub async fn watchdog_once(state: &AppState, json: bool) -> Result<()> {
    let report = state.watchdog.run_once(Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!();
    println!(
        "  {} Watchdog pass: {} stale",
        style("*").green().bold(),
        report.stale
    );
    println!(
        "  recovered {}  alerted {}  schedules advanced {}  errors {}",
        report.recovered, report.alerted, report.schedules_advanced, report.errors
    );
    println!();
    Ok(())
}

/// Print execution counts per status.
pub async fn stats(state: &AppState, json: bool) -> Result<()> {
    let stats = state.tracker.get_statistics().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Status").fg(Color::White),
        Cell::new("Executions").fg(Color::White),
    ]);
    for (status, count) in &stats {
        table.add_row(vec![Cell::new(status.as_str()).fg(Color::Cyan), Cell::new(count)]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
