//! cronflow CLI and REST API entry point.
//!
//! Binary name: `cronflow`
//!
//! Parses CLI arguments, loads configuration, initializes the database and
//! services, then dispatches to the requested command or starts the server
//! with its background dispatch and watchdog loops.

mod cli;
mod http;
mod state;

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use cronflow_core::workflow::jobs::spawn_periodic;
use cronflow_infra::config::{load_engine_config, resolve_data_dir};
use cronflow_observe::{TracingOptions, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,cronflow=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        default_filter: filter.to_string(),
        json: cli.log_json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cronflow", &mut std::io::stdout());
        return Ok(());
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = resolve_data_dir();
    let config = load_engine_config(&data_dir).await;
    let state = AppState::init(data_dir, config).await?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            no_jobs,
        } => serve(state, host, port, no_jobs, cli.quiet).await?,

        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, cli.json).await?;
        }

        Commands::Schedule { action } => {
            cli::schedule::handle_schedule_command(action, &state, cli.json).await?;
        }

        Commands::Dispatch => cli::ops::dispatch_once(&state, cli.json).await?,

        Commands::Watchdog => cli::ops::watchdog_once(&state, cli.json).await?,

        Commands::Stats => cli::ops::stats(&state, cli.json).await?,

        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn serve(
    state: AppState,
    host: Option<String>,
    port: Option<u16>,
    no_jobs: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let cancel = CancellationToken::new();
    let mut jobs = Vec::new();
    if !no_jobs {
        let dispatch_cfg = &state.config.dispatch;
        let dispatch = state.dispatch.clone();
        jobs.push(spawn_periodic(
            "dispatch",
            Duration::from_secs(dispatch_cfg.interval_secs.max(1)),
            Duration::from_secs(dispatch_cfg.job_timeout_secs.max(1)),
            cancel.clone(),
            move || {
                let dispatch = dispatch.clone();
                async move {
                    if let Err(e) = dispatch.run_once(Utc::now()).await {
                        tracing::error!(error = %e, "dispatch pass failed");
                    }
                }
            },
        ));

        let watchdog = state.watchdog.clone();
        jobs.push(spawn_periodic(
            "watchdog",
            Duration::from_secs(state.config.watchdog.interval_secs.max(1)),
            Duration::from_secs(state.config.watchdog.job_timeout_secs.max(1)),
            cancel.clone(),
            move || {
                let watchdog = watchdog.clone();
                async move {
                    if let Err(e) = watchdog.run_once(Utc::now()).await {
                        tracing::error!(error = %e, "watchdog pass failed");
                    }
                }
            },
        ));
    }

    if !quiet {
        println!(
            "  {} cronflow API listening on {}",
            console::style("⚡").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  Data directory: {}", state.data_dir.display());
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state);
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    for job in jobs {
        if let Err(e) = job.await {
            tracing::warn!(error = %e, "background job ended abnormally");
        }
    }

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
