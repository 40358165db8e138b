//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! Services are generic over repository traits, but AppState pins them to the
//! SQLite implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cronflow_core::workflow::collaborators::Collaborators;
use cronflow_core::workflow::dispatch::DispatchJob;
use cronflow_core::workflow::engine::WorkflowEngine;
use cronflow_core::workflow::expression::ExpressionEvaluator;
use cronflow_core::workflow::idempotency::IdempotencyKeyRegistry;
use cronflow_core::workflow::runner::ExecutionRunner;
use cronflow_core::workflow::scheduler::ScheduleService;
use cronflow_core::workflow::tracker::ExecutionTracker;
use cronflow_core::workflow::trigger::TriggerService;
use cronflow_core::workflow::watchdog::Watchdog;
use cronflow_infra::collaborators::build_collaborators;
use cronflow_infra::sqlite::execution::SqliteExecutionRepository;
use cronflow_infra::sqlite::pool::{database_url, DatabasePool};
use cronflow_infra::sqlite::schedule::SqliteScheduleRepository;
use cronflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use cronflow_types::config::EngineConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteEngine = WorkflowEngine<SqliteWorkflowRepository, SqliteExecutionRepository>;

pub type ConcreteRunner = ExecutionRunner<SqliteWorkflowRepository, SqliteExecutionRepository>;

pub type ConcreteScheduleService = ScheduleService<SqliteScheduleRepository, SqliteWorkflowRepository>;

pub type ConcreteTriggerService = TriggerService<SqliteWorkflowRepository, SqliteExecutionRepository>;

pub type ConcreteDispatchJob =
    DispatchJob<SqliteScheduleRepository, SqliteWorkflowRepository, SqliteExecutionRepository>;

pub type ConcreteWatchdog =
    Watchdog<SqliteScheduleRepository, SqliteWorkflowRepository, SqliteExecutionRepository>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
    pub workflows: Arc<SqliteWorkflowRepository>,
    pub executions: Arc<SqliteExecutionRepository>,
    pub engine: Arc<ConcreteEngine>,
    pub tracker: ExecutionTracker<SqliteExecutionRepository>,
    pub runner: Arc<ConcreteRunner>,
    pub schedules: Arc<ConcreteScheduleService>,
    pub triggers: Arc<ConcreteTriggerService>,
    pub dispatch: Arc<ConcreteDispatchJob>,
    pub watchdog: Arc<ConcreteWatchdog>,
}

impl AppState {
    /// Initialize the application state: connect to DB, wire services.
    pub async fn init(data_dir: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let collaborators = build_collaborators(&config)?;

        tracing::debug!(data_dir = %data_dir.display(), "application state initialized");
        Ok(Self::wire(db_pool, data_dir, config, collaborators))
    }

    /// Wire services over an open pool with the given collaborators.
    pub fn wire(
        db_pool: DatabasePool,
        data_dir: PathBuf,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Self {
        let workflows = Arc::new(SqliteWorkflowRepository::new(db_pool.clone()));
        let executions = Arc::new(SqliteExecutionRepository::new(db_pool.clone()));
        let schedule_repo = Arc::new(SqliteScheduleRepository::new(db_pool));

        let evaluator = Arc::new(ExpressionEvaluator::new());
        let registry = Arc::new(IdempotencyKeyRegistry::new(evaluator.clone()));
        let notifier = collaborators.notifier.clone();

        let engine = Arc::new(
            WorkflowEngine::new(workflows.clone(), executions.clone(), evaluator, collaborators)
                .with_timeouts(
                    Duration::from_secs(config.execution.node_timeout_secs),
                    Duration::from_secs(config.execution.http_timeout_secs),
                ),
        );
        let tracker = ExecutionTracker::new(executions.clone());
        let runner = Arc::new(ExecutionRunner::new(engine.clone(), tracker.clone()));
        let schedules = Arc::new(ScheduleService::new(schedule_repo, workflows.clone()));
        let triggers = Arc::new(TriggerService::new(
            workflows.clone(),
            runner.clone(),
            registry,
        ));
        let dispatch = Arc::new(DispatchJob::new(
            schedules.clone(),
            runner.clone(),
            config.dispatch.max_concurrent,
        ));
        let watchdog = Arc::new(Watchdog::new(
            tracker.clone(),
            schedules.clone(),
            notifier,
            config.watchdog.stale_threshold_minutes,
            config.watchdog.operator_emails.clone(),
        ));

        Self {
            config: Arc::new(config),
            data_dir,
            workflows,
            executions,
            engine,
            tracker,
            runner,
            schedules,
            triggers,
            dispatch,
            watchdog,
        }
    }
}
