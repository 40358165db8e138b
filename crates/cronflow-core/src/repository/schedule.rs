//! Schedule repository trait definition.

use chrono::{DateTime, Utc};
use cronflow_types::error::RepositoryError;
use cronflow_types::schedule::{WorkflowSchedule, WorkflowScheduleRun};
use uuid::Uuid;

/// Repository trait for schedules and their materialized runs.
pub trait ScheduleRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    fn create_schedule(
        &self,
        schedule: &WorkflowSchedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace a stored schedule. Missing id is `NotFound`.
    fn update_schedule(
        &self,
        schedule: &WorkflowSchedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Write only the run bookkeeping columns. A `None` `last_run_at` keeps
    /// the stored value. Missing id is `NotFound`.
    fn record_run(
        &self,
        id: &Uuid,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_schedule(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowSchedule>, RepositoryError>> + Send;

    fn list_schedules(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    /// ACTIVE schedules with `next_run_at <= now`, oldest first.
    fn due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert `run` unless a run for the same (schedule_id, planned_run_at)
    /// exists. Returns the stored run and whether this call created it.
    fn find_or_create_run(
        &self,
        run: &WorkflowScheduleRun,
    ) -> impl std::future::Future<Output = Result<(WorkflowScheduleRun, bool), RepositoryError>> + Send;

    /// Flip a run from CREATED to DISPATCHED.
    fn mark_run_dispatched(
        &self,
        run_id: &Uuid,
        fired_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Runs of one schedule, newest planned instant first.
    fn list_runs(
        &self,
        schedule_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowScheduleRun>, RepositoryError>> + Send;
}
