//! Schedule dispatch.
//!
//! One pass looks up every due ACTIVE schedule and, for each, materializes
//! the planned run, claims the occurrence, runs the workflow, marks the run
//! DISPATCHED and advances the schedule. Schedules are processed
//! concurrently up to `max_concurrent`; an error on one schedule is logged
//! and counted without affecting the others.
//!
//! Two guards make a pass safe to repeat or to run on several instances:
//! the run row is unique per (schedule_id, planned_run_at), and the
//! execution claim is unique per `schedule_{id}_{plannedMillis}`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use cronflow_types::error::RepositoryError;
use cronflow_types::schedule::{ScheduleRunStatus, WorkflowSchedule, WorkflowScheduleRun};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::runner::{ExecutionRunner, RunError, RunOutcome};
use super::scheduler::{ScheduleError, ScheduleService};
use super::tracker::TrackerError;
use crate::repository::execution::ExecutionRepository;
use crate::repository::schedule::ScheduleRepository;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("schedule {0} has no next run time")]
    NotPlanned(Uuid),

    /// The occurrence could not be claimed. The run stays CREATED and the
    /// schedule is not advanced, so the next pass retries it.
    #[error("execution claim failed: {0}")]
    Claim(TrackerError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Execution claim key for one schedule occurrence.
pub fn schedule_execution_key(schedule_id: Uuid, planned_run_at: DateTime<Utc>) -> String {
    format!("schedule_{schedule_id}_{}", planned_run_at.timestamp_millis())
}

/// What happened to one due schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDispatch {
    Completed,
    /// The workflow ran and failed, or could not start.
    Failed,
    /// The occurrence was already dispatched or claimed elsewhere.
    Skipped,
}

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: &Result<ScheduleDispatch, DispatchError>) {
        match outcome {
            Ok(ScheduleDispatch::Completed) => self.completed += 1,
            Ok(ScheduleDispatch::Failed) => self.failed += 1,
            Ok(ScheduleDispatch::Skipped) => self.skipped += 1,
            Err(_) => self.errors += 1,
        }
    }
}

pub struct DispatchJob<S, W, E>
where
    S: ScheduleRepository,
    W: WorkflowRepository,
    E: ExecutionRepository,
{
    schedules: Arc<ScheduleService<S, W>>,
    runner: Arc<ExecutionRunner<W, E>>,
    max_concurrent: usize,
}

impl<S, W, E> DispatchJob<S, W, E>
where
    S: ScheduleRepository,
    W: WorkflowRepository,
    E: ExecutionRepository,
{
    pub fn new(
        schedules: Arc<ScheduleService<S, W>>,
        runner: Arc<ExecutionRunner<W, E>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            schedules,
            runner,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Dispatch every schedule due at `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchReport, DispatchError> {
        let due = self.schedules.get_due_schedules(now).await?;
        let mut report = DispatchReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            tracing::debug!("no schedules due");
            return Ok(report);
        }

        let outcomes: Vec<_> = stream::iter(due)
            .map(|schedule| async move {
                let schedule_id = schedule.id;
                let workflow_id = schedule.workflow_id;
                let outcome = self.dispatch_schedule(schedule, now).await;
                if let Err(e) = &outcome {
                    tracing::error!(
                        schedule_id = %schedule_id,
                        workflow_id = %workflow_id,
                        error = %e,
                        "schedule dispatch failed"
                    );
                }
                outcome
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }
        tracing::info!(
            due = report.due,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors,
            "dispatch pass finished"
        );
        Ok(report)
    }

    /// Dispatch the pending occurrence of one schedule.
    pub async fn dispatch_schedule(
        &self,
        schedule: WorkflowSchedule,
        now: DateTime<Utc>,
    ) -> Result<ScheduleDispatch, DispatchError> {
        let planned = schedule
            .next_run_at
            .ok_or(DispatchError::NotPlanned(schedule.id))?;

        let repo = self.schedules.repository();
        let (run, created) = repo
            .find_or_create_run(&WorkflowScheduleRun::planned(&schedule, planned))
            .await?;
        if !created && run.status != ScheduleRunStatus::Created {
            tracing::debug!(
                schedule_id = %schedule.id,
                planned_run_at = %planned,
                "occurrence already dispatched"
            );
            // An earlier pass dispatched this occurrence but never advanced.
            self.schedules
                .advance_after_run(schedule.id, planned, now)
                .await?;
            return Ok(ScheduleDispatch::Skipped);
        }

        let key = schedule_execution_key(schedule.id, planned);
        let seed = Value::Object(seed_context(&schedule, &run));

        let dispatch = match self
            .runner
            .run_tracked(&key, schedule.workflow_id, Some(schedule.id), seed)
            .await
        {
            Ok(RunOutcome::Skipped { .. }) => return Ok(ScheduleDispatch::Skipped),
            Ok(RunOutcome::Completed(_)) => ScheduleDispatch::Completed,
            Ok(RunOutcome::Failed(_)) => ScheduleDispatch::Failed,
            Err(RunError::Claim(e)) => return Err(DispatchError::Claim(e)),
            Err(RunError::Workflow(e)) => {
                tracing::warn!(
                    schedule_id = %schedule.id,
                    workflow_id = %schedule.workflow_id,
                    error = %e,
                    "scheduled workflow could not start"
                );
                ScheduleDispatch::Failed
            }
            Err(RunError::Tracker(e)) => {
                tracing::error!(
                    schedule_id = %schedule.id,
                    idempotency_key = key.as_str(),
                    error = %e,
                    "execution outcome could not be recorded"
                );
                ScheduleDispatch::Failed
            }
        };

        repo.mark_run_dispatched(&run.id, Utc::now()).await?;
        let advanced = self
            .schedules
            .advance_after_run(schedule.id, planned, now)
            .await?;

        tracing::info!(
            schedule_id = %schedule.id,
            schedule_run_id = %run.id,
            planned_run_at = %planned,
            next_run_at = ?advanced.next_run_at,
            outcome = ?dispatch,
            "schedule dispatched"
        );
        Ok(dispatch)
    }
}

/// Schedule seed plus run metadata.
fn seed_context(
    schedule: &WorkflowSchedule,
    run: &WorkflowScheduleRun,
) -> serde_json::Map<String, Value> {
    let mut seed = schedule.initial_context.clone();
    seed.insert("schedule_run_id".to_string(), Value::String(run.id.to_string()));
    seed.insert("schedule_id".to_string(), Value::String(schedule.id.to_string()));
    seed.insert(
        "planned_run_at".to_string(),
        Value::String(
            run.planned_run_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    );
    seed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use cronflow_types::execution::ExecutionStatus;
    use cronflow_types::schedule::{NewSchedule, ScheduleStatus, ScheduleUpdate};
    use serde_json::json;

    use crate::testing::{InMemoryStore, TestCollaborators};
    use crate::workflow::definition::parse_workflow_yaml;
    use crate::workflow::engine::WorkflowEngine;
    use crate::workflow::expression::ExpressionEvaluator;
    use crate::workflow::tracker::ExecutionTracker;

    const YAML: &str = r#"
name: digest
nodes:
  - id: start
    config:
      type: TRIGGER
      output_data_points:
        - name: institute
          expression: "instituteId"
"#;

    type Job = DispatchJob<InMemoryStore, InMemoryStore, InMemoryStore>;

    struct Fixture {
        job: Job,
        schedules: Arc<ScheduleService<InMemoryStore, InMemoryStore>>,
        store: Arc<InMemoryStore>,
        workflow_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::default());
        let def = parse_workflow_yaml(YAML).unwrap();
        store.save_workflow(&def).await.unwrap();
        let engine = WorkflowEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(ExpressionEvaluator::new()),
            TestCollaborators::default().bundle(),
        );
        let runner = Arc::new(ExecutionRunner::new(
            Arc::new(engine),
            ExecutionTracker::new(store.clone()),
        ));
        let schedules = Arc::new(ScheduleService::new(store.clone(), store.clone()));
        Fixture {
            job: DispatchJob::new(schedules.clone(), runner, 4),
            schedules,
            store,
            workflow_id: def.id,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    async fn create(f: &Fixture, cron: &str, created: DateTime<Utc>) -> WorkflowSchedule {
        let mut initial_context = serde_json::Map::new();
        initial_context.insert("instituteId".to_string(), json!("inst-7"));
        f.schedules
            .create_schedule(
                NewSchedule {
                    workflow_id: f.workflow_id,
                    cron_expression: cron.to_string(),
                    timezone: "UTC".to_string(),
                    initial_context,
                },
                created,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_runs_due_schedule_and_advances() {
        let f = fixture().await;
        let schedule = create(&f, "every 5 minutes", at(9, 2, 0)).await;

        let report = f.job.run_once(at(9, 5, 10)).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.completed, 1);

        let runs = f.store.list_runs(&schedule.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ScheduleRunStatus::Dispatched);
        assert_eq!(runs[0].planned_run_at, at(9, 5, 0));

        let key = schedule_execution_key(schedule.id, at(9, 5, 0));
        let execution = f.store.get_execution_by_key(&key).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.schedule_id, Some(schedule.id));
        let result = execution.result.unwrap();
        assert_eq!(result["institute"], json!("inst-7"));
        assert_eq!(result["schedule_id"], json!(schedule.id.to_string()));
        assert_eq!(result["schedule_run_id"], json!(runs[0].id.to_string()));
        assert_eq!(result["planned_run_at"], json!("2026-03-01T09:05:00.000Z"));

        let advanced = f.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(advanced.last_run_at, Some(at(9, 5, 0)));
        assert_eq!(advanced.next_run_at, Some(at(9, 10, 0)));
    }

    #[tokio::test]
    async fn test_same_occurrence_dispatched_twice_creates_one_run() {
        let f = fixture().await;
        let schedule = create(&f, "every 5 minutes", at(9, 2, 0)).await;

        let first = f
            .job
            .dispatch_schedule(schedule.clone(), at(9, 5, 10))
            .await
            .unwrap();
        let second = f
            .job
            .dispatch_schedule(schedule.clone(), at(9, 5, 20))
            .await
            .unwrap();

        assert_eq!(first, ScheduleDispatch::Completed);
        assert_eq!(second, ScheduleDispatch::Skipped);
        assert_eq!(f.store.run_count(), 1);
        assert_eq!(f.store.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_deactivation_during_dispatch_is_kept() {
        let f = fixture().await;
        let schedule = create(&f, "every 5 minutes", at(9, 2, 0)).await;
        let mut due = f.schedules.get_due_schedules(at(9, 5, 10)).await.unwrap();
        let snapshot = due.remove(0);

        f.schedules
            .deactivate_schedule(schedule.id, at(9, 5, 11))
            .await
            .unwrap();
        let outcome = f
            .job
            .dispatch_schedule(snapshot, at(9, 5, 12))
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleDispatch::Completed);

        let after = f.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Inactive);
        assert_eq!(after.last_run_at, Some(at(9, 5, 0)));
    }

    #[tokio::test]
    async fn test_cron_edit_during_dispatch_drives_next_run() {
        let f = fixture().await;
        let schedule = create(&f, "every 5 minutes", at(9, 2, 0)).await;
        let mut due = f.schedules.get_due_schedules(at(9, 5, 10)).await.unwrap();
        let snapshot = due.remove(0);

        f.schedules
            .update_schedule(
                schedule.id,
                ScheduleUpdate {
                    cron_expression: Some("hourly".to_string()),
                    ..Default::default()
                },
                at(9, 5, 11),
            )
            .await
            .unwrap();
        f.job.dispatch_schedule(snapshot, at(9, 5, 12)).await.unwrap();

        let after = f.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(after.cron_expression, "0 0 * * * *");
        assert_eq!(after.next_run_at, Some(at(10, 0, 0)));
    }

    #[tokio::test]
    async fn test_failed_claim_leaves_occurrence_for_next_pass() {
        let f = fixture().await;
        let schedule = create(&f, "every 5 minutes", at(9, 2, 0)).await;

        f.store.reject_execution_inserts(true);
        let err = f
            .job
            .dispatch_schedule(schedule.clone(), at(9, 5, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Claim(_)));

        let runs = f.store.list_runs(&schedule.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ScheduleRunStatus::Created);
        let unchanged = f.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(unchanged.next_run_at, Some(at(9, 5, 0)));
        assert!(unchanged.last_run_at.is_none());

        f.store.reject_execution_inserts(false);
        let report = f.job.run_once(at(9, 6, 0)).await.unwrap();
        assert_eq!(report.completed, 1);
        let runs = f.store.list_runs(&schedule.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ScheduleRunStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_nothing_due() {
        let f = fixture().await;
        create(&f, "daily", at(9, 0, 0)).await;

        let report = f.job.run_once(at(9, 30, 0)).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert_eq!(f.store.run_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_workflow_is_isolated() {
        let f = fixture().await;
        let good = create(&f, "every minute", at(9, 0, 0)).await;

        // A schedule whose workflow was never stored.
        let mut orphan = good.clone();
        orphan.id = Uuid::now_v7();
        orphan.workflow_id = Uuid::now_v7();
        f.store.create_schedule(&orphan).await.unwrap();

        let report = f.job.run_once(at(9, 1, 5)).await.unwrap();
        assert_eq!(report.due, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);

        let orphan_after = f.schedules.get_schedule(orphan.id).await.unwrap().unwrap();
        assert!(orphan_after.next_run_at.unwrap() > at(9, 1, 5));
    }

    #[tokio::test]
    async fn test_late_pass_skips_missed_occurrences() {
        let f = fixture().await;
        let schedule = create(&f, "every minute", at(9, 0, 0)).await;

        let late = at(9, 0, 0) + Duration::minutes(10);
        f.job.run_once(late).await.unwrap();

        let advanced = f.schedules.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(advanced.last_run_at, Some(at(9, 1, 0)));
        assert_eq!(advanced.next_run_at, Some(at(9, 11, 0)));
    }
}
