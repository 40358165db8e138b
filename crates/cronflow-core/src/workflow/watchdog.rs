//! Stale execution recovery.
//!
//! An execution left in PROCESSING longer than the threshold (a crashed
//! instance, a hung collaborator) is marked FAILED, reported to the
//! operator list, and its schedule is moved past the stuck occurrence so
//! dispatch resumes.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cronflow_types::error::RepositoryError;
use cronflow_types::execution::WorkflowExecution;
use cronflow_types::notification::{NotificationMessage, Recipient};
use serde::Serialize;
use uuid::Uuid;

use super::collaborators::Notifier;
use super::scheduler::ScheduleService;
use super::tracker::ExecutionTracker;
use crate::repository::execution::ExecutionRepository;
use crate::repository::schedule::ScheduleRepository;
use crate::repository::workflow::WorkflowRepository;

/// Source type attached to watchdog alerts.
pub const WATCHDOG_SOURCE: &str = "WATCHDOG";

/// Recorded as the error message of a recovered execution.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "execution {execution_id} stuck in PROCESSING since {started_at} (threshold {threshold_minutes} minutes)"
)]
pub struct StaleExecutionError {
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub threshold_minutes: i64,
}

/// Counters for one watchdog pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogReport {
    pub stale: usize,
    pub recovered: usize,
    pub alerted: usize,
    pub schedules_advanced: usize,
    pub errors: usize,
}

pub struct Watchdog<S, W, E>
where
    S: ScheduleRepository,
    W: WorkflowRepository,
    E: ExecutionRepository,
{
    tracker: ExecutionTracker<E>,
    schedules: Arc<ScheduleService<S, W>>,
    notifier: Arc<dyn Notifier>,
    threshold: Duration,
    operator_emails: Vec<String>,
}

impl<S, W, E> Watchdog<S, W, E>
where
    S: ScheduleRepository,
    W: WorkflowRepository,
    E: ExecutionRepository,
{
    pub fn new(
        tracker: ExecutionTracker<E>,
        schedules: Arc<ScheduleService<S, W>>,
        notifier: Arc<dyn Notifier>,
        threshold_minutes: u64,
        operator_emails: Vec<String>,
    ) -> Self {
        Self {
            tracker,
            schedules,
            notifier,
            threshold: i64::try_from(threshold_minutes)
                .ok()
                .and_then(Duration::try_minutes)
                .unwrap_or(Duration::MAX),
            operator_emails,
        }
    }

    /// Recover every execution that started before `now - threshold`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<WatchdogReport, RepositoryError> {
        let cutoff = now
            .checked_sub_signed(self.threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale = self
            .tracker
            .repository()
            .find_stale_executions(cutoff)
            .await?;

        let mut report = WatchdogReport {
            stale: stale.len(),
            ..Default::default()
        };
        if stale.is_empty() {
            tracing::debug!(cutoff = %cutoff, "no stale executions");
            return Ok(report);
        }

        for execution in &stale {
            self.recover(execution, now, &mut report).await;
        }

        tracing::info!(
            stale = report.stale,
            recovered = report.recovered,
            alerted = report.alerted,
            schedules_advanced = report.schedules_advanced,
            errors = report.errors,
            "watchdog pass finished"
        );
        Ok(report)
    }

    async fn recover(
        &self,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
        report: &mut WatchdogReport,
    ) {
        let stale = StaleExecutionError {
            execution_id: execution.id,
            started_at: execution.started_at,
            threshold_minutes: self.threshold.num_minutes(),
        };
        tracing::warn!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            schedule_id = ?execution.schedule_id,
            idempotency_key = execution.idempotency_key.as_str(),
            started_at = %execution.started_at,
            "recovering stale execution"
        );

        match self
            .tracker
            .mark_as_failed(&execution.idempotency_key, &stale.to_string())
            .await
        {
            Ok(true) => report.recovered += 1,
            Ok(false) => {
                tracing::debug!(
                    execution_id = %execution.id,
                    "execution finished before recovery, nothing to do"
                );
                return;
            }
            Err(e) => {
                tracing::error!(execution_id = %execution.id, error = %e, "failed to mark stale execution");
                report.errors += 1;
                return;
            }
        }

        if !self.operator_emails.is_empty() {
            match self.notifier.send(self.alert(execution)).await {
                Ok(()) => report.alerted += 1,
                Err(e) => {
                    tracing::error!(execution_id = %execution.id, error = %e, "stale execution alert failed");
                    report.errors += 1;
                }
            }
        }

        if let Some(schedule_id) = execution.schedule_id {
            match self.schedules.force_advance_schedule(schedule_id, now).await {
                Ok(_) => report.schedules_advanced += 1,
                Err(e) => {
                    tracing::error!(
                        execution_id = %execution.id,
                        schedule_id = %schedule_id,
                        error = %e,
                        "failed to advance schedule of stale execution"
                    );
                    report.errors += 1;
                }
            }
        }
    }

    fn alert(&self, execution: &WorkflowExecution) -> NotificationMessage {
        let schedule = execution
            .schedule_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let html_body = format!(
            "<p>A workflow execution was stuck in PROCESSING and has been marked FAILED.</p>\
             <ul>\
             <li>Workflow: {}</li>\
             <li>Execution: {}</li>\
             <li>Schedule: {}</li>\
             <li>Started: {}</li>\
             </ul>",
            execution.workflow_id,
            execution.id,
            schedule,
            execution
                .started_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        NotificationMessage {
            subject: format!("Stale workflow execution {}", execution.id),
            html_body,
            recipients: self
                .operator_emails
                .iter()
                .map(|email| Recipient::channel(email.as_str()))
                .collect(),
            source_type: WATCHDOG_SOURCE.to_string(),
            source_id: execution.id.to_string(),
        }
    }
}
