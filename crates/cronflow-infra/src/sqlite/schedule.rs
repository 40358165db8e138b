//! SQLite schedule repository implementation.
//!
//! Schedules and their materialized runs. The `(schedule_id, planned_run_at)`
//! unique index is what keeps two dispatchers from firing the same
//! occurrence twice.

use chrono::{DateTime, Utc};
use cronflow_core::repository::schedule::ScheduleRepository;
use cronflow_types::error::RepositoryError;
use cronflow_types::schedule::{
    ScheduleRunStatus, ScheduleStatus, WorkflowSchedule, WorkflowScheduleRun,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, is_unique_violation, parse_datetime, parse_json, parse_uuid, to_json};

/// SQLite-backed implementation of `ScheduleRepository`.
pub struct SqliteScheduleRepository {
    pool: DatabasePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ScheduleRow {
    id: String,
    workflow_id: String,
    cron_expression: String,
    timezone: String,
    status: String,
    last_run_at: Option<String>,
    next_run_at: Option<String>,
    initial_context: String,
    created_at: String,
    updated_at: String,
}

impl ScheduleRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            cron_expression: row.try_get("cron_expression")?,
            timezone: row.try_get("timezone")?,
            status: row.try_get("status")?,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
            initial_context: row.try_get("initial_context")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_schedule(self) -> Result<WorkflowSchedule, RepositoryError> {
        Ok(WorkflowSchedule {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            status: self
                .status
                .parse::<ScheduleStatus>()
                .map_err(RepositoryError::Query)?,
            last_run_at: self.last_run_at.as_deref().map(parse_datetime).transpose()?,
            next_run_at: self.next_run_at.as_deref().map(parse_datetime).transpose()?,
            initial_context: parse_json(&self.initial_context, "initial_context")?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct RunRow {
    id: String,
    schedule_id: String,
    workflow_id: String,
    planned_run_at: String,
    fired_at: Option<String>,
    status: String,
    dedupe_key: String,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            schedule_id: row.try_get("schedule_id")?,
            workflow_id: row.try_get("workflow_id")?,
            planned_run_at: row.try_get("planned_run_at")?,
            fired_at: row.try_get("fired_at")?,
            status: row.try_get("status")?,
            dedupe_key: row.try_get("dedupe_key")?,
        })
    }

    fn into_run(self) -> Result<WorkflowScheduleRun, RepositoryError> {
        Ok(WorkflowScheduleRun {
            id: parse_uuid(&self.id)?,
            schedule_id: parse_uuid(&self.schedule_id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            planned_run_at: parse_datetime(&self.planned_run_at)?,
            fired_at: self.fired_at.as_deref().map(parse_datetime).transpose()?,
            status: self
                .status
                .parse::<ScheduleRunStatus>()
                .map_err(RepositoryError::Query)?,
            dedupe_key: self.dedupe_key,
        })
    }
}

fn schedules_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
    let mut schedules = Vec::with_capacity(rows.len());
    for row in rows {
        let r = ScheduleRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        schedules.push(r.into_schedule()?);
    }
    Ok(schedules)
}

// ---------------------------------------------------------------------------
// ScheduleRepository impl
// ---------------------------------------------------------------------------

impl ScheduleRepository for SqliteScheduleRepository {
    async fn create_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        let context_json = to_json(&schedule.initial_context, "initial_context")?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_schedules
               (id, workflow_id, cron_expression, timezone, status, last_run_at, next_run_at,
                initial_context, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.workflow_id.to_string())
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.status.to_string())
        .bind(schedule.last_run_at.as_ref().map(format_datetime))
        .bind(schedule.next_run_at.as_ref().map(format_datetime))
        .bind(&context_json)
        .bind(format_datetime(&schedule.created_at))
        .bind(format_datetime(&schedule.updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "schedule '{}' already exists",
                schedule.id
            ))),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn update_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        let context_json = to_json(&schedule.initial_context, "initial_context")?;

        let result = sqlx::query(
            r#"UPDATE workflow_schedules SET
                 cron_expression = ?, timezone = ?, status = ?, last_run_at = ?,
                 next_run_at = ?, initial_context = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.status.to_string())
        .bind(schedule.last_run_at.as_ref().map(format_datetime))
        .bind(schedule.next_run_at.as_ref().map(format_datetime))
        .bind(&context_json)
        .bind(format_datetime(&schedule.updated_at))
        .bind(schedule.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn record_run(
        &self,
        id: &Uuid,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_schedules SET
                 last_run_at = COALESCE(?, last_run_at), next_run_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(last_run_at.as_ref().map(format_datetime))
        .bind(format_datetime(&next_run_at))
        .bind(format_datetime(&updated_at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_schedule(&self, id: &Uuid) -> Result<Option<WorkflowSchedule>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ScheduleRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_schedule()?))
            }
            None => Ok(None),
        }
    }

    async fn list_schedules(&self) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_schedules ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        schedules_from_rows(&rows)
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_schedules
               WHERE status = 'ACTIVE' AND next_run_at IS NOT NULL AND next_run_at <= ?
               ORDER BY next_run_at ASC"#,
        )
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        schedules_from_rows(&rows)
    }

    async fn find_or_create_run(
        &self,
        run: &WorkflowScheduleRun,
    ) -> Result<(WorkflowScheduleRun, bool), RepositoryError> {
        let planned = format_datetime(&run.planned_run_at);

        let inserted = sqlx::query(
            r#"INSERT INTO workflow_schedule_runs
               (id, schedule_id, workflow_id, planned_run_at, fired_at, status, dedupe_key)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.schedule_id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(&planned)
        .bind(run.fired_at.as_ref().map(format_datetime))
        .bind(run.status.to_string())
        .bind(&run.dedupe_key)
        .execute(&self.pool.writer)
        .await;

        match inserted {
            Ok(_) => return Ok((run.clone(), true)),
            Err(e) if is_unique_violation(&e) => {}
            Err(e) => return Err(RepositoryError::Query(e.to_string())),
        }

        // Lost the race: read back the winner through the writer so the
        // committed row is visible.
        let row = sqlx::query(
            "SELECT * FROM workflow_schedule_runs WHERE schedule_id = ? AND planned_run_at = ?",
        )
        .bind(run.schedule_id.to_string())
        .bind(&planned)
        .fetch_one(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let existing = RunRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_run()?;
        Ok((existing, false))
    }

    async fn mark_run_dispatched(
        &self,
        run_id: &Uuid,
        fired_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_schedule_runs SET status = 'DISPATCHED', fired_at = ? WHERE id = ?",
        )
        .bind(format_datetime(&fired_at))
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_runs(&self, schedule_id: &Uuid) -> Result<Vec<WorkflowScheduleRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_schedule_runs WHERE schedule_id = ? ORDER BY planned_run_at DESC",
        )
        .bind(schedule_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }
}
