//! SQLite execution repository implementation.
//!
//! The unique `idempotency_key` column is the claim: inserting a second
//! PROCESSING row for the same key fails atomically with `Conflict`.

use chrono::{DateTime, Utc};
use cronflow_core::repository::execution::ExecutionRepository;
use cronflow_types::error::RepositoryError;
use cronflow_types::execution::{
    ExecutionStatus, LogFilter, LogQuery, NodeLogStatus, Page, WorkflowExecution,
    WorkflowExecutionLog,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, is_unique_violation, parse_datetime, parse_json, parse_uuid, to_json};

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_id: String,
    schedule_id: Option<String>,
    idempotency_key: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    error_message: Option<String>,
    result: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            schedule_id: row.try_get("schedule_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
            result: row.try_get("result")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            schedule_id: self.schedule_id.as_deref().map(parse_uuid).transpose()?,
            idempotency_key: self.idempotency_key,
            status: self
                .status
                .parse::<ExecutionStatus>()
                .map_err(RepositoryError::Query)?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            error_message: self.error_message,
            result: self
                .result
                .as_deref()
                .map(|s| parse_json(s, "result"))
                .transpose()?,
        })
    }
}

struct LogRow {
    id: String,
    execution_id: String,
    node_id: String,
    node_template_id: Option<String>,
    node_type: String,
    status: String,
    context_before: String,
    context_after: Option<String>,
    error: Option<String>,
    timestamp: String,
}

impl LogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            node_id: row.try_get("node_id")?,
            node_template_id: row.try_get("node_template_id")?,
            node_type: row.try_get("node_type")?,
            status: row.try_get("status")?,
            context_before: row.try_get("context_before")?,
            context_after: row.try_get("context_after")?,
            error: row.try_get("error")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_log(self) -> Result<WorkflowExecutionLog, RepositoryError> {
        Ok(WorkflowExecutionLog {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            node_id: self.node_id,
            node_template_id: self.node_template_id,
            node_type: self.node_type,
            status: self
                .status
                .parse::<NodeLogStatus>()
                .map_err(RepositoryError::Query)?,
            context_before: parse_json(&self.context_before, "context_before")?,
            context_after: self
                .context_after
                .as_deref()
                .map(|s| parse_json(s, "context_after"))
                .transpose()?,
            error: self.error,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

fn executions_from_rows(
    rows: &[sqlx::sqlite::SqliteRow],
) -> Result<Vec<WorkflowExecution>, RepositoryError> {
    let mut executions = Vec::with_capacity(rows.len());
    for row in rows {
        let r = ExecutionRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        executions.push(r.into_execution()?);
    }
    Ok(executions)
}

/// `WHERE` clause and bind values for a log filter.
fn log_filter_clause(filter: &LogFilter) -> (&'static str, Vec<String>) {
    match filter {
        LogFilter::Execution(id) => ("execution_id = ?", vec![id.to_string()]),
        LogFilter::Node(id) => ("node_id = ?", vec![id.clone()]),
        LogFilter::NodeTemplate(id) => ("node_template_id = ?", vec![id.clone()]),
        LogFilter::TimeRange { from, to } => (
            "timestamp >= ? AND timestamp <= ?",
            vec![format_datetime(from), format_datetime(to)],
        ),
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let result_json = execution
            .result
            .as_ref()
            .map(|v| to_json(v, "result"))
            .transpose()?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, workflow_id, schedule_id, idempotency_key, status, started_at,
                completed_at, error_message, result)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.schedule_id.map(|id| id.to_string()))
        .bind(&execution.idempotency_key)
        .bind(execution.status.as_str())
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error_message)
        .bind(&result_json)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "idempotency key '{}' already exists",
                execution.idempotency_key
            ))),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_execution_by_key(&self, key: &str) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn finish_execution(
        &self,
        key: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
        result: Option<&serde_json::Value>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result_json = result.map(|v| to_json(v, "result")).transpose()?;

        let updated = sqlx::query(
            r#"UPDATE workflow_executions
               SET status = ?, error_message = ?, result = ?, completed_at = ?
               WHERE idempotency_key = ? AND status = 'PROCESSING'"#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(&result_json)
        .bind(format_datetime(&completed_at))
        .bind(key)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(updated.rows_affected() > 0)
    }

    async fn find_stale_executions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions
               WHERE status = 'PROCESSING' AND started_at < ?
               ORDER BY started_at ASC"#,
        )
        .bind(format_datetime(&cutoff))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        executions_from_rows(&rows)
    }

    async fn count_by_status(&self) -> Result<Vec<(ExecutionStatus, u64)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM workflow_executions GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let status = status
                .parse::<ExecutionStatus>()
                .map_err(RepositoryError::Query)?;
            counts.push((status, count.max(0) as u64));
        }
        Ok(counts)
    }

    async fn delete_execution_by_key(&self, key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE idempotency_key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_log(&self, log: &WorkflowExecutionLog) -> Result<(), RepositoryError> {
        let context_before = to_json(&log.context_before, "context_before")?;
        let context_after = log
            .context_after
            .as_ref()
            .map(|v| to_json(v, "context_after"))
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_execution_logs
               (id, execution_id, node_id, node_template_id, node_type, status,
                context_before, context_after, error, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(log.id.to_string())
        .bind(log.execution_id.to_string())
        .bind(&log.node_id)
        .bind(&log.node_template_id)
        .bind(&log.node_type)
        .bind(log.status.as_str())
        .bind(&context_before)
        .bind(&context_after)
        .bind(&log.error)
        .bind(format_datetime(&log.timestamp))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Page<WorkflowExecutionLog>, RepositoryError> {
        let (clause, binds) = log_filter_clause(&query.filter);

        let count_sql = format!("SELECT COUNT(*) FROM workflow_execution_logs WHERE {clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for value in &binds {
            count_query = count_query.bind(value);
        }
        let total = count_query
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let page_sql = format!(
            "SELECT * FROM workflow_execution_logs WHERE {clause} \
             ORDER BY timestamp ASC, id ASC LIMIT ? OFFSET ?"
        );
        let mut page_query = sqlx::query(&page_sql);
        for value in &binds {
            page_query = page_query.bind(value);
        }
        let rows = page_query
            .bind(i64::from(query.size))
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = LogRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            items.push(r.into_log()?);
        }

        Ok(Page {
            items,
            page: query.page,
            size: query.size,
            total: total.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    async fn repo() -> SqliteExecutionRepository {
        SqliteExecutionRepository::new(test_pool().await)
    }

    fn log(execution_id: Uuid, node_id: &str, template: Option<&str>, ts: DateTime<Utc>) -> WorkflowExecutionLog {
        WorkflowExecutionLog {
            id: Uuid::now_v7(),
            execution_id,
            node_id: node_id.to_string(),
            node_template_id: template.map(str::to_string),
            node_type: "TRANSFORM".to_string(),
            status: NodeLogStatus::Completed,
            context_before: json!({"n": 1}),
            context_after: Some(json!({"n": 1, "doubled": 2})),
            error: None,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_duplicate_key_is_conflict() {
        let repo = repo().await;
        let first = WorkflowExecution::processing("k1".to_string(), Uuid::now_v7(), None, at(9, 0));
        repo.insert_execution(&first).await.unwrap();

        let second = WorkflowExecution::processing("k1".to_string(), Uuid::now_v7(), None, at(9, 1));
        let err = repo.insert_execution(&second).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let stored = repo.get_execution_by_key("k1").await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.started_at, at(9, 0));
    }

    #[tokio::test]
    async fn test_finish_only_moves_processing_rows() {
        let repo = repo().await;
        let schedule_id = Uuid::now_v7();
        let execution =
            WorkflowExecution::processing("k2".to_string(), Uuid::now_v7(), Some(schedule_id), at(9, 0));
        repo.insert_execution(&execution).await.unwrap();

        let result = json!({"doubled": 42});
        assert!(repo
            .finish_execution("k2", ExecutionStatus::Completed, None, Some(&result), at(9, 1))
            .await
            .unwrap());
        assert!(!repo
            .finish_execution("k2", ExecutionStatus::Failed, Some("late"), None, at(9, 2))
            .await
            .unwrap());
        assert!(!repo
            .finish_execution("missing", ExecutionStatus::Failed, None, None, at(9, 2))
            .await
            .unwrap());

        let stored = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.schedule_id, Some(schedule_id));
        assert_eq!(stored.result, Some(result));
        assert_eq!(stored.completed_at, Some(at(9, 1)));
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_stale_executions_and_counts() {
        let repo = repo().await;
        let workflow_id = Uuid::now_v7();
        for (key, started) in [("old", at(8, 0)), ("older", at(7, 0)), ("fresh", at(9, 50))] {
            repo.insert_execution(&WorkflowExecution::processing(
                key.to_string(),
                workflow_id,
                None,
                started,
            ))
            .await
            .unwrap();
        }
        repo.finish_execution("old", ExecutionStatus::Failed, Some("boom"), None, at(8, 1))
            .await
            .unwrap();

        let stale: Vec<String> = repo
            .find_stale_executions(at(9, 0))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.idempotency_key)
            .collect();
        assert_eq!(stale, vec!["older"]);

        let counts = repo.count_by_status().await.unwrap();
        assert!(counts.contains(&(ExecutionStatus::Processing, 2)));
        assert!(counts.contains(&(ExecutionStatus::Failed, 1)));
        assert!(!counts.iter().any(|(s, _)| *s == ExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn test_delete_frees_key() {
        let repo = repo().await;
        let workflow_id = Uuid::now_v7();
        repo.insert_execution(&WorkflowExecution::processing("k3".to_string(), workflow_id, None, at(9, 0)))
            .await
            .unwrap();

        assert!(repo.delete_execution_by_key("k3").await.unwrap());
        assert!(!repo.delete_execution_by_key("k3").await.unwrap());
        repo.insert_execution(&WorkflowExecution::processing("k3".to_string(), workflow_id, None, at(9, 5)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_query_logs_by_filter_and_page() {
        let repo = repo().await;
        let exec_a = Uuid::now_v7();
        let exec_b = Uuid::now_v7();
        for i in 0..5 {
            repo.append_log(&log(exec_a, "transform", Some("tpl-1"), at(9, i)))
                .await
                .unwrap();
        }
        repo.append_log(&log(exec_b, "notify", None, at(10, 0))).await.unwrap();

        let page = repo
            .query_logs(&LogQuery::new(LogFilter::Execution(exec_a), 1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].timestamp, at(9, 2));
        assert_eq!(page.items[0].context_after, Some(json!({"n": 1, "doubled": 2})));

        let by_node = repo
            .query_logs(&LogQuery::new(LogFilter::Node("notify".to_string()), 0, 20))
            .await
            .unwrap();
        assert_eq!(by_node.total, 1);
        assert_eq!(by_node.items[0].execution_id, exec_b);

        let by_template = repo
            .query_logs(&LogQuery::new(LogFilter::NodeTemplate("tpl-1".to_string()), 0, 20))
            .await
            .unwrap();
        assert_eq!(by_template.total, 5);

        let by_range = repo
            .query_logs(&LogQuery::new(
                LogFilter::TimeRange {
                    from: at(9, 3),
                    to: at(10, 0),
                },
                0,
                20,
            ))
            .await
            .unwrap();
        assert_eq!(by_range.total, 3);
    }
}
