//! Execution repository trait definition.
//!
//! Covers tracked executions (one row per idempotency key) and the
//! append-only per-node execution log.

use chrono::{DateTime, Utc};
use cronflow_types::error::RepositoryError;
use cronflow_types::execution::{
    ExecutionStatus, LogQuery, Page, WorkflowExecution, WorkflowExecutionLog,
};
use uuid::Uuid;

/// Repository trait for execution tracking and node logs.
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Insert an execution. An existing idempotency key is a `Conflict` and
    /// leaves the stored row untouched.
    fn insert_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution_by_key(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Move a PROCESSING execution to a terminal status. Returns `false` when
    /// the row was not PROCESSING (already terminal or missing).
    fn finish_execution(
        &self,
        key: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
        result: Option<&serde_json::Value>,
        completed_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// PROCESSING executions started before `cutoff`, oldest first.
    fn find_stale_executions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Row count per status. Statuses with no rows may be omitted.
    fn count_by_status(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(ExecutionStatus, u64)>, RepositoryError>> + Send;

    /// Delete the execution holding `key`. Returns `true` if it existed.
    fn delete_execution_by_key(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Node logs
    // -----------------------------------------------------------------------

    fn append_log(
        &self,
        log: &WorkflowExecutionLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Logs matching the query, ordered by timestamp ascending.
    fn query_logs(
        &self,
        query: &LogQuery,
    ) -> impl std::future::Future<Output = Result<Page<WorkflowExecutionLog>, RepositoryError>> + Send;
}
