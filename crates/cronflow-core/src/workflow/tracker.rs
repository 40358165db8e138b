//! Execution tracker: claims idempotency keys and records outcomes.
//!
//! A claim is a single insert against a unique key. The first caller wins;
//! every later caller gets [`TrackerError::Duplicate`] and no second row
//! exists. Terminal transitions only apply to PROCESSING rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use cronflow_types::error::RepositoryError;
use cronflow_types::execution::{ExecutionStatus, WorkflowExecution};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The key is already claimed. Callers skip the work.
    #[error("duplicate execution for idempotency key '{0}'")]
    Duplicate(String),

    #[error("no execution for idempotency key '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl TrackerError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, TrackerError::Duplicate(_))
    }
}

/// Idempotency-aware facade over the execution repository.
pub struct ExecutionTracker<E: ExecutionRepository> {
    repo: Arc<E>,
}

impl<E: ExecutionRepository> Clone for ExecutionTracker<E> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<E: ExecutionRepository> ExecutionTracker<E> {
    pub fn new(repo: Arc<E>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<E> {
        &self.repo
    }

    /// Claim `key` by inserting a PROCESSING execution.
    pub async fn mark_as_processing(
        &self,
        key: &str,
        workflow_id: Uuid,
        schedule_id: Option<Uuid>,
    ) -> Result<WorkflowExecution, TrackerError> {
        let execution =
            WorkflowExecution::processing(key.to_string(), workflow_id, schedule_id, Utc::now());

        match self.repo.insert_execution(&execution).await {
            Ok(()) => {
                tracing::debug!(
                    execution_id = %execution.id,
                    workflow_id = %workflow_id,
                    idempotency_key = key,
                    "execution claimed"
                );
                Ok(execution)
            }
            Err(RepositoryError::Conflict(_)) => Err(TrackerError::Duplicate(key.to_string())),
            Err(e) => Err(TrackerError::Repository(e)),
        }
    }

    /// PROCESSING -> COMPLETED with the final context. Returns `false` when
    /// the execution was already terminal and nothing changed.
    pub async fn mark_as_completed(&self, key: &str, result: &Value) -> Result<bool, TrackerError> {
        self.finish(key, ExecutionStatus::Completed, None, Some(result))
            .await
    }

    /// PROCESSING -> FAILED with an error message. Returns `false` when the
    /// execution was already terminal and nothing changed.
    pub async fn mark_as_failed(&self, key: &str, error_message: &str) -> Result<bool, TrackerError> {
        self.finish(key, ExecutionStatus::Failed, Some(error_message), None)
            .await
    }

    async fn finish(
        &self,
        key: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
        result: Option<&Value>,
    ) -> Result<bool, TrackerError> {
        let updated = self
            .repo
            .finish_execution(key, status, error_message, result, Utc::now())
            .await
            .map_err(TrackerError::Repository)?;
        if updated {
            return Ok(true);
        }

        match self
            .repo
            .get_execution_by_key(key)
            .await
            .map_err(TrackerError::Repository)?
        {
            Some(existing) => {
                tracing::debug!(
                    idempotency_key = key,
                    current = %existing.status,
                    requested = %status,
                    "execution already terminal, transition ignored"
                );
                Ok(false)
            }
            None => Err(TrackerError::NotFound(key.to_string())),
        }
    }

    pub async fn get_execution_status(
        &self,
        key: &str,
    ) -> Result<Option<ExecutionStatus>, TrackerError> {
        Ok(self
            .repo
            .get_execution_by_key(key)
            .await
            .map_err(TrackerError::Repository)?
            .map(|e| e.status))
    }

    pub async fn get_execution(&self, key: &str) -> Result<Option<WorkflowExecution>, TrackerError> {
        self.repo
            .get_execution_by_key(key)
            .await
            .map_err(TrackerError::Repository)
    }

    /// Count per status. Every status is present, zero when unused.
    pub async fn get_statistics(&self) -> Result<BTreeMap<ExecutionStatus, u64>, TrackerError> {
        let mut stats: BTreeMap<ExecutionStatus, u64> =
            ExecutionStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in self
            .repo
            .count_by_status()
            .await
            .map_err(TrackerError::Repository)?
        {
            stats.insert(status, count);
        }
        Ok(stats)
    }

    /// Release a key so it can be claimed again. Returns `true` if a row was removed.
    pub async fn clear_idempotency_key(&self, key: &str) -> Result<bool, TrackerError> {
        let removed = self
            .repo
            .delete_execution_by_key(key)
            .await
            .map_err(TrackerError::Repository)?;
        if removed {
            tracing::info!(idempotency_key = key, "idempotency key cleared");
        }
        Ok(removed)
    }
}
