//! Tracked execution: claim a key, run the engine, record the outcome.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::definition::WorkflowError;
use super::engine::{ExecutionResult, WorkflowEngine};
use super::tracker::{ExecutionTracker, TrackerError};
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The claim itself could not be stored; nothing ran.
    #[error("execution claim failed: {0}")]
    Claim(TrackerError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// What happened to one tracked run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(ExecutionResult),
    Failed(ExecutionResult),
    /// The key was already claimed; nothing ran.
    Skipped { idempotency_key: String },
}

impl RunOutcome {
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Failed(r) => Some(r),
            RunOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped { .. })
    }
}

/// Engine plus tracker. Every run goes through a claim first.
pub struct ExecutionRunner<W: WorkflowRepository, E: ExecutionRepository> {
    engine: Arc<WorkflowEngine<W, E>>,
    tracker: ExecutionTracker<E>,
}

impl<W: WorkflowRepository, E: ExecutionRepository> ExecutionRunner<W, E> {
    pub fn new(engine: Arc<WorkflowEngine<W, E>>, tracker: ExecutionTracker<E>) -> Self {
        Self { engine, tracker }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine<W, E>> {
        &self.engine
    }

    pub fn tracker(&self) -> &ExecutionTracker<E> {
        &self.tracker
    }

    /// Claim `key`, run the workflow and mark the execution COMPLETED or
    /// FAILED. A duplicate claim is a benign skip.
    ///
    /// Load errors (unknown or inactive workflow, bad seed) mark the claimed
    /// execution FAILED and are returned.
    pub async fn run_tracked(
        &self,
        key: &str,
        workflow_id: Uuid,
        schedule_id: Option<Uuid>,
        seed: Value,
    ) -> Result<RunOutcome, RunError> {
        let execution = match self
            .tracker
            .mark_as_processing(key, workflow_id, schedule_id)
            .await
        {
            Ok(execution) => execution,
            Err(e) if e.is_duplicate() => {
                tracing::debug!(
                    workflow_id = %workflow_id,
                    idempotency_key = key,
                    "execution already claimed, skipping"
                );
                return Ok(RunOutcome::Skipped {
                    idempotency_key: key.to_string(),
                });
            }
            Err(e) => return Err(RunError::Claim(e)),
        };

        let result = match self.engine.execute(execution.id, workflow_id, seed).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    workflow_id = %workflow_id,
                    execution_id = %execution.id,
                    error = %e,
                    "workflow could not start"
                );
                self.tracker.mark_as_failed(key, &e.to_string()).await?;
                return Err(e.into());
            }
        };

        if result.is_completed() {
            self.tracker.mark_as_completed(key, &result.context).await?;
            tracing::info!(
                workflow_id = %workflow_id,
                execution_id = %execution.id,
                nodes = result.completed_nodes.len(),
                "execution completed"
            );
            Ok(RunOutcome::Completed(result))
        } else {
            let message = result.error.as_deref().unwrap_or("execution failed");
            self.tracker.mark_as_failed(key, message).await?;
            tracing::warn!(
                workflow_id = %workflow_id,
                execution_id = %execution.id,
                error = message,
                "execution failed"
            );
            Ok(RunOutcome::Failed(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronflow_types::execution::ExecutionStatus;
    use serde_json::json;

    use crate::testing::{InMemoryStore, TestCollaborators};
    use crate::workflow::definition::parse_workflow_yaml;
    use crate::workflow::expression::ExpressionEvaluator;

    const YAML: &str = r#"
name: tracked
nodes:
  - id: start
    config: { type: TRIGGER }
    next: compute
  - id: compute
    config:
      type: TRANSFORM
      fields:
        - name: doubled
          expression: "n * 2"
        - name: label
          expression: "tag"
"#;

    async fn runner() -> (ExecutionRunner<InMemoryStore, InMemoryStore>, Arc<InMemoryStore>, Uuid) {
        let store = Arc::new(InMemoryStore::default());
        let def = parse_workflow_yaml(YAML).unwrap();
        store.save_workflow(&def).await.unwrap();
        let engine = WorkflowEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(ExpressionEvaluator::new()),
            TestCollaborators::default().bundle(),
        );
        let runner = ExecutionRunner::new(Arc::new(engine), ExecutionTracker::new(store.clone()));
        (runner, store, def.id)
    }

    #[tokio::test]
    async fn test_completed_run_records_result() {
        let (runner, _store, workflow_id) = runner().await;

        let outcome = runner
            .run_tracked("k-1", workflow_id, None, json!({"n": 21, "tag": "a"}))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        let execution = runner.tracker().get_execution("k-1").await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.result.unwrap()["doubled"], json!(42.0));
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_second_run_with_same_key_is_skipped() {
        let (runner, store, workflow_id) = runner().await;

        runner
            .run_tracked("k-1", workflow_id, None, json!({"n": 1, "tag": "a"}))
            .await
            .unwrap();
        let second = runner
            .run_tracked("k-1", workflow_id, None, json!({"n": 1, "tag": "a"}))
            .await
            .unwrap();

        assert!(second.is_skipped());
        assert_eq!(store.execution_count(), 1);
        // Only the first run wrote node logs.
        assert_eq!(store.logs().len(), 2);
    }

    #[tokio::test]
    async fn test_node_failure_marks_execution_failed() {
        let (runner, _store, workflow_id) = runner().await;

        let outcome = runner
            .run_tracked("k-2", workflow_id, None, json!({"n": 1}))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(_)));

        let execution = runner.tracker().get_execution("k-2").await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error_message.unwrap().contains("compute"));
    }

    #[tokio::test]
    async fn test_unknown_workflow_fails_claim() {
        let (runner, _store, _) = runner().await;

        let err = runner
            .run_tracked("k-3", Uuid::now_v7(), None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Workflow(WorkflowError::NotFound(_))));
        assert_eq!(
            runner.tracker().get_execution_status("k-3").await.unwrap(),
            Some(ExecutionStatus::Failed)
        );
    }
}
