//! Event-driven workflow triggers.
//!
//! `TriggerService` binds external event names to workflows. When an event
//! arrives, every ACTIVE trigger for that name gets an idempotency key from
//! the registry (per the trigger's settings) and runs its workflow through
//! the tracked runner. A duplicate key is reported as skipped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronflow_types::error::RepositoryError;
use cronflow_types::workflow::WorkflowTrigger;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::idempotency::{IdempotencyKeyRegistry, KeyRequest};
use super::runner::{ExecutionRunner, RunOutcome};
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("trigger registration failed: {0}")]
    RegistrationFailed(String),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An external event delivered to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Caller-supplied event id. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Seed for the execution context.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// Result of one trigger handling an event.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerFiring {
    pub trigger_id: Uuid,
    pub workflow_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// `COMPLETED`, `FAILED`, `SKIPPED` or `ERROR`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TriggerFiring {
    fn error(trigger: &WorkflowTrigger, key: Option<String>, message: String) -> Self {
        Self {
            trigger_id: trigger.id,
            workflow_id: trigger.workflow_id,
            idempotency_key: key,
            status: "ERROR".to_string(),
            execution_id: None,
            error: Some(message),
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerService
// ---------------------------------------------------------------------------

pub struct TriggerService<W: WorkflowRepository, E: ExecutionRepository> {
    workflows: Arc<W>,
    runner: Arc<ExecutionRunner<W, E>>,
    registry: Arc<IdempotencyKeyRegistry>,
}

impl<W: WorkflowRepository, E: ExecutionRepository> TriggerService<W, E> {
    pub fn new(
        workflows: Arc<W>,
        runner: Arc<ExecutionRunner<W, E>>,
        registry: Arc<IdempotencyKeyRegistry>,
    ) -> Self {
        Self {
            workflows,
            runner,
            registry,
        }
    }

    /// Validate and store a trigger. The workflow must exist.
    pub async fn register_trigger(&self, trigger: WorkflowTrigger) -> Result<WorkflowTrigger, TriggerError> {
        if trigger.event_name.trim().is_empty() {
            return Err(TriggerError::RegistrationFailed(
                "event name must not be empty".to_string(),
            ));
        }
        if self.workflows.get_workflow(&trigger.workflow_id).await?.is_none() {
            return Err(TriggerError::WorkflowNotFound(trigger.workflow_id));
        }
        self.workflows.save_trigger(&trigger).await?;

        tracing::info!(
            trigger_id = %trigger.id,
            workflow_id = %trigger.workflow_id,
            event_name = trigger.event_name.as_str(),
            strategy = %trigger.idempotency.strategy,
            "trigger registered"
        );
        Ok(trigger)
    }

    pub async fn list_triggers(&self) -> Result<Vec<WorkflowTrigger>, TriggerError> {
        Ok(self.workflows.list_triggers().await?)
    }

    /// Fan an event out to every ACTIVE trigger bound to `event_name`.
    ///
    /// Triggers are handled in order and independently: a configuration or
    /// run error on one is reported in its firing and does not stop the rest.
    pub async fn dispatch_event(
        &self,
        event_name: &str,
        event: TriggerEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<TriggerFiring>, TriggerError> {
        let triggers = self.workflows.triggers_for_event(event_name).await?;
        let event_id = event
            .event_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        tracing::info!(
            event_name,
            event_id = event_id.as_str(),
            triggers = triggers.len(),
            "event received"
        );

        let mut firings = Vec::with_capacity(triggers.len());
        for trigger in &triggers {
            firings.push(self.fire(trigger, event_name, &event_id, &event.payload, now).await);
        }
        Ok(firings)
    }

    async fn fire(
        &self,
        trigger: &WorkflowTrigger,
        event_name: &str,
        event_id: &str,
        payload: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> TriggerFiring {
        let context = Value::Object(payload.clone());
        let trigger_id = trigger.id.to_string();
        let request = KeyRequest {
            trigger_id: &trigger_id,
            event_name,
            event_id,
            context: &context,
            settings: &trigger.idempotency,
            now,
        };

        let key = match self.registry.generate(&request) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(
                    trigger_id = %trigger.id,
                    workflow_id = %trigger.workflow_id,
                    error = %e,
                    "idempotency key generation failed"
                );
                return TriggerFiring::error(trigger, None, e.to_string());
            }
        };

        let mut seed = payload.clone();
        seed.insert(
            "trigger".to_string(),
            serde_json::json!({
                "triggerId": trigger_id,
                "eventName": event_name,
                "eventId": event_id,
            }),
        );

        match self
            .runner
            .run_tracked(&key, trigger.workflow_id, None, Value::Object(seed))
            .await
        {
            Ok(outcome) => {
                let status = match &outcome {
                    RunOutcome::Completed(_) => "COMPLETED",
                    RunOutcome::Failed(_) => "FAILED",
                    RunOutcome::Skipped { .. } => "SKIPPED",
                };
                TriggerFiring {
                    trigger_id: trigger.id,
                    workflow_id: trigger.workflow_id,
                    idempotency_key: Some(key),
                    status: status.to_string(),
                    execution_id: outcome.result().map(|r| r.execution_id),
                    error: outcome.result().and_then(|r| r.error.clone()),
                }
            }
            Err(e) => {
                tracing::error!(
                    trigger_id = %trigger.id,
                    workflow_id = %trigger.workflow_id,
                    idempotency_key = key.as_str(),
                    error = %e,
                    "triggered run failed"
                );
                TriggerFiring::error(trigger, Some(key), e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
