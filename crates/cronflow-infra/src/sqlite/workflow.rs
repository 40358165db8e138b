//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `cronflow-core` using sqlx with split
//! read/write pools. Definitions are stored as JSON blobs alongside the few
//! columns used for listing; triggers keep their idempotency settings as JSON.

use cronflow_core::repository::workflow::WorkflowRepository;
use cronflow_types::error::RepositoryError;
use cronflow_types::idempotency::IdempotencySettings;
use cronflow_types::workflow::{WorkflowDefinition, WorkflowStatus, WorkflowTrigger};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, is_unique_violation, parse_json, parse_uuid, to_json};

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowDefRow {
    definition: String,
}

impl WorkflowDefRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            definition: row.try_get("definition")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        parse_json(&self.definition, "workflow definition")
    }
}

struct TriggerRow {
    id: String,
    workflow_id: String,
    event_name: String,
    status: String,
    idempotency: String,
}

impl TriggerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            event_name: row.try_get("event_name")?,
            status: row.try_get("status")?,
            idempotency: row.try_get("idempotency")?,
        })
    }

    fn into_trigger(self) -> Result<WorkflowTrigger, RepositoryError> {
        let status = self
            .status
            .parse::<WorkflowStatus>()
            .map_err(RepositoryError::Query)?;
        let idempotency: IdempotencySettings = parse_json(&self.idempotency, "idempotency")?;

        Ok(WorkflowTrigger {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            event_name: self.event_name,
            status,
            idempotency,
        })
    }
}

fn triggers_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
    let mut triggers = Vec::with_capacity(rows.len());
    for row in rows {
        let r = TriggerRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        triggers.push(r.into_trigger()?);
    }
    Ok(triggers)
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = to_json(def, "definition")?;

        let result = sqlx::query(
            r#"INSERT INTO workflows (id, name, tenant_id, status, definition, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(&def.name)
        .bind(&def.tenant_id)
        .bind(def.status.to_string())
        .bind(&definition_json)
        .bind(format_datetime(&def.created_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "workflow '{}' already exists",
                def.id
            ))),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowDefRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = WorkflowDefRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            defs.push(r.into_definition()?);
        }
        Ok(defs)
    }

    async fn save_trigger(&self, trigger: &WorkflowTrigger) -> Result<(), RepositoryError> {
        let idempotency_json = to_json(&trigger.idempotency, "idempotency")?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_triggers (id, workflow_id, event_name, status, idempotency)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(trigger.id.to_string())
        .bind(trigger.workflow_id.to_string())
        .bind(&trigger.event_name)
        .bind(trigger.status.to_string())
        .bind(&idempotency_json)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "trigger '{}' already exists",
                trigger.id
            ))),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_trigger(&self, id: &Uuid) -> Result<Option<WorkflowTrigger>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_triggers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = TriggerRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_trigger()?))
            }
            None => Ok(None),
        }
    }

    async fn list_triggers(&self) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_triggers ORDER BY event_name ASC, id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        triggers_from_rows(&rows)
    }

    async fn triggers_for_event(&self, event_name: &str) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_triggers WHERE event_name = ? AND status = 'ACTIVE' ORDER BY id ASC",
        )
        .bind(event_name)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        triggers_from_rows(&rows)
    }
}
