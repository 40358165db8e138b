//! Workflow repository trait definition.
//!
//! Definitions are immutable once stored; triggers bind event names to them.

use cronflow_types::error::RepositoryError;
use cronflow_types::workflow::{WorkflowDefinition, WorkflowTrigger};
use uuid::Uuid;

/// Repository trait for workflow definitions and event triggers.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Insert a workflow definition. An existing id is a `Conflict`.
    fn save_workflow(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List all workflow definitions, newest first.
    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Insert an event trigger. An existing id is a `Conflict`.
    fn save_trigger(
        &self,
        trigger: &WorkflowTrigger,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_trigger(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowTrigger>, RepositoryError>> + Send;

    fn list_triggers(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowTrigger>, RepositoryError>> + Send;

    /// ACTIVE triggers bound to `event_name`.
    fn triggers_for_event(
        &self,
        event_name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowTrigger>, RepositoryError>> + Send;
}
