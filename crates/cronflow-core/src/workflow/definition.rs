//! Workflow definition parsing and structural validation.
//!
//! Converts between YAML files and the canonical `WorkflowDefinition`,
//! and validates node-level constraints before the graph is compiled.

use std::collections::HashSet;

use cronflow_types::error::RepositoryError;
use cronflow_types::workflow::{NodeConfig, WorkflowDefinition};
use thiserror::Error;
use uuid::Uuid;

use super::graph::{successor_targets, validate_graph};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or running a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Routing graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A node routes to a node id that does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("workflow {0} not found")]
    NotFound(Uuid),

    #[error("workflow {0} is not active")]
    Inactive(Uuid),

    /// The execution context could not be built from the seed.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - Node IDs are non-empty and unique
/// - Exactly one TRIGGER node, which does not branch
/// - No node declares both `next` and `branch`
/// - Every routing target exists and the routing graph is acyclic
/// - Timeouts > 0 if set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for node in &def.nodes {
        if node.id.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "node id must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(node.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate node ID: '{}'",
                node.id
            )));
        }
    }

    let triggers: Vec<_> = def
        .nodes
        .iter()
        .filter(|n| matches!(n.config, NodeConfig::Trigger { .. }))
        .collect();
    match triggers.as_slice() {
        [] => {
            return Err(WorkflowError::ValidationError(
                "workflow must have exactly one TRIGGER node, found none".to_string(),
            ));
        }
        [trigger] if trigger.branch.is_some() => {
            return Err(WorkflowError::ValidationError(format!(
                "TRIGGER node '{}' cannot branch",
                trigger.id
            )));
        }
        [_] => {}
        many => {
            return Err(WorkflowError::ValidationError(format!(
                "workflow must have exactly one TRIGGER node, found {}",
                many.len()
            )));
        }
    }

    for node in &def.nodes {
        if node.next.is_some() && node.branch.is_some() {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' declares both next and branch",
                node.id
            )));
        }
        if node.timeout_secs == Some(0) {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' timeout must be greater than 0",
                node.id
            )));
        }
        for target in successor_targets(node) {
            if !seen_ids.contains(target) {
                return Err(WorkflowError::UnknownNode(format!(
                    "node '{}' routes to unknown node '{}'",
                    node.id, target
                )));
            }
        }
    }

    validate_graph(&def.nodes)
}
