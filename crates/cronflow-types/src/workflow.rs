//! Workflow definition types: the canonical graph representation.
//!
//! A `WorkflowDefinition` is a set of typed nodes. Each node carries a tagged
//! `NodeConfig` that is resolved once when the definition is deserialized,
//! plus routing metadata (`next` or a `branch` table).
//!
//! Definitions serialize to JSON (storage, REST API) and YAML (import files)
//! with the same shape.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::idempotency::IdempotencySettings;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
///
/// Immutable once stored: a changed workflow is saved as a new definition
/// with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 identifier. Generated on import when omitted.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Owning tenant (institute) identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Whether the workflow may be executed.
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Graph nodes. Exactly one must be a TRIGGER.
    pub nodes: Vec<WorkflowNode>,
    /// When the definition was stored.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }
}

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Active => write!(f, "ACTIVE"),
            WorkflowStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(WorkflowStatus::Active),
            "INACTIVE" => Ok(WorkflowStatus::Inactive),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Node identifier, unique within the definition.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identifier of the reusable template this node was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Type-specific configuration.
    pub config: NodeConfig,
    /// Node-level timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Unconditional successor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Conditional successor table, evaluated after the node runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

/// Conditional routing evaluated against the context after a node runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Expression whose stringified value selects a case.
    pub on: String,
    /// Case value -> successor node id.
    pub cases: BTreeMap<String, String>,
    /// Successor when no case matches. Execution ends when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Tagged node configuration. The `type` field selects the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeConfig {
    /// Workflow entry point; computes output data points from the seed.
    Trigger {
        #[serde(default)]
        output_data_points: Vec<ComputedField>,
    },
    /// Computes named fields and merges them into the context.
    Transform { fields: Vec<ComputedField> },
    /// Iterates a collection and applies an operation per item.
    DataProcessor { for_each: ForEach },
    /// Outbound HTTP call.
    HttpRequest(HttpRequestConfig),
    /// Notification dispatch.
    #[serde(alias = "ACTION")]
    SendEmail(EmailConfig),
}

impl NodeConfig {
    /// Type name as used in definitions and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeConfig::Trigger { .. } => "TRIGGER",
            NodeConfig::Transform { .. } => "TRANSFORM",
            NodeConfig::DataProcessor { .. } => "DATA_PROCESSOR",
            NodeConfig::HttpRequest(_) => "HTTP_REQUEST",
            NodeConfig::SendEmail(_) => "SEND_EMAIL",
        }
    }
}

/// A named field computed from an expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputedField {
    /// Target key. Dotted names (`user.fullName`) write nested objects.
    pub name: String,
    /// Expression evaluated against the current scope.
    pub expression: String,
    /// When true, an unresolvable expression yields null instead of failing.
    #[serde(default)]
    pub null_safe: bool,
}

// ---------------------------------------------------------------------------
// Data processor
// ---------------------------------------------------------------------------

/// Iteration over a collection found at `on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEach {
    /// Collection expression. When absent the operation runs once against
    /// the context itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    /// Scope key the current item is bound to.
    #[serde(default = "default_item_key")]
    pub item_key: String,
    /// Operation applied to each item.
    pub operation: DataOperation,
}

fn default_item_key() -> String {
    "item".to_string()
}

/// Per-item operation of a data processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataOperation {
    /// Nested iteration; may nest to any depth.
    Iterator { for_each: Box<ForEach> },
    /// Prebuilt lookup resolved by the data-resolution collaborator.
    Query(QueryOperation),
    /// Conditional dispatch on a per-item value.
    Switch {
        on: String,
        cases: BTreeMap<String, Vec<SwitchAction>>,
    },
}

/// A prebuilt query dispatched to the data-resolution collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOperation {
    /// Key of the prebuilt query (e.g. `active_students_for_institute`).
    pub prebuilt_key: String,
    /// Parameter templates resolved against the current scope.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Context key receiving the result.
    pub result_key: String,
    /// How results are written back.
    #[serde(default)]
    pub mode: QueryResultMode,
}

/// Write-back policy for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryResultMode {
    /// Append results (arrays flattened) to a list at `result_key`.
    #[default]
    Accumulate,
    /// Object results merge into the context; others replace `result_key`.
    Merge,
}

/// An action run when a switch case matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchAction {
    /// Compute fields into the shared context.
    SetFields { fields: Vec<ComputedField> },
    /// Run a prebuilt query.
    Query(QueryOperation),
    /// Send a notification.
    SendEmail(EmailConfig),
    /// Select the successor of the data processor node.
    Goto { next: String },
}

// ---------------------------------------------------------------------------
// HTTP and notification configuration
// ---------------------------------------------------------------------------

/// Configuration for an HTTP_REQUEST node. All string fields are templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON body; string leaves are resolved as templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Context key receiving `{status_code, body}`.
    pub result_key: String,
    /// Call-level timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Treat non-2xx responses as node failures.
    #[serde(default = "default_true")]
    pub fail_on_error_status: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration for a SEND_EMAIL / ACTION node or switch action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Subject template.
    pub subject: String,
    /// HTML body template.
    pub body: String,
    /// Expression yielding a list of recipients (objects or channel strings).
    pub recipients: String,
    /// Per-recipient placeholder expressions; `recipient` is in scope.
    #[serde(default)]
    pub placeholders: BTreeMap<String, String>,
    /// Source type reported to the notification collaborator.
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

fn default_source_type() -> String {
    "WORKFLOW".to_string()
}

// ---------------------------------------------------------------------------
// Event triggers
// ---------------------------------------------------------------------------

/// Binds an external event name to a workflow for event-driven runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub event_name: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
}
