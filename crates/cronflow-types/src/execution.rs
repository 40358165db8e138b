//! Execution records, per-node logs, and log query types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

/// Status of a tracked execution. PROCESSING is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Processing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 3] = [
        ExecutionStatus::Processing,
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Processing => "PROCESSING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(ExecutionStatus::Processing),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// One claimed occurrence of a workflow, keyed by its idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
    pub idempotency_key: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Final context of a completed execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl WorkflowExecution {
    /// A new PROCESSING record started at `started_at`.
    pub fn processing(
        idempotency_key: String,
        workflow_id: Uuid,
        schedule_id: Option<Uuid>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            schedule_id,
            idempotency_key,
            status: ExecutionStatus::Processing,
            started_at,
            completed_at: None,
            error_message: None,
            result: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Node logs
// ---------------------------------------------------------------------------

/// Outcome of a single node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeLogStatus {
    Completed,
    Failed,
}

impl NodeLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLogStatus::Completed => "COMPLETED",
            NodeLogStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for NodeLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(NodeLogStatus::Completed),
            "FAILED" => Ok(NodeLogStatus::Failed),
            other => Err(format!("invalid node log status: '{other}'")),
        }
    }
}

/// Append-only record of one node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_template_id: Option<String>,
    pub node_type: String,
    pub status: NodeLogStatus,
    pub context_before: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_after: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Log queries
// ---------------------------------------------------------------------------

/// Which logs to return.
#[derive(Debug, Clone, PartialEq)]
pub enum LogFilter {
    Execution(Uuid),
    Node(String),
    NodeTemplate(String),
    /// Inclusive time range.
    TimeRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// A paginated log query. Pages are zero-based.
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub filter: LogFilter,
    pub page: u32,
    pub size: u32,
}

impl LogQuery {
    pub const MAX_PAGE_SIZE: u32 = 500;

    pub fn new(filter: LogFilter, page: u32, size: u32) -> Self {
        Self {
            filter,
            page,
            size: size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        self.page as u64 * self.size as u64
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(self.size as u64)
        }
    }
}
