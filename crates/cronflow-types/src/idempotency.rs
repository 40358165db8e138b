//! Idempotency settings attached to workflow triggers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Key generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStrategy {
    /// Fresh random key per invocation.
    #[default]
    None,
    /// Fresh random key per invocation.
    Uuid,
    /// Trigger id, event type and event id.
    EventBased,
    /// Trigger id plus a fixed-size time bucket.
    TimeWindow,
    /// Selected context field values.
    ContextBased,
    /// Context field values plus a time bucket.
    ContextTimeWindow,
    /// User-supplied expression, optionally bucketed.
    CustomExpression,
}

impl fmt::Display for IdempotencyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdempotencyStrategy::None => "NONE",
            IdempotencyStrategy::Uuid => "UUID",
            IdempotencyStrategy::EventBased => "EVENT_BASED",
            IdempotencyStrategy::TimeWindow => "TIME_WINDOW",
            IdempotencyStrategy::ContextBased => "CONTEXT_BASED",
            IdempotencyStrategy::ContextTimeWindow => "CONTEXT_TIME_WINDOW",
            IdempotencyStrategy::CustomExpression => "CUSTOM_EXPRESSION",
        };
        write!(f, "{s}")
    }
}

/// Read-only input to key generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencySettings {
    #[serde(default)]
    pub strategy: IdempotencyStrategy,
    /// Ordered context keys (dotted paths allowed).
    #[serde(default)]
    pub context_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_expression: Option<String>,
    #[serde(default = "default_true")]
    pub include_trigger_id: bool,
    #[serde(default = "default_true")]
    pub include_event_type: bool,
    #[serde(default)]
    pub include_event_id: bool,
    #[serde(default)]
    pub fail_on_missing_context: bool,
}

fn default_true() -> bool {
    true
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            strategy: IdempotencyStrategy::None,
            context_fields: Vec::new(),
            ttl_minutes: None,
            custom_expression: None,
            include_trigger_id: true,
            include_event_type: true,
            include_event_id: false,
            fail_on_missing_context: false,
        }
    }
}

impl IdempotencySettings {
    /// Settings for the given strategy with all other fields defaulted.
    pub fn with_strategy(strategy: IdempotencyStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }
}
