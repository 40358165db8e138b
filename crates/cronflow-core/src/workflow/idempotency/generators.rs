//! Built-in key generators, one per strategy.

use std::sync::Arc;

use cronflow_types::idempotency::{IdempotencySettings, IdempotencyStrategy};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{bucket_start, IdempotencyError, KeyGenerator, KeyRequest};
use crate::workflow::context::lookup_path;
use crate::workflow::expression::{stringify, ExpressionEvaluator};

/// NONE and UUID: a fresh identifier per call.
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn supports(&self, settings: &IdempotencySettings) -> bool {
        matches!(
            settings.strategy,
            IdempotencyStrategy::None | IdempotencyStrategy::Uuid
        )
    }

    fn generate(&self, _request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
        Ok(Uuid::now_v7().to_string())
    }
}

/// EVENT_BASED: `trigger_{id}_eventType_{name}_eventId_{id}`.
pub struct EventKeyGenerator;

impl KeyGenerator for EventKeyGenerator {
    fn supports(&self, settings: &IdempotencySettings) -> bool {
        settings.strategy == IdempotencyStrategy::EventBased
    }

    fn generate(&self, request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
        let settings = request.settings;
        if !settings.include_event_type && !settings.include_event_id {
            return Err(IdempotencyError::Config(
                "EVENT_BASED requires include_event_type or include_event_id".to_string(),
            ));
        }

        let mut key = String::new();
        if settings.include_trigger_id {
            key.push_str(&format!("trigger_{}_", request.trigger_id));
        }
        if settings.include_event_type {
            key.push_str(&format!("eventType_{}_", request.event_name));
        }
        if settings.include_event_id {
            key.push_str(&format!("eventId_{}_", request.event_id));
        }
        Ok(trim_separator(key))
    }
}

/// TIME_WINDOW: `trigger_{id}_{bucketStart}`.
pub struct TimeWindowKeyGenerator;

impl KeyGenerator for TimeWindowKeyGenerator {
    fn supports(&self, settings: &IdempotencySettings) -> bool {
        settings.strategy == IdempotencyStrategy::TimeWindow
    }

    fn generate(&self, request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
        let ttl = required_ttl(request.settings)?;
        let bucket = bucket_start(request.now, ttl)?;
        Ok(format!("trigger_{}_{bucket}", request.trigger_id))
    }
}

/// CONTEXT_BASED: `[trigger_{id}_]{field}_{value}_...`.
pub struct ContextKeyGenerator;

impl KeyGenerator for ContextKeyGenerator {
    fn supports(&self, settings: &IdempotencySettings) -> bool {
        settings.strategy == IdempotencyStrategy::ContextBased
    }

    fn generate(&self, request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
        context_key(request)
    }
}

/// CONTEXT_TIME_WINDOW: the CONTEXT_BASED key plus `_{bucketStart}`.
pub struct ContextTimeWindowKeyGenerator;

impl KeyGenerator for ContextTimeWindowKeyGenerator {
    fn supports(&self, settings: &IdempotencySettings) -> bool {
        settings.strategy == IdempotencyStrategy::ContextTimeWindow
    }

    fn generate(&self, request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
        let ttl = required_ttl(request.settings)?;
        let base = context_key(request)?;
        let bucket = bucket_start(request.now, ttl)?;
        Ok(format!("{base}_{bucket}"))
    }
}

/// CUSTOM_EXPRESSION: the stringified expression result, bucketed when
/// `ttl_minutes` is set.
pub struct CustomExpressionKeyGenerator {
    evaluator: Arc<ExpressionEvaluator>,
}

impl CustomExpressionKeyGenerator {
    pub fn new(evaluator: Arc<ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl KeyGenerator for CustomExpressionKeyGenerator {
    fn supports(&self, settings: &IdempotencySettings) -> bool {
        settings.strategy == IdempotencyStrategy::CustomExpression
    }

    fn generate(&self, request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
        let expression = request
            .settings
            .custom_expression
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                IdempotencyError::Config("CUSTOM_EXPRESSION requires custom_expression".to_string())
            })?;

        let mut scope = match request.context {
            Value::Object(map) => map.clone(),
            _ => Default::default(),
        };
        scope.insert("triggerId".to_string(), json!(request.trigger_id));
        scope.insert("eventName".to_string(), json!(request.event_name));
        scope.insert("eventId".to_string(), json!(request.event_id));

        let value = self
            .evaluator
            .evaluate_nullable(expression, &Value::Object(scope))?;
        if value.is_null() {
            return Err(IdempotencyError::Config(format!(
                "custom expression '{expression}' evaluated to null"
            )));
        }

        let base = stringify(&value);
        match request.settings.ttl_minutes {
            Some(ttl) => Ok(format!("{base}_{}", bucket_start(request.now, ttl)?)),
            None => Ok(base),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn context_key(request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
    let settings = request.settings;
    if settings.context_fields.is_empty() {
        return Err(IdempotencyError::Config(format!(
            "{} requires at least one context field",
            settings.strategy
        )));
    }

    let mut key = String::new();
    if settings.include_trigger_id {
        key.push_str(&format!("trigger_{}_", request.trigger_id));
    }
    for field in &settings.context_fields {
        let value = match lookup_path(request.context, field) {
            Some(value) if !value.is_null() => stringify(value),
            _ if settings.fail_on_missing_context => {
                return Err(IdempotencyError::Config(format!(
                    "context field '{field}' is missing"
                )));
            }
            _ => "null".to_string(),
        };
        key.push_str(&format!("{field}_{value}_"));
    }
    Ok(trim_separator(key))
}

fn required_ttl(settings: &IdempotencySettings) -> Result<u64, IdempotencyError> {
    settings
        .ttl_minutes
        .filter(|ttl| *ttl > 0)
        .ok_or_else(|| {
            IdempotencyError::Config(format!("{} requires ttl_minutes > 0", settings.strategy))
        })
}

fn trim_separator(mut key: String) -> String {
    if key.ends_with('_') {
        key.pop();
    }
    key
}
