//! Idempotency key generation.
//!
//! Each [`IdempotencyStrategy`] has one [`KeyGenerator`]. The
//! [`IdempotencyKeyRegistry`] picks the generator whose `supports` matches the
//! settings and asks it for a key. Keys are later claimed through the
//! execution tracker, whose unique constraint provides the actual guarantee.

mod generators;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronflow_types::idempotency::IdempotencySettings;
use serde_json::Value;

use crate::workflow::expression::{ExpressionError, ExpressionEvaluator};

pub use generators::{
    ContextKeyGenerator, ContextTimeWindowKeyGenerator, CustomExpressionKeyGenerator,
    EventKeyGenerator, RandomKeyGenerator, TimeWindowKeyGenerator,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    /// Settings cannot produce a key. Never retried.
    #[error("idempotency configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

// ---------------------------------------------------------------------------
// Generator contract
// ---------------------------------------------------------------------------

/// Everything a generator may look at. Read-only.
#[derive(Debug, Clone, Copy)]
pub struct KeyRequest<'a> {
    pub trigger_id: &'a str,
    pub event_name: &'a str,
    pub event_id: &'a str,
    pub context: &'a Value,
    pub settings: &'a IdempotencySettings,
    pub now: DateTime<Utc>,
}

/// Produces keys for one strategy.
pub trait KeyGenerator: Send + Sync {
    fn supports(&self, settings: &IdempotencySettings) -> bool;

    fn generate(&self, request: &KeyRequest<'_>) -> Result<String, IdempotencyError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Strategy table. Exactly one generator must support a given setting.
pub struct IdempotencyKeyRegistry {
    generators: Vec<Box<dyn KeyGenerator>>,
}

impl IdempotencyKeyRegistry {
    /// Registry with every built-in strategy.
    pub fn new(evaluator: Arc<ExpressionEvaluator>) -> Self {
        Self::with_generators(vec![
            Box::new(RandomKeyGenerator),
            Box::new(EventKeyGenerator),
            Box::new(TimeWindowKeyGenerator),
            Box::new(ContextKeyGenerator),
            Box::new(ContextTimeWindowKeyGenerator),
            Box::new(CustomExpressionKeyGenerator::new(evaluator)),
        ])
    }

    pub fn with_generators(generators: Vec<Box<dyn KeyGenerator>>) -> Self {
        Self { generators }
    }

    pub fn generate(&self, request: &KeyRequest<'_>) -> Result<String, IdempotencyError> {
        let mut matching = self
            .generators
            .iter()
            .filter(|g| g.supports(request.settings));

        let generator = matching.next().ok_or_else(|| {
            IdempotencyError::Config(format!(
                "no key generator supports strategy {}",
                request.settings.strategy
            ))
        })?;
        if matching.next().is_some() {
            return Err(IdempotencyError::Config(format!(
                "multiple key generators support strategy {}",
                request.settings.strategy
            )));
        }

        let key = generator.generate(request)?;
        tracing::debug!(
            strategy = %request.settings.strategy,
            trigger_id = request.trigger_id,
            idempotency_key = %key,
            "generated idempotency key"
        );
        Ok(key)
    }
}

/// Start of the `ttl_minutes` bucket containing `now`, in epoch millis.
pub fn bucket_start(now: DateTime<Utc>, ttl_minutes: u64) -> Result<i64, IdempotencyError> {
    let window = i64::try_from(ttl_minutes)
        .ok()
        .and_then(|m| m.checked_mul(60_000))
        .filter(|w| *w > 0)
        .ok_or_else(|| {
            IdempotencyError::Config(format!("ttl_minutes must be positive, got {ttl_minutes}"))
        })?;
    let millis = now.timestamp_millis();
    Ok(millis - millis.rem_euclid(window))
}
