//! Per-node execution for every node type.
//!
//! `NodeRunner` dispatches on `NodeConfig`. Handlers read from the current
//! scope (the context plus any iteration bindings), write results back into
//! the `ExecutionContext`, and may select a successor through a switch GOTO.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use cronflow_types::notification::{NotificationMessage, Recipient};
use cronflow_types::workflow::{
    ComputedField, DataOperation, EmailConfig, ForEach, HttpRequestConfig, NodeConfig,
    QueryOperation, QueryResultMode, SwitchAction, WorkflowNode,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::collaborators::{Collaborators, HttpRequest};
use super::context::{Binding, ExecutionContext};
use super::expression::{stringify, ExpressionError, ExpressionEvaluator};

// ---------------------------------------------------------------------------
// NodeExecutionError
// ---------------------------------------------------------------------------

/// Errors that abort the current node and the rest of the graph.
#[derive(Debug, thiserror::Error)]
pub enum NodeExecutionError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("query '{key}' failed: {reason}")]
    Query { key: String, reason: String },

    #[error("node timed out after {0}s")]
    Timeout(u64),

    #[error("routing error: {0}")]
    Routing(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NodeExecutionError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// NodeRunner
// ---------------------------------------------------------------------------

/// Executes nodes of one execution.
pub struct NodeRunner<'a> {
    evaluator: &'a ExpressionEvaluator,
    collaborators: &'a Collaborators,
    http_timeout: Duration,
    execution_id: Uuid,
}

impl<'a> NodeRunner<'a> {
    pub fn new(
        evaluator: &'a ExpressionEvaluator,
        collaborators: &'a Collaborators,
        http_timeout: Duration,
        execution_id: Uuid,
    ) -> Self {
        Self {
            evaluator,
            collaborators,
            http_timeout,
            execution_id,
        }
    }

    /// Run `node` against `ctx`. Returns the successor chosen by a switch
    /// GOTO, if any.
    pub async fn run(
        &self,
        node: &WorkflowNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Option<String>, NodeExecutionError> {
        match &node.config {
            NodeConfig::Trigger { output_data_points } => {
                self.compute_fields(output_data_points, ctx, &[])?;
                Ok(None)
            }
            NodeConfig::Transform { fields } => {
                self.compute_fields(fields, ctx, &[])?;
                Ok(None)
            }
            NodeConfig::DataProcessor { for_each } => {
                let mut bindings = Vec::new();
                let mut route = None;
                self.for_each(for_each, ctx, &mut bindings, &mut route)
                    .await?;
                Ok(route)
            }
            NodeConfig::HttpRequest(config) => {
                self.http_request(config, ctx).await?;
                Ok(None)
            }
            NodeConfig::SendEmail(config) => {
                let scope = ctx.scoped(&[]);
                self.send_email(config, &scope).await?;
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // TRIGGER / TRANSFORM / SET_FIELDS
    // -----------------------------------------------------------------------

    /// Evaluate fields in order; each sees the ones before it.
    fn compute_fields(
        &self,
        fields: &[ComputedField],
        ctx: &mut ExecutionContext,
        bindings: &[Binding],
    ) -> Result<(), NodeExecutionError> {
        for field in fields {
            let scope = ctx.scoped(bindings);
            let value = if field.null_safe {
                self.evaluator.evaluate_nullable(&field.expression, &scope)?
            } else {
                self.evaluator.evaluate(&field.expression, &scope)?
            };
            ctx.set(&field.name, value);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // DATA_PROCESSOR
    // -----------------------------------------------------------------------

    fn for_each<'b>(
        &'b self,
        iteration: &'b ForEach,
        ctx: &'b mut ExecutionContext,
        bindings: &'b mut Vec<Binding>,
        route: &'b mut Option<String>,
    ) -> NodeFuture<'b> {
        Box::pin(async move {
            let Some(on) = &iteration.on else {
                return self.operation(&iteration.operation, ctx, bindings, route).await;
            };

            let collection = self.evaluator.evaluate_nullable(on, &ctx.scoped(bindings))?;
            let items = match collection {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                single => vec![single],
            };
            tracing::debug!(on = %on, items = items.len(), "data processor iteration");

            for (index, item) in items.into_iter().enumerate() {
                bindings.push(Binding {
                    key: iteration.item_key.clone(),
                    item,
                    index,
                });
                let outcome = self.operation(&iteration.operation, ctx, bindings, route).await;
                bindings.pop();
                outcome?;
            }
            Ok(())
        })
    }

    fn operation<'b>(
        &'b self,
        operation: &'b DataOperation,
        ctx: &'b mut ExecutionContext,
        bindings: &'b mut Vec<Binding>,
        route: &'b mut Option<String>,
    ) -> NodeFuture<'b> {
        Box::pin(async move {
            match operation {
                DataOperation::Iterator { for_each } => {
                    self.for_each(for_each, ctx, bindings, route).await
                }
                DataOperation::Query(query) => self.query(query, ctx, bindings).await,
                DataOperation::Switch { on, cases } => {
                    let value = self.evaluator.evaluate_nullable(on, &ctx.scoped(bindings))?;
                    let case = stringify(&value);
                    let Some(actions) = cases.get(&case) else {
                        tracing::debug!(on = %on, case = %case, "no switch case matched");
                        return Ok(());
                    };
                    for action in actions {
                        self.switch_action(action, ctx, bindings, route).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn switch_action(
        &self,
        action: &SwitchAction,
        ctx: &mut ExecutionContext,
        bindings: &[Binding],
        route: &mut Option<String>,
    ) -> Result<(), NodeExecutionError> {
        match action {
            SwitchAction::SetFields { fields } => self.compute_fields(fields, ctx, bindings),
            SwitchAction::Query(query) => self.query(query, ctx, bindings).await,
            SwitchAction::SendEmail(config) => {
                let scope = ctx.scoped(bindings);
                self.send_email(config, &scope).await
            }
            SwitchAction::Goto { next } => match route {
                Some(existing) if existing != next => Err(NodeExecutionError::Routing(format!(
                    "conflicting GOTO targets '{existing}' and '{next}'"
                ))),
                _ => {
                    *route = Some(next.clone());
                    Ok(())
                }
            },
        }
    }

    async fn query(
        &self,
        query: &QueryOperation,
        ctx: &mut ExecutionContext,
        bindings: &[Binding],
    ) -> Result<(), NodeExecutionError> {
        let scope = ctx.scoped(bindings);
        let mut params = BTreeMap::new();
        for (name, template) in &query.params {
            params.insert(name.clone(), self.evaluator.resolve(template, &scope)?);
        }

        let result = self
            .collaborators
            .resolver
            .resolve(&query.prebuilt_key, params, &scope)
            .await
            .map_err(|e| NodeExecutionError::Query {
                key: query.prebuilt_key.clone(),
                reason: e.to_string(),
            })?;

        match (query.mode, result) {
            (QueryResultMode::Accumulate, Value::Array(items)) => {
                ctx.append(&query.result_key, items)
            }
            (QueryResultMode::Accumulate, Value::Null) => ctx.append(&query.result_key, vec![]),
            (QueryResultMode::Accumulate, single) => ctx.append(&query.result_key, vec![single]),
            (QueryResultMode::Merge, Value::Object(map)) => ctx.merge(map),
            (QueryResultMode::Merge, other) => ctx.set(&query.result_key, other),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // HTTP_REQUEST
    // -----------------------------------------------------------------------

    async fn http_request(
        &self,
        config: &HttpRequestConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<(), NodeExecutionError> {
        let scope = ctx.scoped(&[]);
        let method = self.evaluator.render(&config.method, &scope)?.to_uppercase();
        let url = self.evaluator.render(&config.url, &scope)?;
        let mut headers = BTreeMap::new();
        for (name, template) in &config.headers {
            headers.insert(name.clone(), self.evaluator.render(template, &scope)?);
        }
        let body = config
            .body
            .as_ref()
            .map(|b| self.evaluator.resolve_json(b, &scope))
            .transpose()?;
        let timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.http_timeout);

        tracing::debug!(method = %method, url = %url, "http request node");
        let response = self
            .collaborators
            .http
            .request(HttpRequest {
                method: method.clone(),
                url: url.clone(),
                headers,
                body,
                timeout,
            })
            .await
            .map_err(|e| NodeExecutionError::Http(e.to_string()))?;

        if config.fail_on_error_status && !response.is_success() {
            return Err(NodeExecutionError::Http(format!(
                "{method} {url} returned status {}",
                response.status_code
            )));
        }

        ctx.set(
            &config.result_key,
            json!({ "status_code": response.status_code, "body": response.body }),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // SEND_EMAIL
    // -----------------------------------------------------------------------

    async fn send_email(&self, config: &EmailConfig, scope: &Value) -> Result<(), NodeExecutionError> {
        let subject = self.evaluator.render(&config.subject, scope)?;
        let html_body = self.evaluator.render(&config.body, scope)?;

        let listed = match self.evaluator.evaluate_nullable(&config.recipients, scope)? {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut recipients = Vec::with_capacity(listed.len());
        for entry in &listed {
            let mut recipient = to_recipient(entry)?;
            if !config.placeholders.is_empty() {
                let mut recipient_scope = scope.clone();
                if let Value::Object(map) = &mut recipient_scope {
                    map.insert("recipient".to_string(), entry.clone());
                }
                for (name, expression) in &config.placeholders {
                    let value = self
                        .evaluator
                        .evaluate_nullable(expression, &recipient_scope)?;
                    let text = if value.is_null() {
                        String::new()
                    } else {
                        stringify(&value)
                    };
                    recipient.placeholders.insert(name.clone(), text);
                }
            }
            recipients.push(recipient);
        }

        if recipients.is_empty() {
            tracing::debug!(subject = %subject, "no recipients, notification skipped");
            return Ok(());
        }

        let count = recipients.len();
        self.collaborators
            .notifier
            .send(NotificationMessage {
                subject,
                html_body,
                recipients,
                source_type: config.source_type.clone(),
                source_id: self.execution_id.to_string(),
            })
            .await
            .map_err(|e| NodeExecutionError::Notification(e.to_string()))?;
        tracing::debug!(recipients = count, "notification sent");
        Ok(())
    }
}

/// Plain strings are channel ids; objects carry `channel_id` (or `email`),
/// optional `user_id`, and optional `placeholders`.
fn to_recipient(entry: &Value) -> Result<Recipient, NodeExecutionError> {
    match entry {
        Value::String(channel) => Ok(Recipient::channel(channel.clone())),
        Value::Object(map) => {
            let channel_id = map
                .get("channel_id")
                .or_else(|| map.get("email"))
                .filter(|v| !v.is_null())
                .map(stringify)
                .ok_or_else(|| {
                    NodeExecutionError::InvalidData(format!("recipient without channel_id: {entry}"))
                })?;
            let user_id = map.get("user_id").filter(|v| !v.is_null()).map(stringify);
            let placeholders = map
                .get("placeholders")
                .and_then(Value::as_object)
                .map(|p| p.iter().map(|(k, v)| (k.clone(), stringify(v))).collect())
                .unwrap_or_default();
            Ok(Recipient {
                user_id,
                channel_id,
                placeholders,
            })
        }
        other => Err(NodeExecutionError::InvalidData(format!(
            "unsupported recipient: {other}"
        ))),
    }
}
