//! Workflow execution engine.
//!
//! `WorkflowEngine` loads a definition (compiled once, then cached), starts
//! at the TRIGGER node, and walks the routing graph one node at a time. Each
//! node runs under a timeout against a working copy of the context that is
//! committed only when the node succeeds. Every executed node appends one
//! row to the execution log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cronflow_types::execution::{ExecutionStatus, NodeLogStatus, WorkflowExecutionLog};
use cronflow_types::workflow::WorkflowNode;
use dashmap::DashMap;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use super::collaborators::Collaborators;
use super::context::{ExecutionContext, MAX_CONTEXT_SIZE};
use super::definition::WorkflowError;
use super::expression::{stringify, ExpressionEvaluator};
use super::graph::CompiledWorkflow;
use super::node::{NodeExecutionError, NodeRunner};
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default node-level timeout (5 minutes).
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 300;

/// Default HTTP call timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of walking a workflow graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    /// COMPLETED or FAILED.
    pub status: ExecutionStatus,
    /// Final context (partial when the run failed).
    pub context: Value,
    /// IDs of nodes that completed, in execution order.
    pub completed_nodes: Vec<String>,
    /// Failing node's message, prefixed with its id.
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Graph-walking executor. Generic over storage for definitions and logs.
pub struct WorkflowEngine<W: WorkflowRepository, E: ExecutionRepository> {
    workflows: Arc<W>,
    executions: Arc<E>,
    evaluator: Arc<ExpressionEvaluator>,
    collaborators: Collaborators,
    /// Compiled definitions keyed by id. Definitions are immutable.
    compiled: DashMap<Uuid, Arc<CompiledWorkflow>>,
    node_timeout: Duration,
    http_timeout: Duration,
}

impl<W: WorkflowRepository, E: ExecutionRepository> WorkflowEngine<W, E> {
    pub fn new(
        workflows: Arc<W>,
        executions: Arc<E>,
        evaluator: Arc<ExpressionEvaluator>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            workflows,
            executions,
            evaluator,
            collaborators,
            compiled: DashMap::new(),
            node_timeout: Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    /// Override the default node and HTTP timeouts.
    pub fn with_timeouts(mut self, node_timeout: Duration, http_timeout: Duration) -> Self {
        self.node_timeout = node_timeout;
        self.http_timeout = http_timeout;
        self
    }

    pub fn workflows(&self) -> &Arc<W> {
        &self.workflows
    }

    /// Load and compile a workflow, using the cache when possible.
    pub async fn load(&self, workflow_id: Uuid) -> Result<Arc<CompiledWorkflow>, WorkflowError> {
        if let Some(compiled) = self.compiled.get(&workflow_id) {
            return Ok(Arc::clone(compiled.value()));
        }

        let definition = self
            .workflows
            .get_workflow(&workflow_id)
            .await?
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        let compiled = Arc::new(CompiledWorkflow::compile(definition)?);
        self.compiled.insert(workflow_id, Arc::clone(&compiled));
        tracing::debug!(workflow_id = %workflow_id, "workflow compiled and cached");
        Ok(compiled)
    }

    /// Run a workflow without idempotency tracking.
    pub async fn run(&self, workflow_id: Uuid, seed: Value) -> Result<ExecutionResult, WorkflowError> {
        self.execute(Uuid::now_v7(), workflow_id, seed).await
    }

    /// Run a workflow, logging nodes under `execution_id`.
    ///
    /// Load and seed errors are returned as `Err`. A node failure is not an
    /// error: it yields a FAILED result carrying the partial context.
    pub async fn execute(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        seed: Value,
    ) -> Result<ExecutionResult, WorkflowError> {
        let compiled = self.load(workflow_id).await?;
        if !compiled.definition().is_active() {
            return Err(WorkflowError::Inactive(workflow_id));
        }
        let ctx = ExecutionContext::from_seed(seed).map_err(WorkflowError::InvalidContext)?;

        let span = tracing::info_span!(
            "workflow.execute",
            workflow_id = %workflow_id,
            execution_id = %execution_id,
            workflow = compiled.definition().name.as_str(),
        );
        Ok(self
            .walk(&compiled, execution_id, ctx)
            .instrument(span)
            .await)
    }

    async fn walk(
        &self,
        compiled: &CompiledWorkflow,
        execution_id: Uuid,
        mut ctx: ExecutionContext,
    ) -> ExecutionResult {
        let workflow_id = compiled.definition().id;
        let runner = NodeRunner::new(
            &self.evaluator,
            &self.collaborators,
            self.http_timeout,
            execution_id,
        );
        let started = Instant::now();
        let mut completed_nodes = Vec::new();
        let mut current = Some(compiled.trigger());

        tracing::info!("starting workflow execution");

        while let Some(node) = current {
            let context_before = ctx.snapshot();
            let outcome = self.run_node(&runner, node, &ctx).await;

            let next = outcome.and_then(|(working, goto)| {
                let next = self.route(compiled, node, goto, &working)?;
                ctx = working;
                Ok(next)
            });

            match next {
                Ok(next) => {
                    let context_after = Some(ctx.snapshot());
                    self.append_log(
                        execution_id,
                        node,
                        NodeLogStatus::Completed,
                        context_before,
                        context_after,
                        None,
                    )
                    .await;
                    completed_nodes.push(node.id.clone());
                    current = next;
                }
                Err(e) => {
                    let message = format!("node '{}' failed: {e}", node.id);
                    tracing::warn!(node_id = node.id.as_str(), error = %e, "node execution failed");
                    self.append_log(
                        execution_id,
                        node,
                        NodeLogStatus::Failed,
                        context_before,
                        None,
                        Some(e.to_string()),
                    )
                    .await;
                    return ExecutionResult {
                        execution_id,
                        workflow_id,
                        status: ExecutionStatus::Failed,
                        context: ctx.into_value(),
                        completed_nodes,
                        error: Some(message),
                    };
                }
            }
        }

        tracing::info!(
            nodes = completed_nodes.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "workflow execution completed"
        );
        ExecutionResult {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Completed,
            context: ctx.into_value(),
            completed_nodes,
            error: None,
        }
    }

    /// Run one node on a working copy of the context under its timeout.
    async fn run_node(
        &self,
        runner: &NodeRunner<'_>,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
    ) -> Result<(ExecutionContext, Option<String>), NodeExecutionError> {
        let timeout = node
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.node_timeout);
        let mut working = ctx.clone();

        tracing::debug!(
            node_id = node.id.as_str(),
            node_type = node.config.type_name(),
            "running node"
        );
        let goto = tokio::time::timeout(timeout, runner.run(node, &mut working))
            .await
            .map_err(|_| NodeExecutionError::Timeout(timeout.as_secs()))??;

        let size = working.size_bytes();
        if size > MAX_CONTEXT_SIZE {
            return Err(NodeExecutionError::InvalidData(format!(
                "context size {size} bytes exceeds maximum {MAX_CONTEXT_SIZE} bytes"
            )));
        }
        Ok((working, goto))
    }

    /// Successor of `node`: a switch GOTO first, then `next`, then `branch`.
    fn route<'c>(
        &self,
        compiled: &'c CompiledWorkflow,
        node: &WorkflowNode,
        goto: Option<String>,
        ctx: &ExecutionContext,
    ) -> Result<Option<&'c WorkflowNode>, NodeExecutionError> {
        let target = if let Some(goto) = goto {
            Some(goto)
        } else if let Some(next) = &node.next {
            Some(next.clone())
        } else if let Some(branch) = &node.branch {
            let value = self.evaluator.evaluate_nullable(&branch.on, ctx.as_value())?;
            let case = stringify(&value);
            let selected = branch.cases.get(&case).or(branch.default.as_ref()).cloned();
            tracing::debug!(
                node_id = node.id.as_str(),
                case = %case,
                next = ?selected,
                "branch evaluated"
            );
            selected
        } else {
            None
        };

        target
            .map(|id| {
                compiled
                    .node(&id)
                    .ok_or_else(|| NodeExecutionError::Routing(format!("unknown node '{id}'")))
            })
            .transpose()
    }

    async fn append_log(
        &self,
        execution_id: Uuid,
        node: &WorkflowNode,
        status: NodeLogStatus,
        context_before: Value,
        context_after: Option<Value>,
        error: Option<String>,
    ) {
        let log = WorkflowExecutionLog {
            id: Uuid::now_v7(),
            execution_id,
            node_id: node.id.clone(),
            node_template_id: node.template_id.clone(),
            node_type: node.config.type_name().to_string(),
            status,
            context_before,
            context_after,
            error,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.executions.append_log(&log).await {
            tracing::warn!(
                execution_id = %execution_id,
                node_id = node.id.as_str(),
                error = %e,
                "failed to append execution log"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
