//! Routing graph construction and cycle detection.
//!
//! Uses `petgraph` to model routing edges between nodes: `next`, every
//! `branch` target, and every GOTO reachable inside a DATA_PROCESSOR's
//! switch cases. Topological sort rejects cycles at load time; loops are
//! expressed as DATA_PROCESSOR iteration instead.

use std::collections::HashMap;

use cronflow_types::workflow::{
    DataOperation, ForEach, NodeConfig, SwitchAction, WorkflowDefinition, WorkflowNode,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::definition::{validate_definition, WorkflowError};

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Every node id `node` may route to.
pub fn successor_targets(node: &WorkflowNode) -> Vec<&str> {
    let mut targets = Vec::new();
    if let Some(next) = &node.next {
        targets.push(next.as_str());
    }
    if let Some(branch) = &node.branch {
        targets.extend(branch.cases.values().map(String::as_str));
        if let Some(default) = &branch.default {
            targets.push(default.as_str());
        }
    }
    if let NodeConfig::DataProcessor { for_each } = &node.config {
        collect_gotos(for_each, &mut targets);
    }
    targets
}

fn collect_gotos<'a>(for_each: &'a ForEach, targets: &mut Vec<&'a str>) {
    match &for_each.operation {
        DataOperation::Iterator { for_each } => collect_gotos(for_each, targets),
        DataOperation::Query(_) => {}
        DataOperation::Switch { cases, .. } => {
            for action in cases.values().flatten() {
                if let SwitchAction::Goto { next } = action {
                    targets.push(next.as_str());
                }
            }
        }
    }
}

/// Validate that routing edges form a DAG. Unknown targets are reported
/// as `UnknownNode`.
pub fn validate_graph(nodes: &[WorkflowNode]) -> Result<(), WorkflowError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for node in nodes {
        let from = indices[node.id.as_str()];
        for target in successor_targets(node) {
            let to = indices.get(target).ok_or_else(|| {
                WorkflowError::UnknownNode(format!(
                    "node '{}' routes to unknown node '{}'",
                    node.id, target
                ))
            })?;
            graph.add_edge(from, *to, ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("cycle detected involving node '{node_id}'"))
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// CompiledWorkflow
// ---------------------------------------------------------------------------

/// A validated definition with its node index. Cached per definition id.
#[derive(Debug)]
pub struct CompiledWorkflow {
    definition: WorkflowDefinition,
    index: HashMap<String, usize>,
    trigger: usize,
}

impl CompiledWorkflow {
    /// Validate `definition` and index its nodes.
    pub fn compile(definition: WorkflowDefinition) -> Result<Self, WorkflowError> {
        validate_definition(&definition)?;

        let index: HashMap<String, usize> = definition
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let trigger = definition
            .nodes
            .iter()
            .position(|n| matches!(n.config, NodeConfig::Trigger { .. }))
            .ok_or_else(|| {
                WorkflowError::ValidationError("workflow has no TRIGGER node".to_string())
            })?;

        Ok(Self {
            definition,
            index,
            trigger,
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn trigger(&self) -> &WorkflowNode {
        &self.definition.nodes[self.trigger]
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|i| &self.definition.nodes[*i])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use cronflow_types::workflow::Branch;

    fn node(id: &str, config: NodeConfig, next: Option<&str>) -> WorkflowNode {
        WorkflowNode {
            id: id.to_string(),
            name: None,
            template_id: None,
            config,
            timeout_secs: None,
            next: next.map(String::from),
            branch: None,
        }
    }

    fn transform() -> NodeConfig {
        NodeConfig::Transform { fields: vec![] }
    }

    fn trigger() -> NodeConfig {
        NodeConfig::Trigger {
            output_data_points: vec![],
        }
    }

    fn switch_goto(target: &str) -> NodeConfig {
        let mut cases = BTreeMap::new();
        cases.insert(
            "true".to_string(),
            vec![SwitchAction::Goto {
                next: target.to_string(),
            }],
        );
        NodeConfig::DataProcessor {
            for_each: ForEach {
                on: None,
                item_key: "item".to_string(),
                operation: DataOperation::Iterator {
                    for_each: Box::new(ForEach {
                        on: None,
                        item_key: "inner".to_string(),
                        operation: DataOperation::Switch {
                            on: "flag".to_string(),
                            cases,
                        },
                    }),
                },
            },
        }
    }

    #[test]
    fn test_successor_targets_include_branch_and_default() {
        let mut n = node("a", transform(), None);
        let mut cases = BTreeMap::new();
        cases.insert("x".to_string(), "b".to_string());
        n.branch = Some(Branch {
            on: "v".to_string(),
            cases,
            default: Some("c".to_string()),
        });
        assert_eq!(successor_targets(&n), vec!["b", "c"]);
    }

    #[test]
    fn test_successor_targets_find_nested_goto() {
        let n = node("dp", switch_goto("mail"), None);
        assert_eq!(successor_targets(&n), vec!["mail"]);
    }

    #[test]
    fn test_linear_graph_is_valid() {
        let nodes = vec![
            node("a", trigger(), Some("b")),
            node("b", transform(), Some("c")),
            node("c", transform(), None),
        ];
        assert!(validate_graph(&nodes).is_ok());
    }

    #[test]
    fn test_cycle_through_next_detected() {
        let nodes = vec![
            node("a", trigger(), Some("b")),
            node("b", transform(), Some("c")),
            node("c", transform(), Some("b")),
        ];
        let err = validate_graph(&nodes).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_cycle_through_goto_detected() {
        let nodes = vec![
            node("a", trigger(), Some("b")),
            node("b", transform(), Some("dp")),
            node("dp", switch_goto("b"), None),
        ];
        let err = validate_graph(&nodes).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_unknown_goto_target() {
        let nodes = vec![node("a", trigger(), Some("dp")), node("dp", switch_goto("x"), None)];
        let err = validate_graph(&nodes).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownNode(_)));
    }

    #[test]
    fn test_compile_indexes_nodes() {
        let def = WorkflowDefinition {
            id: uuid::Uuid::now_v7(),
            name: "wf".to_string(),
            tenant_id: None,
            status: Default::default(),
            nodes: vec![node("b", transform(), None), node("a", trigger(), Some("b"))],
            created_at: chrono::Utc::now(),
        };
        let compiled = CompiledWorkflow::compile(def).unwrap();
        assert_eq!(compiled.trigger().id, "a");
        assert!(compiled.node("b").is_some());
        assert!(compiled.node("zzz").is_none());
    }
}
