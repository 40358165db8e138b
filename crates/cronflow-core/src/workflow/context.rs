//! Shared execution context threaded through a workflow's node graph.
//!
//! `ExecutionContext` is a JSON object that accumulates fields as nodes run.
//! Field names may be dotted (`user.fullName`) to address nested objects.
//! Snapshots recorded in node logs are size-capped.

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a log snapshot (64 KB).
pub const MAX_SNAPSHOT_SIZE: usize = 65_536;

/// Maximum total size of the context (10 MB).
pub const MAX_CONTEXT_SIZE: usize = 10_485_760;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// One level of DATA_PROCESSOR iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub key: String,
    pub item: Value,
    pub index: usize,
}

/// Mutable key/value map for one execution. Always a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    value: Value,
}

impl ExecutionContext {
    /// Build a context from a seed. `null` yields an empty context; any other
    /// non-object seed is rejected.
    pub fn from_seed(seed: Value) -> Result<Self, String> {
        match seed {
            Value::Object(_) => Ok(Self { value: seed }),
            Value::Null => Ok(Self::default()),
            other => Err(format!("context seed must be a JSON object, got {other}")),
        }
    }

    /// The context as a JSON object, for expression evaluation.
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Look up a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.value, path)
    }

    /// Write `value` at a dotted path, creating intermediate objects.
    pub fn set(&mut self, path: &str, value: Value) {
        if let Value::Object(map) = &mut self.value {
            set_path(map, path, value);
        }
    }

    /// Shallow-merge the keys of `fields` into the context.
    pub fn merge(&mut self, fields: Map<String, Value>) {
        if let Value::Object(map) = &mut self.value {
            map.extend(fields);
        }
    }

    /// Append `items` to the list at `path`, creating it when absent.
    ///
    /// A non-list value already at `path` becomes the first element.
    pub fn append(&mut self, path: &str, items: Vec<Value>) {
        let existing = self.get(path).cloned();
        let mut list = match existing {
            Some(Value::Array(list)) => list,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        list.extend(items);
        self.set(path, Value::Array(list));
    }

    /// A copy of the context with every binding applied: the item under its
    /// key and its position under `{key}_index`. Inner bindings shadow outer.
    pub fn scoped(&self, bindings: &[Binding]) -> Value {
        let mut scope = self.value.clone();
        if let Value::Object(map) = &mut scope {
            for binding in bindings {
                map.insert(binding.key.clone(), binding.item.clone());
                map.insert(format!("{}_index", binding.key), json!(binding.index));
            }
        }
        scope
    }

    /// Serialized size in bytes.
    pub fn size_bytes(&self) -> usize {
        serde_json::to_string(&self.value)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Size-capped copy for node logs.
    pub fn snapshot(&self) -> Value {
        let size = self.size_bytes();
        if size > MAX_SNAPSHOT_SIZE {
            json!({
                "_truncated": true,
                "_original_size": size,
                "_keys": self
                    .value
                    .as_object()
                    .map(|m| m.keys().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        } else {
            self.value.clone()
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            value: Value::Object(Map::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Resolve a dotted path (`a.b.c`) inside a JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, tail, value);
            }
        }
    }
}
