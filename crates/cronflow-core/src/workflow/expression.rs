//! JEXL expression evaluator for node computations, routing, and templates.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms. The
//! context map is visible both at the root (`user.first`) and under `ctx`
//! (`ctx['user']['first']`). A `#{...}` wrapper around a whole expression is
//! accepted, and `render` substitutes `#{...}` segments inside larger strings.
//!
//! **Security note:** Payloads are always passed as context objects, NEVER
//! interpolated into expression strings.

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpressionError {
    #[error("invalid expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },

    #[error("expression '{0}' did not resolve to a value")]
    Unresolved(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// Key under which the whole context is re-bound for `ctx['a']` access.
pub const CONTEXT_ALIAS: &str = "ctx";

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Stateless after construction; share one instance behind an `Arc`.
pub struct ExpressionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ExpressionEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("split", |args: &[Value]| {
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = str_arg(args, 0).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_to_bool(&val)))
            })
            // String search transforms
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).contains(str_arg(args, 1))))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("match", |args: &[Value]| {
                // Substring match, not regex
                Ok(json!(str_arg(args, 0).contains(str_arg(args, 1))))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression, failing when it resolves to null.
    ///
    /// A null result means a referenced field does not exist (or is null);
    /// callers that accept missing data use [`Self::evaluate_nullable`].
    pub fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        match self.evaluate_nullable(expression, context)? {
            Value::Null => Err(ExpressionError::Unresolved(expression.to_string())),
            value => Ok(value),
        }
    }

    /// Evaluate an expression, returning `Value::Null` for missing fields.
    pub fn evaluate_nullable(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<Value, ExpressionError> {
        let source = unwrap_expression(expression);
        if source.is_empty() {
            return Err(ExpressionError::Invalid {
                expression: expression.to_string(),
                reason: "expression is empty".to_string(),
            });
        }

        let scope = build_scope(context)?;
        self.evaluator
            .eval_in_context(source, &scope)
            .map_err(|e| ExpressionError::Invalid {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }

    /// Evaluate and coerce to boolean using JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        Ok(value_to_bool(&self.evaluate_nullable(expression, context)?))
    }

    /// Substitute every `#{expr}` segment of `template` with its stringified
    /// value. Text outside the segments is copied verbatim.
    pub fn render(&self, template: &str, context: &Value) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("#{") {
            out.push_str(&rest[..start]);
            let body = &rest[start + 2..];
            let end = closing_brace(body).ok_or_else(|| ExpressionError::Invalid {
                expression: template.to_string(),
                reason: "unterminated '#{' segment".to_string(),
            })?;
            let value = self.evaluate(&body[..end], context)?;
            out.push_str(&stringify(&value));
            rest = &body[end + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }

    /// Resolve a template to a value.
    ///
    /// - exactly one `#{expr}` spanning the whole string: the raw value
    /// - text with embedded segments: the rendered string
    /// - plain text: the literal string
    pub fn resolve(&self, template: &str, context: &Value) -> Result<Value, ExpressionError> {
        let trimmed = template.trim();
        if let Some(body) = trimmed.strip_prefix("#{") {
            if closing_brace(body).is_some_and(|end| end + 1 == body.len()) {
                return self.evaluate(&body[..body.len() - 1], context);
            }
        }
        if template.contains("#{") {
            return self.render(template, context).map(Value::String);
        }
        Ok(Value::String(template.to_string()))
    }

    /// Resolve every string leaf of a JSON document as a template.
    pub fn resolve_json(&self, document: &Value, context: &Value) -> Result<Value, ExpressionError> {
        match document {
            Value::String(s) => self.resolve(s, context),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_json(item, context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve_json(value, context)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Render a value as key/template text. Integral numbers print without a
/// fractional part; strings print without quotes.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            } else {
                n.to_string()
            }
        }
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn str_arg(args: &[Value], idx: usize) -> &str {
    args.get(idx).and_then(|v| v.as_str()).unwrap_or("")
}

/// Strip a `#{...}` wrapper spanning the whole expression.
fn unwrap_expression(expression: &str) -> &str {
    let trimmed = expression.trim();
    if let Some(body) = trimmed.strip_prefix("#{") {
        if closing_brace(body).is_some_and(|end| end + 1 == body.len()) {
            return body[..body.len() - 1].trim();
        }
    }
    trimmed
}

/// Index of the `}` closing a segment whose opening `{` was already
/// consumed. Braces inside quoted strings are ignored.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn build_scope(context: &Value) -> Result<Value, ExpressionError> {
    let Value::Object(map) = context else {
        return Err(ExpressionError::InvalidContext(
            "context must be a JSON object".to_string(),
        ));
    };
    let mut scope = map.clone();
    scope
        .entry(CONTEXT_ALIAS.to_string())
        .or_insert_with(|| context.clone());
    Ok(Value::Object(scope))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
