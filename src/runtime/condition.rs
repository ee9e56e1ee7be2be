//! Condition node evaluation
//!
//! A condition resolves `field`, compares it with `value` using `operator`
//! and routes to `true_branch` or `false_branch`. A missing field value is
//! never equal to anything and never orders against anything.

use crate::error::NodeError;
use crate::runtime::executor::ExecutionResult;
use crate::runtime::resolver::{resolve_reference, try_resolve};
use crate::runtime::wait::parse_timestamp;
use crate::workflow::types::{ExecutionContext, Node};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    IsEmpty,
    IsNotEmpty,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::LessOrEqual => "less_or_equal",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::In => "in",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        }
    }
}

impl FromStr for ConditionOperator {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "equals" | "eq" | "==" => Self::Equals,
            "not_equals" | "neq" | "!=" => Self::NotEquals,
            "greater_than" | "gt" | ">" => Self::GreaterThan,
            "less_than" | "lt" | "<" => Self::LessThan,
            "greater_or_equal" | "gte" | ">=" => Self::GreaterOrEqual,
            "less_or_equal" | "lte" | "<=" => Self::LessOrEqual,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "in" => Self::In,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            other => {
                return Err(NodeError::configuration(format!(
                    "unknown condition operator '{other}'"
                )))
            }
        })
    }
}

/// Compare a resolved field value against the expected value
pub fn compare(left: Option<&Value>, operator: ConditionOperator, right: &Value) -> bool {
    use ConditionOperator::*;

    match operator {
        Equals => left.is_some_and(|l| loose_eq(l, right)),
        NotEquals => !left.is_some_and(|l| loose_eq(l, right)),
        GreaterThan => ordering(left, right) == Some(Ordering::Greater),
        LessThan => ordering(left, right) == Some(Ordering::Less),
        GreaterOrEqual => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        LessOrEqual => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        Contains => left.is_some_and(|l| contains(l, right)),
        NotContains => !left.is_some_and(|l| contains(l, right)),
        StartsWith => match (left.and_then(Value::as_str), text(right)) {
            (Some(l), Some(r)) => l.starts_with(r.as_str()),
            _ => false,
        },
        EndsWith => match (left.and_then(Value::as_str), text(right)) {
            (Some(l), Some(r)) => l.ends_with(r.as_str()),
            _ => false,
        },
        In => left.is_some_and(|l| contains(right, l)),
        IsEmpty => is_empty(left),
        IsNotEmpty => !is_empty(left),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn ordering(left: Option<&Value>, right: &Value) -> Option<Ordering> {
    let left = left?;
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l.partial_cmp(&r);
    }
    match (left.as_str().and_then(parse_timestamp), right.as_str().and_then(parse_timestamp)) {
        (Some(l), Some(r)) => Some(l.cmp(&r)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => text(needle).is_some_and(|n| s.contains(n.as_str())),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Evaluate a condition node
pub fn evaluate(node: &Node, context: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
    let field = node
        .config_str("field")
        .ok_or_else(|| NodeError::configuration(format!("condition node '{}' requires 'field'", node.id)))?;
    let operator: ConditionOperator = node
        .config_str("operator")
        .ok_or_else(|| {
            NodeError::configuration(format!("condition node '{}' requires 'operator'", node.id))
        })?
        .parse()?;

    let left = resolve_reference(field, context)?;
    let right = match node.config.get("value") {
        Some(Value::String(raw)) => try_resolve(raw, context)?.unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };

    let result = compare(left.as_ref(), operator, &right);
    let target = if result {
        node.true_branch.clone()
    } else {
        node.false_branch.clone()
    };

    tracing::debug!(
        "🔀 Condition '{}': {} {} {} -> {} (branch: {:?})",
        node.id,
        left.as_ref().map_or_else(|| "<missing>".to_string(), |v| v.to_string()),
        operator.as_str(),
        right,
        result,
        target
    );

    let output = json!({
        "field": field,
        "operator": operator.as_str(),
        "value": left,
        "expected": right,
        "result": result,
        "branch": target,
    });
    Ok(ExecutionResult::branch(output, target))
}
