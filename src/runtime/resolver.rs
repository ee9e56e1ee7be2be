//! `{{path.to.value}}` template resolution against an execution context
//!
//! The first path segment picks a root: `trigger` selects the trigger data,
//! otherwise a variable name, otherwise a node id. Remaining segments walk
//! objects by key and arrays by numeric index. Resolution never performs I/O.

use crate::error::NodeError;
use crate::workflow::types::ExecutionContext;
use serde_json::{Map, Value};
use std::borrow::Cow;
use thiserror::Error;

/// Why a template string could not be parsed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated placeholder in '{0}'")]
    Unterminated(String),
    #[error("empty placeholder in '{0}'")]
    EmptyPath(String),
    #[error("invalid path segment '{segment}' in '{template}'")]
    InvalidSegment { template: String, segment: String },
}

impl From<TemplateError> for NodeError {
    fn from(err: TemplateError) -> Self {
        NodeError::Resolution(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Path(Vec<String>),
}

/// A parsed template: literal text interleaved with placeholder paths
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut rest = raw;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or_else(|| TemplateError::Unterminated(raw.to_string()))?;
            parts.push(Part::Path(parse_path(raw, &after_open[..end])?));
            rest = &after_open[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }

        Ok(Self { parts })
    }

    /// True when the template is one placeholder and nothing else
    fn single_path(&self) -> Option<&[String]> {
        match self.parts.as_slice() {
            [Part::Path(path)] => Some(path),
            _ => None,
        }
    }

    pub fn has_placeholders(&self) -> bool {
        self.parts.iter().any(|part| matches!(part, Part::Path(_)))
    }

    /// Render against a context
    ///
    /// A lone placeholder keeps the referenced value's JSON type and yields
    /// `None` when the path is missing. Mixed templates always render to text.
    pub fn render(&self, context: &ExecutionContext) -> Option<Value> {
        if let Some(path) = self.single_path() {
            return lookup(context, path).map(Cow::into_owned);
        }

        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Path(path) => match lookup(context, path).as_deref() {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                },
            }
        }
        Some(Value::String(out))
    }
}

fn parse_path(raw: &str, inner: &str) -> Result<Vec<String>, TemplateError> {
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return Err(TemplateError::EmptyPath(raw.to_string()));
    }

    trimmed
        .split('.')
        .map(|segment| {
            if segment.is_empty() || segment.chars().any(char::is_whitespace) {
                Err(TemplateError::InvalidSegment {
                    template: raw.to_string(),
                    segment: segment.to_string(),
                })
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

/// A bare `trigger` path yields the whole trigger data as an object
fn lookup<'a>(context: &'a ExecutionContext, path: &[String]) -> Option<Cow<'a, Value>> {
    let (root, rest) = path.split_first()?;

    if root == "trigger" {
        if rest.is_empty() {
            return Some(Cow::Owned(Value::Object(context.trigger_data.clone())));
        }
        return walk_map(&context.trigger_data, rest).map(Cow::Borrowed);
    }
    if let Some(value) = context.variables.get(root) {
        return walk(value, rest).map(Cow::Borrowed);
    }
    walk(context.node_outputs.get(root)?, rest).map(Cow::Borrowed)
}

fn walk_map<'a>(map: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    walk(map.get(first)?, rest)
}

fn walk<'a>(mut current: &'a Value, path: &[String]) -> Option<&'a Value> {
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolve an expression, treating unparsable templates as missing
pub fn resolve(expression: &str, context: &ExecutionContext) -> Option<Value> {
    try_resolve(expression, context).ok().flatten()
}

/// Resolve an expression, reporting malformed templates
pub fn try_resolve(
    expression: &str,
    context: &ExecutionContext,
) -> Result<Option<Value>, TemplateError> {
    Ok(Template::parse(expression)?.render(context))
}

/// Resolve every string leaf of a JSON template; missing placeholders become null
pub fn resolve_object(template: &Value, context: &ExecutionContext) -> Value {
    match template {
        Value::String(raw) => resolve(raw, context).unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(
            items.iter().map(|item| resolve_object(item, context)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), resolve_object(value, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Strict variant of [`resolve_object`]
pub fn try_resolve_object(
    template: &Value,
    context: &ExecutionContext,
) -> Result<Value, TemplateError> {
    Ok(match template {
        Value::String(raw) => try_resolve(raw, context)?.unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| try_resolve_object(item, context))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, value) in map {
                resolved.insert(key.clone(), try_resolve_object(value, context)?);
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    })
}

/// Resolve a field reference that may be written with or without braces
///
/// `"trigger.priority"` and `"{{trigger.priority}}"` address the same value.
pub fn resolve_reference(
    reference: &str,
    context: &ExecutionContext,
) -> Result<Option<Value>, TemplateError> {
    let template = Template::parse(reference)?;
    if template.has_placeholders() {
        return Ok(template.render(context));
    }
    let path = parse_path(reference, reference)?;
    Ok(lookup(context, &path).map(Cow::into_owned))
}
