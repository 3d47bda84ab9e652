//! Filter registry for prompt templates.
//!
//! Filters are pure functions `(value, args) -> value`, seeded at engine
//! construction. Custom filters register under a name; lookups are by exact
//! name at render time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::TemplateError;

/// A pure template filter. Receives the piped value and literal arguments.
pub type FilterFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, TemplateError> + Send + Sync>;

/// Named filter table. Seeded with the builtins; callers may add their own
/// before handing the registry to the renderer.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FilterRegistry {
    /// Empty registry (no builtins). Mostly for tests.
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Registry with the builtin filters: `length`, `default`, `upper`,
    /// `lower`, `tojson`, `truncate`, `date`, `trim`, `join`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register("length", Arc::new(filter_length));
        reg.register("default", Arc::new(filter_default));
        reg.register("upper", Arc::new(filter_upper));
        reg.register("lower", Arc::new(filter_lower));
        reg.register("tojson", Arc::new(filter_tojson));
        reg.register("truncate", Arc::new(filter_truncate));
        reg.register("date", Arc::new(filter_date));
        reg.register("trim", Arc::new(filter_trim));
        reg.register("join", Arc::new(filter_join));
        reg
    }

    /// Adds or replaces a filter by name.
    pub fn register(&mut self, name: impl Into<String>, f: FilterFn) {
        self.filters.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn apply(&self, name: &str, value: &Value, args: &[Value]) -> Result<Value, TemplateError> {
        let f = self
            .get(name)
            .ok_or_else(|| TemplateError(format!("unknown filter '{}'", name)))?;
        f(value, args)
    }
}

fn as_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn filter_length(value: &Value, _args: &[Value]) -> Result<Value, TemplateError> {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::Null => 0,
        _ => as_display_string(value).chars().count(),
    };
    Ok(Value::from(len))
}

/// Null or empty-string input falls back to the first argument.
fn filter_default(value: &Value, args: &[Value]) -> Result<Value, TemplateError> {
    let fallback = args
        .first()
        .ok_or_else(|| TemplateError("default: missing argument".into()))?;
    let empty = matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty());
    Ok(if empty {
        fallback.clone()
    } else {
        value.clone()
    })
}

fn filter_upper(value: &Value, _args: &[Value]) -> Result<Value, TemplateError> {
    Ok(Value::String(as_display_string(value).to_uppercase()))
}

fn filter_lower(value: &Value, _args: &[Value]) -> Result<Value, TemplateError> {
    Ok(Value::String(as_display_string(value).to_lowercase()))
}

fn filter_tojson(value: &Value, _args: &[Value]) -> Result<Value, TemplateError> {
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|e| TemplateError(format!("tojson: {}", e)))
}

/// Truncates to N characters, appending `...` only when something was cut.
fn filter_truncate(value: &Value, args: &[Value]) -> Result<Value, TemplateError> {
    let n = args
        .first()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| TemplateError("truncate: expected a numeric length".into()))? as usize;
    let s = as_display_string(value);
    if s.chars().count() <= n {
        return Ok(Value::String(s));
    }
    let cut: String = s.chars().take(n).collect();
    Ok(Value::String(format!("{}...", cut)))
}

/// Formats an epoch-millis number or RFC 3339 string with a chrono format
/// string (default `%Y-%m-%d %H:%M:%S`).
fn filter_date(value: &Value, args: &[Value]) -> Result<Value, TemplateError> {
    let fmt = args
        .first()
        .and_then(|v| v.as_str())
        .unwrap_or("%Y-%m-%d %H:%M:%S");
    let dt: DateTime<Utc> = match value {
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| TemplateError("date: epoch out of range".into()))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| TemplateError("date: epoch out of range".into()))?
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| TemplateError(format!("date: {}", e)))?
            .with_timezone(&Utc),
        Value::Null => return Ok(Value::String(String::new())),
        other => {
            return Err(TemplateError(format!(
                "date: cannot format {}",
                other
            )))
        }
    };
    Ok(Value::String(dt.format(fmt).to_string()))
}

fn filter_trim(value: &Value, _args: &[Value]) -> Result<Value, TemplateError> {
    Ok(Value::String(as_display_string(value).trim().to_string()))
}

fn filter_join(value: &Value, args: &[Value]) -> Result<Value, TemplateError> {
    let sep = args.first().and_then(|v| v.as_str()).unwrap_or(", ");
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(as_display_string).collect();
            Ok(Value::String(parts.join(sep)))
        }
        Value::Null => Ok(Value::String(String::new())),
        other => Ok(Value::String(as_display_string(other))),
    }
}
