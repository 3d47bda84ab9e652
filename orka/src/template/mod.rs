//! Prompt rendering: `{{ expression }}` substitution over the context scope.
//!
//! Expressions dot-navigate into the scope (`previous_outputs.answer.result`),
//! may call `now()`, and pipe through named filters
//! (`{{ input | truncate(80) }}`). The renderer is pure with respect to the
//! scope snapshot and performs no I/O.
//!
//! Undefined identifiers render as empty string; with `strict_undefined` they
//! fail with a [`TemplateError`] instead. Nested access on a missing parent is
//! always empty. The `default` filter rescues an undefined value in both modes.

mod filters;

pub use filters::{FilterFn, FilterRegistry};

use serde_json::Value;

use crate::error::OrkaError;

/// Render-time error: undefined identifier (strict mode), unknown filter or
/// malformed expression.
#[derive(Debug, Clone)]
pub struct TemplateError(pub String);

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TemplateError {}

impl From<TemplateError> for OrkaError {
    fn from(e: TemplateError) -> Self {
        OrkaError::Template(e.0)
    }
}

/// Renders agent prompts from templates and a scope built by
/// [`crate::context::Context::template_scope`].
#[derive(Clone)]
pub struct TemplateRenderer {
    filters: FilterRegistry,
    strict_undefined: bool,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    /// Lenient renderer with the builtin filters.
    pub fn new() -> Self {
        Self {
            filters: FilterRegistry::with_builtins(),
            strict_undefined: false,
        }
    }

    /// Renderer that fails on undefined identifiers.
    pub fn strict() -> Self {
        Self {
            filters: FilterRegistry::with_builtins(),
            strict_undefined: true,
        }
    }

    /// Replaces the filter registry (seeded at engine construction).
    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn strict_undefined(&self) -> bool {
        self.strict_undefined
    }

    /// Renders `template` against `scope`. Text outside `{{ }}` passes
    /// through unchanged; single braces are literal.
    pub fn render(&self, template: &str, scope: &Value) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| TemplateError("unclosed '{{' expression".into()))?;
            let expr = after[..end].trim();
            out.push_str(&self.eval(expr, scope)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Evaluates one `path | filter | filter(args)` expression to display text.
    fn eval(&self, expr: &str, scope: &Value) -> Result<String, TemplateError> {
        if expr.is_empty() {
            return Err(TemplateError("empty expression".into()));
        }
        let mut parts = split_pipes(expr);
        let head = parts.remove(0);
        let mut value = self.resolve_primary(head.trim(), scope)?;

        for part in parts {
            let (name, args) = parse_filter_call(part.trim())?;
            let input = match &value {
                // `default` may rescue an undefined value.
                Resolved::Undefined(_) if name == "default" => Value::Null,
                Resolved::Undefined(ident) => {
                    if self.strict_undefined {
                        return Err(TemplateError(format!("undefined identifier '{}'", ident)));
                    }
                    Value::Null
                }
                Resolved::Value(v) => v.clone(),
            };
            value = Resolved::Value(self.filters.apply(name, &input, &args)?);
        }

        match value {
            Resolved::Undefined(ident) => {
                if self.strict_undefined {
                    Err(TemplateError(format!("undefined identifier '{}'", ident)))
                } else {
                    Ok(String::new())
                }
            }
            Resolved::Value(v) => Ok(display(&v)),
        }
    }

    /// Resolves the head of an expression: literal, `now()`, or a dot path.
    fn resolve_primary(&self, head: &str, scope: &Value) -> Result<Resolved, TemplateError> {
        if head.is_empty() {
            return Err(TemplateError("empty expression".into()));
        }
        if head == "now()" {
            return Ok(Resolved::Value(Value::String(
                chrono::Utc::now().to_rfc3339(),
            )));
        }
        if let Some(lit) = parse_literal(head) {
            return Ok(Resolved::Value(lit));
        }

        let mut current = scope;
        for seg in head.split('.') {
            let seg = seg.trim();
            if seg.is_empty() {
                return Err(TemplateError(format!("malformed path '{}'", head)));
            }
            let next = match current {
                Value::Object(map) => map.get(seg),
                Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                // Missing parent (or leaf): undefined, never a hard error here.
                None => return Ok(Resolved::Undefined(head.to_string())),
            }
        }
        Ok(Resolved::Value(current.clone()))
    }
}

enum Resolved {
    Value(Value),
    /// Identifier that did not resolve; carries the path for strict errors.
    Undefined(String),
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Splits on `|` outside of quotes and parentheses.
fn split_pipes(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match (c, in_quote) {
            (q, Some(open)) if q == open => in_quote = None,
            (_, Some(_)) => {}
            ('\'', None) | ('"', None) => in_quote = Some(c),
            ('(', None) => depth += 1,
            (')', None) => depth = depth.saturating_sub(1),
            ('|', None) if depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

/// Parses `name` or `name(arg, ...)` with string/number/bare-word arguments.
fn parse_filter_call(call: &str) -> Result<(&str, Vec<Value>), TemplateError> {
    if call.is_empty() {
        return Err(TemplateError("empty filter".into()));
    }
    let Some(open) = call.find('(') else {
        return Ok((call, Vec::new()));
    };
    if !call.ends_with(')') {
        return Err(TemplateError(format!("malformed filter call '{}'", call)));
    }
    let name = call[..open].trim();
    let inner = &call[open + 1..call.len() - 1];
    let mut args = Vec::new();
    for raw in split_args(inner) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = parse_literal(raw)
            .unwrap_or_else(|| Value::String(raw.to_string()));
        args.push(value);
    }
    Ok((name, args))
}

fn split_args(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match (c, in_quote) {
            (q, Some(open)) if q == open => in_quote = None,
            (_, Some(_)) => {}
            ('\'', None) | ('"', None) => in_quote = Some(c),
            (',', None) => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !inner[start..].trim().is_empty() || !parts.is_empty() {
        parts.push(&inner[start..]);
    }
    parts
}

/// Quoted strings, integers, floats, booleans.
fn parse_literal(token: &str) -> Option<Value> {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return Some(Value::String(token[1..token.len() - 1].to_string()));
        }
    }
    if token == "true" {
        return Some(Value::Bool(true));
    }
    if token == "false" {
        return Some(Value::Bool(false));
    }
    if let Ok(i) = token.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Ok(f) = token.parse::<f64>() {
        return Some(Value::from(f));
    }
    None
}
