//! Message templates
//!
//! A small `{{expression}}` substitution language used by the email action:
//!
//! - `{{hook.id}}`
//! - `{{request.method}}`, `{{request.body}}`, `{{request.received_at}}`
//! - `{{request.headers.X-Github-Event}}` (any casing of the header name)
//! - `{{request.json.commits[0].message}}` (path into a JSON body)
//!
//! Templates are parsed once when configured so that malformed ones are
//! refused up front; unknown values render as the empty string.

use std::fmt;

use serde_json::Value;

use crate::hooks::{canonical_header_name, Hook, Request};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for TemplateError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    HookId,
    Method,
    Body,
    ReceivedAt,
    Header(String),
    Json(Vec<PathPart>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPart {
    Key(String),
    Index(usize),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| TemplateError {
                position: offset + start,
                message: "unclosed '{{'".to_string(),
            })?;
            let expr = parse_expr(after[..end].trim()).map_err(|message| TemplateError {
                position: offset + start,
                message,
            })?;
            segments.push(Segment::Expr(expr));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, hook: &Hook, request: &Request) -> String {
        let mut json_body: Option<Value> = None;
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(Expr::HookId) => out.push_str(&hook.id),
                Segment::Expr(Expr::Method) => out.push_str(&request.method),
                Segment::Expr(Expr::Body) => out.push_str(&request.body_text()),
                Segment::Expr(Expr::ReceivedAt) => out.push_str(&request.received_at.to_rfc3339()),
                Segment::Expr(Expr::Header(name)) => {
                    out.push_str(request.header(name).unwrap_or_default())
                }
                Segment::Expr(Expr::Json(path)) => {
                    let body = json_body.get_or_insert_with(|| {
                        serde_json::from_slice(&request.body).unwrap_or(Value::Null)
                    });
                    out.push_str(&resolve_json_path(body, path));
                }
            }
        }
        out
    }
}

fn parse_expr(expr: &str) -> Result<Expr, String> {
    if expr.is_empty() {
        return Err("empty expression".to_string());
    }
    match expr {
        "hook.id" => return Ok(Expr::HookId),
        "request.method" => return Ok(Expr::Method),
        "request.body" => return Ok(Expr::Body),
        "request.received_at" => return Ok(Expr::ReceivedAt),
        _ => {}
    }
    if let Some(name) = expr.strip_prefix("request.headers.") {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(format!("invalid header name in {expr:?}"));
        }
        return Ok(Expr::Header(canonical_header_name(name)));
    }
    if let Some(path) = expr.strip_prefix("request.json.") {
        let parts = split_path(path)?;
        if parts.is_empty() {
            return Err(format!("empty json path in {expr:?}"));
        }
        return Ok(Expr::Json(parts));
    }
    Err(format!("unknown expression {expr:?}"))
}

/// Dot notation with `[n]` array indexing.
fn split_path(path: &str) -> Result<Vec<PathPart>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    parts.push(PathPart::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    parts.push(PathPart::Key(std::mem::take(&mut current)));
                }
                let index: String = chars.by_ref().take_while(|c| *c != ']').collect();
                let index = index
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("invalid array index {index:?}"))?;
                parts.push(PathPart::Index(index));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(PathPart::Key(current));
    }
    Ok(parts)
}

fn resolve_json_path(value: &Value, path: &[PathPart]) -> String {
    let mut current = value;
    for part in path {
        let next = match part {
            PathPart::Key(key) => current.get(key.as_str()),
            PathPart::Index(idx) => current.as_array().and_then(|arr| arr.get(*idx)),
        };
        match next {
            Some(v) => current = v,
            None => return String::new(),
        }
    }

    match current {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(current).unwrap_or_default(),
    }
}
