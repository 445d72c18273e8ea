//! Hook data model.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing hours reported in [`Count::recent`].
pub const RECENT_HOURS: usize = 48;

/// A named webhook endpoint with an ordered chain of components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Unique identifier, `^[a-z0-9-]+$`
    pub id: String,
    /// Attached components in processing order
    #[serde(default)]
    pub components: Vec<HookComponent>,
}

impl Hook {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            components: Vec::new(),
        }
    }

    /// Whether any instance of `type_name` is attached.
    pub fn has_component_type(&self, type_name: &str) -> bool {
        self.components.iter().any(|c| c.name == type_name)
    }
}

/// Reference to a component instance attached to a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookComponent {
    /// Instance handle, assigned at attach time
    pub id: String,
    /// Component type name, resolved against the registry
    pub name: String,
}

/// Persisted value of an entry in the hooks bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct HookRecord {
    #[serde(default)]
    pub components: Vec<HookComponent>,
}

/// Delivery counters derived from the stats bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    /// One entry per trailing hour, oldest first
    pub recent: Vec<u64>,
    /// Lifetime deliveries
    pub total: u64,
}

impl Default for Count {
    fn default() -> Self {
        Self {
            recent: vec![0; RECENT_HOURS],
            total: 0,
        }
    }
}

/// A hook together with its counters, as returned by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSummary {
    #[serde(flatten)]
    pub hook: Hook,
    pub count: Count,
}

/// Immutable snapshot of one inbound delivery.
///
/// Header names are stored in canonical form (`X-Hub-Signature`) and the
/// map is case-sensitive. If a header repeats, the last value wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// When the snapshot was taken; the delivery's notion of "now".
    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(method: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            headers: BTreeMap::new(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    /// Add a header; the name is canonicalized.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(canonical_header_name(name), value.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Snapshot an HTTP request. Header values that are not valid UTF-8
    /// are decoded lossily.
    pub fn from_http(method: &Method, headers: &HeaderMap, body: &[u8]) -> Self {
        let mut map = BTreeMap::new();
        for (name, value) in headers.iter() {
            map.insert(
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        Self {
            method: method.as_str().to_string(),
            headers: map,
            body: body.to_vec(),
            received_at: Utc::now(),
        }
    }

    /// Look up a header by its canonical name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Canonical MIME header form: first letter and letters after `-` upper
/// case, the rest lower case (`x-github-delivery` -> `X-Github-Delivery`).
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}
