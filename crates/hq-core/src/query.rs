//! # Structured Queries
//!
//! The tagged intermediate form a `field = value` clause is converted into,
//! and its rendering as search-engine query DSL.

use serde_json::{Map, Value};
use std::fmt;

/// A query string that passed [`crate::validate`].
///
/// Holds the trimmed input unchanged; validation never rewrites the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub(crate) fn new(trimmed: &str) -> Self {
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert this query into its structured form.
    pub fn convert(&self) -> Result<StructuredQuery, crate::ConversionError> {
        crate::convert(&self.0)
    }
}

impl AsRef<str> for ValidatedQuery {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One converted clause. Exactly one variant is produced per clause.
///
/// Field names keep the case the user typed: `Hostname` and `hostname`
/// are different queries (and different cache keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredQuery {
    /// Glob match; the pattern keeps its `*`s.
    Wildcard { field: String, pattern: String },
    /// Regular expression match; the enclosing slashes are already stripped.
    Regexp { field: String, pattern: String },
    /// Exact match.
    Term { field: String, value: String },
}

impl StructuredQuery {
    pub fn field(&self) -> &str {
        match self {
            Self::Wildcard { field, .. } | Self::Regexp { field, .. } | Self::Term { field, .. } => {
                field
            }
        }
    }

    /// The DSL node name: `wildcard`, `regexp` or `term`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Wildcard { .. } => "wildcard",
            Self::Regexp { .. } => "regexp",
            Self::Term { .. } => "term",
        }
    }

    fn operand(&self) -> &str {
        match self {
            Self::Wildcard { pattern, .. } | Self::Regexp { pattern, .. } => pattern,
            Self::Term { value, .. } => value,
        }
    }

    /// Render as a search DSL node, e.g. `{"wildcard": {"Hostname": "octoxlabs*"}}`.
    pub fn to_dsl(&self) -> Value {
        let mut inner = Map::new();
        inner.insert(self.field().to_string(), Value::String(self.operand().into()));
        let mut outer = Map::new();
        outer.insert(self.kind().to_string(), Value::Object(inner));
        Value::Object(outer)
    }

    /// Full search request body: `{"query": <dsl>}`.
    pub fn to_search_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".into(), self.to_dsl());
        Value::Object(body)
    }

    /// Canonical serialization used to deduplicate identical queries.
    ///
    /// `serde_json` maps are key-ordered, so two equal queries always
    /// render to the same string regardless of how the raw text was spaced.
    pub fn cache_key(&self) -> String {
        self.to_dsl().to_string()
    }
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dsl())
    }
}
