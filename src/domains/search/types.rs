use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{SearchError, SearchResult};

/// Opaque continuation token for resumable pagination.
///
/// The token is serializable so the action framework can persist progress and
/// restart a run from it. Only the search collaborator interprets its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn default_owner() -> String {
    "visible".to_string()
}

fn default_page_size() -> usize {
    crate::config::DEFAULT_PAGE_SIZE
}

/// User-supplied search criteria plus optional field selection.
///
/// Immutable once an export run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpec {
    /// Visibility scope of the entries to search, e.g. "visible" or "public".
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Query object passed through to the search backend unmodified.
    pub query: Value,
    /// Restrict output to exactly these fields, in this order.
    #[serde(default)]
    pub include_fields: Vec<String>,
    /// Drop these fields from the output. Mutually exclusive with include.
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl SearchSpec {
    pub fn new(query: Value) -> Self {
        Self {
            owner: default_owner(),
            query,
            include_fields: Vec::new(),
            exclude_fields: Vec::new(),
            page_size: default_page_size(),
        }
    }

    pub fn validate(&self) -> SearchResult<()> {
        if !self.query.is_object() {
            return Err(SearchError::InvalidSpec(
                "query must be a JSON object".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(SearchError::InvalidSpec(
                "page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One bounded chunk of search results.
///
/// Records are ordered by the collaborator's stable sort (entry identifier),
/// so re-submitting `next_cursor` yields the next disjoint chunk.
#[derive(Debug, Clone)]
pub struct EntryBatch {
    pub records: Vec<Value>,
    pub next_cursor: Option<PageCursor>,
    /// Total result-set size when the backend reports it.
    pub total_available: Option<u64>,
}

impl EntryBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
