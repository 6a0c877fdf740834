use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{SearchError, SearchResult};

use super::types::{EntryBatch, PageCursor, SearchSpec};

/// Interface to the external search engine.
///
/// Implementations must be read-only and idempotent for a given cursor under
/// a stable underlying snapshot: the same cursor yields the same batch.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(
        &self,
        spec: &SearchSpec,
        cursor: Option<&PageCursor>,
        page_size: usize,
    ) -> SearchResult<EntryBatch>;
}

/// In-memory search client over a fixed record set.
///
/// Serves tests and local development; cursors encode the next record offset.
/// Failure injection covers the collaborator's documented failure modes.
pub struct FixtureSearchClient {
    records: Vec<Value>,
    fail_next: AtomicUsize,
    page_delay: Option<(usize, Duration)>,
}

impl FixtureSearchClient {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            fail_next: AtomicUsize::new(0),
            page_delay: None,
        }
    }

    /// Fail the next `n` calls with `SearchError::Unavailable`.
    pub fn failing(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep for `delay` before answering any page at or past `page_index`.
    pub fn delay_from_page(mut self, page_index: usize, delay: Duration) -> Self {
        self.page_delay = Some((page_index, delay));
        self
    }
}

#[async_trait]
impl SearchClient for FixtureSearchClient {
    async fn search(
        &self,
        _spec: &SearchSpec,
        cursor: Option<&PageCursor>,
        page_size: usize,
    ) -> SearchResult<EntryBatch> {
        if page_size == 0 {
            return Err(SearchError::InvalidSpec(
                "page_size must be greater than zero".to_string(),
            ));
        }

        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(SearchError::Unavailable("injected outage".to_string()));
        }

        let offset = match cursor {
            Some(token) => token
                .as_str()
                .parse::<usize>()
                .map_err(|_| SearchError::InvalidSpec(format!("malformed cursor {:?}", token)))?,
            None => 0,
        };

        if let Some((page_index, delay)) = self.page_delay {
            if offset / page_size >= page_index {
                tokio::time::sleep(delay).await;
            }
        }

        let end = (offset + page_size).min(self.records.len());
        let records = self
            .records
            .get(offset..end)
            .map(|slice| slice.to_vec())
            .unwrap_or_default();
        let next_cursor = if end < self.records.len() {
            Some(PageCursor::new(end.to_string()))
        } else {
            None
        };

        Ok(EntryBatch {
            records,
            next_cursor,
            total_available: Some(self.records.len() as u64),
        })
    }
}
