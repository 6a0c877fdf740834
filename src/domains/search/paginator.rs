use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::{SearchError, SearchResult};

use super::repository::SearchClient;
use super::types::{EntryBatch, PageCursor, SearchSpec};

/// How many fetched batches may sit ahead of the encoder.
///
/// Capacity of one lets the next fetch overlap the current encode while
/// keeping at most two batches resident.
const FETCH_PIPELINE_DEPTH: usize = 1;

const RETRY_JITTER_MS: u64 = 250;

/// Bounded exponential backoff applied to transient search outages.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(60),
        }
    }
}

/// Drives the search collaborator cursor-by-cursor into disjoint batches.
///
/// Each fetch attempt is bounded by the run's batch timeout. A timed-out
/// fetch escalates as fatal rather than retrying: a slow search signals the
/// query needs narrowing, and a retry would most likely time out again.
pub struct QueryPaginator {
    client: Arc<dyn SearchClient>,
    spec: SearchSpec,
    fetch_timeout: Duration,
    retry: RetryPolicy,
}

impl QueryPaginator {
    pub fn new(
        client: Arc<dyn SearchClient>,
        spec: SearchSpec,
        fetch_timeout: Duration,
    ) -> SearchResult<Self> {
        spec.validate()?;
        Ok(Self {
            client,
            spec,
            fetch_timeout,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch the next batch after `cursor`, retrying transient outages.
    pub async fn next_batch(&self, cursor: Option<&PageCursor>) -> SearchResult<EntryBatch> {
        let mut attempt: u32 = 1;
        let mut backoff = self.retry.initial_interval;

        loop {
            let fetch = self
                .client
                .search(&self.spec, cursor, self.spec.page_size);
            let outcome = tokio::time::timeout(self.fetch_timeout, fetch).await;

            match outcome {
                Err(_) => return Err(SearchError::Timeout(self.fetch_timeout.as_secs())),
                Ok(Ok(batch)) => return Ok(batch),
                Ok(Err(SearchError::Unavailable(cause))) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(SearchError::Unavailable(cause));
                    }
                    let jitter =
                        Duration::from_millis(rand::rng().random_range(0..RETRY_JITTER_MS));
                    log::warn!(
                        "search unavailable (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        self.retry.max_attempts,
                        cause,
                        backoff + jitter
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    backoff = backoff
                        .mul_f64(self.retry.backoff_factor)
                        .min(self.retry.max_interval);
                    attempt += 1;
                }
                Ok(Err(other)) => return Err(other),
            }
        }
    }

    /// Spawn the fetch loop, streaming batches through a bounded channel so
    /// the next fetch overlaps the consumer's encode of the current batch.
    ///
    /// The task stops on the first error, on an exhausted cursor, or when the
    /// receiver is dropped (cancellation or limit truncation downstream).
    pub fn spawn_fetch(self) -> ReceiverStream<SearchResult<EntryBatch>> {
        let (tx, rx) = mpsc::channel(FETCH_PIPELINE_DEPTH);

        tokio::spawn(async move {
            let mut cursor: Option<PageCursor> = None;
            loop {
                let batch = match self.next_batch(cursor.as_ref()).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                };

                // An empty page means the result set is exhausted even if the
                // backend handed out another cursor.
                if batch.is_empty() {
                    break;
                }

                cursor = batch.next_cursor.clone();
                let done = cursor.is_none();
                if tx.send(Ok(batch)).await.is_err() {
                    break;
                }
                if done {
                    break;
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::search::repository::FixtureSearchClient;
    use futures::StreamExt;
    use serde_json::json;

    fn sample_records(n: usize) -> Vec<serde_json::Value> {
        (0..n)
            .map(|i| {
                json!({
                    "entry_id": format!("e{:05}", i),
                    "formula": "H2O",
                    "temperature": 273.15 + i as f64,
                })
            })
            .collect()
    }

    fn spec_with_page_size(page_size: usize) -> SearchSpec {
        let mut spec = SearchSpec::new(json!({"entry_type": "sample"}));
        spec.page_size = page_size;
        spec
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(2),
            backoff_factor: 2.0,
            max_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn batches_are_disjoint_and_cover_the_result_set() {
        let client = Arc::new(FixtureSearchClient::new(sample_records(25)));
        let paginator =
            QueryPaginator::new(client, spec_with_page_size(10), Duration::from_secs(5))
                .expect("valid spec");

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let batch = paginator.next_batch(cursor.as_ref()).await.expect("batch");
            for record in &batch.records {
                seen.push(record["entry_id"].as_str().expect("entry id").to_string());
            }
            cursor = batch.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        let expected: Vec<String> = (0..25).map(|i| format!("e{:05}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn cursor_resubmission_yields_identical_batches() {
        let client = Arc::new(FixtureSearchClient::new(sample_records(30)));
        let paginator =
            QueryPaginator::new(client, spec_with_page_size(10), Duration::from_secs(5))
                .expect("valid spec");

        let first = paginator.next_batch(None).await.expect("batch");
        let cursor = first.next_cursor.clone().expect("cursor");

        let second_a = paginator.next_batch(Some(&cursor)).await.expect("batch");
        let second_b = paginator.next_batch(Some(&cursor)).await.expect("batch");
        assert_eq!(second_a.records, second_b.records);
        assert_eq!(second_a.next_cursor, second_b.next_cursor);
    }

    #[tokio::test]
    async fn transient_outage_is_retried_until_success() {
        let client = Arc::new(FixtureSearchClient::new(sample_records(5)).failing(2));
        let paginator =
            QueryPaginator::new(client, spec_with_page_size(10), Duration::from_secs(5))
                .expect("valid spec")
                .with_retry_policy(fast_retry());

        let batch = paginator.next_batch(None).await.expect("retried batch");
        assert_eq!(batch.len(), 5);
    }

    #[tokio::test]
    async fn persistent_outage_escalates_after_attempt_cap() {
        let client = Arc::new(FixtureSearchClient::new(sample_records(5)).failing(10));
        let paginator =
            QueryPaginator::new(client, spec_with_page_size(10), Duration::from_secs(5))
                .expect("valid spec")
                .with_retry_policy(fast_retry());

        let err = paginator.next_batch(None).await.expect_err("escalation");
        assert!(matches!(err, SearchError::Unavailable(_)));
    }

    #[tokio::test]
    async fn slow_fetch_times_out_without_retry() {
        let client = Arc::new(
            FixtureSearchClient::new(sample_records(5))
                .delay_from_page(0, Duration::from_millis(100)),
        );
        let paginator =
            QueryPaginator::new(client, spec_with_page_size(10), Duration::from_millis(10))
                .expect("valid spec");

        let err = paginator.next_batch(None).await.expect_err("timeout");
        assert!(matches!(err, SearchError::Timeout(_)));
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected_up_front() {
        let client = Arc::new(FixtureSearchClient::new(sample_records(5)));
        let err = QueryPaginator::new(client, spec_with_page_size(0), Duration::from_secs(5))
            .err()
            .expect("invalid spec");
        assert!(matches!(err, SearchError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn spawned_fetch_streams_batches_in_order() {
        let client = Arc::new(FixtureSearchClient::new(sample_records(25)));
        let paginator =
            QueryPaginator::new(client, spec_with_page_size(10), Duration::from_secs(5))
                .expect("valid spec");

        let mut stream = paginator.spawn_fetch();
        let mut sizes = Vec::new();
        while let Some(batch) = stream.next().await {
            sizes.push(batch.expect("batch").len());
        }
        assert_eq!(sizes, vec![10, 10, 5]);
    }
}
