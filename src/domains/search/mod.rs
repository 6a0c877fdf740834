pub mod paginator;
pub mod repository;
pub mod types;

pub use paginator::{QueryPaginator, RetryPolicy};
pub use repository::{FixtureSearchClient, SearchClient};
pub use types::{EntryBatch, PageCursor, SearchSpec};
