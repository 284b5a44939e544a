pub mod models;
pub mod retry;
pub mod sync;

pub use models::{FetchOutcome, Keyword, KeywordRecord, KeywordSnapshot};
pub use retry::{RetryPolicy, RetryState};
pub use sync::KeywordSync;
