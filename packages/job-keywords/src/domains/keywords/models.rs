use serde::{Deserialize, Serialize};

use crate::common::JobId;

pub const EXTRACTED_KEYWORDS_TABLE: &str = "extracted_keywords";

/// Column the change feed and the query filter on.
pub const JOB_POSTING_COLUMN: &str = "job_posting_id";

/// Columns read for the keyword view.
pub const KEYWORD_COLUMNS: &str = "keyword,frequency";

/// An `extracted_keywords` row, reduced to the columns the view reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub keyword: Option<String>,
    pub frequency: Option<i32>,
}

/// A keyword as displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keyword {
    pub keyword: String,
    pub frequency: i32,
}

impl Keyword {
    /// Project a row. Rows without keyword text are dropped; a missing
    /// frequency counts as 1.
    pub fn from_record(record: KeywordRecord) -> Option<Self> {
        Some(Self {
            keyword: record.keyword?,
            frequency: record.frequency.unwrap_or(1),
        })
    }
}

/// What observers of a [`KeywordSync`](super::KeywordSync) see.
///
/// `update_count` goes up by one on every successful non-empty fetch, even
/// when the keywords are unchanged, and only goes back to zero on reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeywordSnapshot {
    pub job_id: Option<JobId>,
    pub keywords: Vec<Keyword>,
    pub update_count: u64,
}

/// Result of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Rows were found and the view was replaced.
    Updated { count: usize },
    /// No rows yet; another fetch is scheduled.
    RetryScheduled { attempt: u32 },
    /// No rows and the retry ceiling was reached.
    RetriesExhausted,
    /// Another fetch was already running, or nothing is being synced.
    Skipped,
    /// The query failed.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_defaults_frequency() {
        let keyword = Keyword::from_record(KeywordRecord {
            keyword: Some("kubernetes".into()),
            frequency: None,
        })
        .unwrap();
        assert_eq!(keyword.frequency, 1);

        assert!(Keyword::from_record(KeywordRecord {
            keyword: None,
            frequency: Some(4),
        })
        .is_none());
    }
}
