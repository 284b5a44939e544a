//! Job records, buckets, and the extraction-function request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{BucketId, JobId, UserId};

/// Table names in the `public` schema.
pub const JOB_POSTINGS_TABLE: &str = "job_postings";
pub const JOB_SOURCES_TABLE: &str = "job_sources";

/// Name given to the lazily created per-user bucket.
pub const DEFAULT_BUCKET_NAME: &str = "default";

/// Title shown until the extraction function fills in the real one.
pub const PLACEHOLDER_TITLE: &str = "Processing...";

/// `posting_url` for text pasted directly rather than scraped from a URL.
pub const DIRECT_INPUT_URL: &str = "direct-input";

/// Processing status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processed => write!(f, "processed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A `job_postings` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source_id: Option<BucketId>,
    pub user_id: Option<UserId>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub posting_url: Option<String>,
    pub status: Option<JobStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a new job record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewJobRecord {
    pub source_id: BucketId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub posting_url: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewJobRecord {
    /// A freshly submitted posting waiting for extraction.
    pub fn pending(source_id: BucketId, user_id: UserId, text: &str, now: DateTime<Utc>) -> Self {
        Self {
            source_id,
            user_id,
            title: PLACEHOLDER_TITLE.to_string(),
            description: text.to_string(),
            posting_url: DIRECT_INPUT_URL.to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Patch payload for a status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub updated_at: DateTime<Utc>,
}

/// A `job_sources` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    pub source_name: Option<String>,
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

/// Insert payload for a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBucket {
    pub source_name: String,
    pub user_id: UserId,
    pub is_public: bool,
}

impl NewBucket {
    /// The private `"default"` bucket for `user_id`.
    pub fn default_for(user_id: UserId) -> Self {
        Self {
            source_name: DEFAULT_BUCKET_NAME.to_string(),
            user_id,
            is_public: false,
        }
    }
}

/// Body sent to the `scrape-job-posting` function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub job_description: String,
    pub job_posting_id: JobId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_pending_record_shape() {
        let user = UserId(Uuid::nil());
        let now = Utc::now();
        let record = NewJobRecord::pending(BucketId::new(3), user, "Senior Engineer", now);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["title"], "Processing...");
        assert_eq!(json["posting_url"], "direct-input");
        assert_eq!(json["source_id"], 3);
        assert_eq!(json["created_at"], json["updated_at"]);
    }

    #[test]
    fn test_scrape_request_wire_names() {
        let request = ScrapeRequest {
            job_description: "Rust, Tokio".to_string(),
            job_posting_id: JobId::new(42),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"jobDescription": "Rust, Tokio", "jobPostingId": 42})
        );
    }

    #[test]
    fn test_job_record_tolerates_nulls() {
        let row = serde_json::json!({
            "id": 9,
            "source_id": null,
            "user_id": null,
            "title": null,
            "description": "text",
            "posting_url": null,
            "status": "processed",
            "created_at": "2025-02-21T05:44:40.123+00:00",
            "updated_at": null,
            "processed_at": null,
            "content": null,
            "is_public": false
        });
        let record: JobRecord = serde_json::from_value(row).unwrap();
        assert_eq!(record.id, JobId::new(9));
        assert_eq!(record.status, Some(JobStatus::Processed));
    }
}
