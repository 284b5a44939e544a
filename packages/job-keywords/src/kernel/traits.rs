// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The submission and sync workflows live in `domains` and use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseAuth, BaseJobStore)

use anyhow::Result;
use async_trait::async_trait;
use supabase_client::ChannelEvent;
use tokio::sync::mpsc;

use crate::common::{JobId, UserId};
use crate::domains::jobs::models::{
    Bucket, JobRecord, JobStatusUpdate, NewBucket, NewJobRecord, ScrapeRequest,
};
use crate::domains::keywords::models::{KeywordRecord, EXTRACTED_KEYWORDS_TABLE, JOB_POSTING_COLUMN};
use crate::kernel::notifications::Notification;

// =============================================================================
// Auth Trait (Infrastructure - session accessor)
// =============================================================================

#[async_trait]
pub trait BaseAuth: Send + Sync {
    /// The signed-in user, or `None` without a session.
    async fn current_user(&self) -> Result<Option<UserId>>;
}

// =============================================================================
// Row Store Trait (Infrastructure - buckets, job records, keywords)
// =============================================================================

#[async_trait]
pub trait BaseJobStore: Send + Sync {
    /// Any bucket owned by `user_id`.
    async fn find_bucket_for_user(&self, user_id: &UserId) -> Result<Option<Bucket>>;

    async fn create_bucket(&self, bucket: &NewBucket) -> Result<Bucket>;

    async fn insert_job_record(&self, record: &NewJobRecord) -> Result<JobRecord>;

    /// Load a job record owned by `user_id`.
    async fn find_job_record(&self, job_id: JobId, user_id: &UserId) -> Result<Option<JobRecord>>;

    /// Patch a job record owned by `user_id`.
    async fn update_job_status(
        &self,
        job_id: JobId,
        user_id: &UserId,
        update: &JobStatusUpdate,
    ) -> Result<()>;

    /// Keyword rows for a job, highest frequency first.
    async fn fetch_keywords(&self, job_id: JobId) -> Result<Vec<KeywordRecord>>;
}

// =============================================================================
// Processor Trait (Infrastructure - remote extraction function)
// =============================================================================

#[async_trait]
pub trait BaseProcessor: Send + Sync {
    /// Invoke the extraction function. No timeout is applied here.
    async fn invoke(&self, request: &ScrapeRequest) -> Result<serde_json::Value>;
}

// =============================================================================
// Change Feed Trait (Infrastructure - realtime row changes)
// =============================================================================

/// Scope of a change-feed subscription: every event type on `table`
/// where `column = value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub channel: String,
    pub table: String,
    pub column: String,
    pub value: String,
}

impl ChangeFilter {
    /// Keyword rows belonging to `job_id`.
    pub fn keywords_for(job_id: JobId) -> Self {
        Self {
            channel: format!("keywords-{}", job_id),
            table: EXTRACTED_KEYWORDS_TABLE.to_string(),
            column: JOB_POSTING_COLUMN.to_string(),
            value: job_id.to_string(),
        }
    }

    /// PostgREST-style filter expression, e.g. `job_posting_id=eq.42`.
    pub fn expression(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }
}

/// Releases a subscription. Dropping the handle without calling
/// `unsubscribe` still releases the underlying listener.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    async fn unsubscribe(self: Box<Self>);
}

/// An open subscription: its event stream and the handle that owns it.
pub struct ChangeSubscription {
    pub events: mpsc::Receiver<ChannelEvent>,
    pub handle: Box<dyn SubscriptionHandle>,
}

#[async_trait]
pub trait BaseChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription>;
}

// =============================================================================
// Notifier Trait (Infrastructure - user-visible messages)
// =============================================================================

pub trait BaseNotifier: Send + Sync {
    fn notify(&self, notification: Notification);
}
