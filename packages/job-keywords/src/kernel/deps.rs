//! Application dependencies (using traits for testability)
//!
//! `AppDeps` is the container the workflows are built from. Production code
//! fills it with [`SupabaseAdapter`]; tests use
//! [`TestDependencies`](super::TestDependencies).

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use supabase_client::{ChannelHandle, PostgresChangesFilter, SupabaseClient};

use crate::common::{JobId, UserId};
use crate::domains::jobs::models::{
    Bucket, JobRecord, JobStatusUpdate, NewBucket, NewJobRecord, ScrapeRequest,
    JOB_POSTINGS_TABLE, JOB_SOURCES_TABLE,
};
use crate::domains::jobs::SCRAPE_FUNCTION;
use crate::domains::keywords::models::{
    KeywordRecord, EXTRACTED_KEYWORDS_TABLE, JOB_POSTING_COLUMN, KEYWORD_COLUMNS,
};
use crate::kernel::{
    BaseAuth, BaseChangeFeed, BaseJobStore, BaseNotifier, BaseProcessor, ChangeFilter,
    ChangeSubscription, SubscriptionHandle,
};

// =============================================================================
// SupabaseClient Adapter (implements the infrastructure traits)
// =============================================================================

/// Wrapper around SupabaseClient that implements the Base* traits
#[derive(Clone)]
pub struct SupabaseAdapter(pub SupabaseClient);

impl SupabaseAdapter {
    pub fn new(client: SupabaseClient) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseAuth for SupabaseAdapter {
    async fn current_user(&self) -> Result<Option<UserId>> {
        self.0
            .user_id()
            .map(|id| UserId::parse(&id).with_context(|| format!("malformed user id {}", id)))
            .transpose()
    }
}

#[async_trait]
impl BaseJobStore for SupabaseAdapter {
    async fn find_bucket_for_user(&self, user_id: &UserId) -> Result<Option<Bucket>> {
        let buckets: Vec<Bucket> = self
            .0
            .from(JOB_SOURCES_TABLE)
            .eq("user_id", user_id)
            .limit(1)
            .select("*")
            .await?;
        Ok(buckets.into_iter().next())
    }

    async fn create_bucket(&self, bucket: &NewBucket) -> Result<Bucket> {
        Ok(self.0.from(JOB_SOURCES_TABLE).insert(bucket).await?)
    }

    async fn insert_job_record(&self, record: &NewJobRecord) -> Result<JobRecord> {
        Ok(self.0.from(JOB_POSTINGS_TABLE).insert(record).await?)
    }

    async fn find_job_record(&self, job_id: JobId, user_id: &UserId) -> Result<Option<JobRecord>> {
        let records: Vec<JobRecord> = self
            .0
            .from(JOB_POSTINGS_TABLE)
            .eq("id", job_id)
            .eq("user_id", user_id)
            .limit(1)
            .select("*")
            .await?;
        Ok(records.into_iter().next())
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        user_id: &UserId,
        update: &JobStatusUpdate,
    ) -> Result<()> {
        let updated = self
            .0
            .from(JOB_POSTINGS_TABLE)
            .eq("id", job_id)
            .eq("user_id", user_id)
            .update(update)
            .await?;
        if updated == 0 {
            tracing::warn!(job_id = %job_id, "Status update matched no rows");
        }
        Ok(())
    }

    async fn fetch_keywords(&self, job_id: JobId) -> Result<Vec<KeywordRecord>> {
        Ok(self
            .0
            .from(EXTRACTED_KEYWORDS_TABLE)
            .eq(JOB_POSTING_COLUMN, job_id)
            .order("frequency", false)
            .select(KEYWORD_COLUMNS)
            .await?)
    }
}

#[async_trait]
impl BaseProcessor for SupabaseAdapter {
    async fn invoke(&self, request: &ScrapeRequest) -> Result<serde_json::Value> {
        Ok(self.0.invoke(SCRAPE_FUNCTION, request).await?)
    }
}

#[async_trait]
impl BaseChangeFeed for SupabaseAdapter {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        let changes = PostgresChangesFilter::all(&filter.table).with_eq(&filter.column, &filter.value);
        let channel = self.0.realtime().subscribe(&filter.channel, changes).await?;

        Ok(ChangeSubscription {
            events: channel.events,
            handle: Box::new(channel.handle),
        })
    }
}

#[async_trait]
impl SubscriptionHandle for ChannelHandle {
    async fn unsubscribe(self: Box<Self>) {
        ChannelHandle::unsubscribe(*self).await;
    }
}

// =============================================================================
// AppDeps
// =============================================================================

/// Dependencies shared by the workflows (using traits for testability)
#[derive(Clone)]
pub struct AppDeps {
    pub auth: Arc<dyn BaseAuth>,
    pub store: Arc<dyn BaseJobStore>,
    pub processor: Arc<dyn BaseProcessor>,
    pub change_feed: Arc<dyn BaseChangeFeed>,
    pub notifier: Arc<dyn BaseNotifier>,
}

impl AppDeps {
    /// Create new AppDeps with the given dependencies
    pub fn new(
        auth: Arc<dyn BaseAuth>,
        store: Arc<dyn BaseJobStore>,
        processor: Arc<dyn BaseProcessor>,
        change_feed: Arc<dyn BaseChangeFeed>,
        notifier: Arc<dyn BaseNotifier>,
    ) -> Self {
        Self {
            auth,
            store,
            processor,
            change_feed,
            notifier,
        }
    }

    /// Every backend concern served by one Supabase project.
    pub fn supabase(client: SupabaseClient, notifier: Arc<dyn BaseNotifier>) -> Self {
        let adapter = Arc::new(SupabaseAdapter::new(client));
        Self::new(
            adapter.clone(),
            adapter.clone(),
            adapter.clone(),
            adapter,
            notifier,
        )
    }
}
