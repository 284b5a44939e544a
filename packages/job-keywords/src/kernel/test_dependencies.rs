// TestDependencies - mock implementations for testing
//
// Provides in-memory backends that can be injected into AppDeps for tests.
// Every mock records its calls so tests can assert on side effects.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use supabase_client::ChannelEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    AppDeps, BaseAuth, BaseChangeFeed, BaseJobStore, BaseNotifier, BaseProcessor, ChangeFilter,
    ChangeSubscription, Notification, SubscriptionHandle,
};
use crate::common::{BucketId, JobId, UserId};
use crate::domains::jobs::models::{
    Bucket, JobRecord, JobStatus, JobStatusUpdate, NewBucket, NewJobRecord, ScrapeRequest,
};
use crate::domains::keywords::models::KeywordRecord;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The user every mock session belongs to unless told otherwise.
pub fn test_user() -> UserId {
    UserId(Uuid::from_u128(0x6a1f_0c2e_4b7d_4e11_9a3c_5f00_0000_0001))
}

// =============================================================================
// Mock Auth
// =============================================================================

pub struct MockAuth {
    user: Mutex<Option<UserId>>,
}

impl MockAuth {
    pub fn signed_in(user_id: UserId) -> Self {
        Self {
            user: Mutex::new(Some(user_id)),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            user: Mutex::new(None),
        }
    }

    pub fn set_user(&self, user_id: Option<UserId>) {
        *lock(&self.user) = user_id;
    }
}

#[async_trait]
impl BaseAuth for MockAuth {
    async fn current_user(&self) -> Result<Option<UserId>> {
        Ok(*lock(&self.user))
    }
}

// =============================================================================
// Mock Job Store
// =============================================================================

/// A call made against [`MockJobStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    FindBucket(UserId),
    CreateBucket(NewBucket),
    InsertJob(NewJobRecord),
    FindJob(JobId),
    UpdateStatus(JobId, JobStatus),
    FetchKeywords(JobId),
}

impl StoreCall {
    fn is_write(&self) -> bool {
        matches!(
            self,
            StoreCall::CreateBucket(_) | StoreCall::InsertJob(_) | StoreCall::UpdateStatus(..)
        )
    }
}

pub struct MockJobStore {
    buckets: Mutex<Vec<Bucket>>,
    jobs: Mutex<BTreeMap<JobId, JobRecord>>,
    keywords: Mutex<BTreeMap<JobId, Vec<KeywordRecord>>>,
    calls: Mutex<Vec<StoreCall>>,
    next_id: AtomicI64,
    fail_inserts: AtomicBool,
    fail_keyword_fetch: AtomicBool,
    keyword_fetch_delay: Mutex<Option<Duration>>,
    fetches_in_flight: AtomicUsize,
    max_concurrent_fetches: AtomicUsize,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(Vec::new()),
            jobs: Mutex::new(BTreeMap::new()),
            keywords: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_inserts: AtomicBool::new(false),
            fail_keyword_fetch: AtomicBool::new(false),
            keyword_fetch_delay: Mutex::new(None),
            fetches_in_flight: AtomicUsize::new(0),
            max_concurrent_fetches: AtomicUsize::new(0),
        }
    }

    /// Start ids for new rows at `id`.
    pub fn with_next_id(self, id: i64) -> Self {
        self.next_id.store(id, Ordering::SeqCst);
        self
    }

    pub fn with_bucket(self, bucket: Bucket) -> Self {
        lock(&self.buckets).push(bucket);
        self
    }

    pub fn with_job(self, record: JobRecord) -> Self {
        lock(&self.jobs).insert(record.id, record);
        self
    }

    /// Make every insert fail.
    pub fn failing_inserts(self) -> Self {
        self.fail_inserts.store(true, Ordering::SeqCst);
        self
    }

    /// Hold every keyword fetch for `delay` before answering.
    pub fn with_keyword_fetch_delay(self, delay: Duration) -> Self {
        *lock(&self.keyword_fetch_delay) = Some(delay);
        self
    }

    pub fn set_fail_keyword_fetch(&self, fail: bool) {
        self.fail_keyword_fetch.store(fail, Ordering::SeqCst);
    }

    /// Add an extracted keyword row for `job_id`.
    pub fn add_keyword(&self, job_id: JobId, keyword: &str, frequency: Option<i32>) {
        lock(&self.keywords)
            .entry(job_id)
            .or_default()
            .push(KeywordRecord {
                keyword: Some(keyword.to_string()),
                frequency,
            });
    }

    /// Add a raw keyword row, including ones with no keyword text.
    pub fn add_keyword_record(&self, job_id: JobId, record: KeywordRecord) {
        lock(&self.keywords).entry(job_id).or_default().push(record);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Inserts and updates made so far.
    pub fn write_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.is_write()).count()
    }

    pub fn keyword_fetch_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, StoreCall::FetchKeywords(_)))
            .count()
    }

    /// Highest number of keyword fetches observed running at once.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches.load(Ordering::SeqCst)
    }

    pub fn job(&self, job_id: JobId) -> Option<JobRecord> {
        lock(&self.jobs).get(&job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        lock(&self.jobs).values().cloned().collect()
    }

    pub fn buckets(&self) -> Vec<Bucket> {
        lock(&self.buckets).clone()
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MockJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseJobStore for MockJobStore {
    async fn find_bucket_for_user(&self, user_id: &UserId) -> Result<Option<Bucket>> {
        self.record(StoreCall::FindBucket(*user_id));
        Ok(lock(&self.buckets)
            .iter()
            .find(|b| b.user_id.as_ref() == Some(user_id))
            .cloned())
    }

    async fn create_bucket(&self, bucket: &NewBucket) -> Result<Bucket> {
        self.record(StoreCall::CreateBucket(bucket.clone()));
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("insert into job_sources rejected");
        }

        let created = Bucket {
            id: BucketId::new(self.next_id()),
            source_name: Some(bucket.source_name.clone()),
            user_id: Some(bucket.user_id),
            is_public: Some(bucket.is_public),
        };
        lock(&self.buckets).push(created.clone());
        Ok(created)
    }

    async fn insert_job_record(&self, record: &NewJobRecord) -> Result<JobRecord> {
        self.record(StoreCall::InsertJob(record.clone()));
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("insert into job_postings rejected");
        }

        let created = JobRecord {
            id: JobId::new(self.next_id()),
            source_id: Some(record.source_id),
            user_id: Some(record.user_id),
            title: Some(record.title.clone()),
            description: Some(record.description.clone()),
            posting_url: Some(record.posting_url.clone()),
            status: Some(record.status),
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
            processed_at: None,
        };
        lock(&self.jobs).insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_job_record(&self, job_id: JobId, user_id: &UserId) -> Result<Option<JobRecord>> {
        self.record(StoreCall::FindJob(job_id));
        Ok(lock(&self.jobs)
            .get(&job_id)
            .filter(|r| r.user_id.as_ref() == Some(user_id))
            .cloned())
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        user_id: &UserId,
        update: &JobStatusUpdate,
    ) -> Result<()> {
        self.record(StoreCall::UpdateStatus(job_id, update.status));
        if let Some(record) = lock(&self.jobs)
            .get_mut(&job_id)
            .filter(|r| r.user_id.as_ref() == Some(user_id))
        {
            record.status = Some(update.status);
            record.updated_at = Some(update.updated_at);
        }
        Ok(())
    }

    async fn fetch_keywords(&self, job_id: JobId) -> Result<Vec<KeywordRecord>> {
        self.record(StoreCall::FetchKeywords(job_id));

        let running = self.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_fetches.fetch_max(running, Ordering::SeqCst);

        let delay = *lock(&self.keyword_fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_keyword_fetch.load(Ordering::SeqCst) {
            bail!("select from extracted_keywords failed");
        }

        let mut rows = lock(&self.keywords).get(&job_id).cloned().unwrap_or_default();
        rows.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        Ok(rows)
    }
}

// =============================================================================
// Mock Processor
// =============================================================================

#[derive(Debug, Clone)]
pub enum ProcessorBehavior {
    Succeed,
    Fail(String),
    /// Answer successfully after the delay.
    Delay(Duration),
}

pub struct MockProcessor {
    behavior: Mutex<ProcessorBehavior>,
    calls: Mutex<Vec<ScrapeRequest>>,
    completed: AtomicUsize,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::with_behavior(ProcessorBehavior::Succeed)
    }

    pub fn with_behavior(behavior: ProcessorBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self::with_behavior(ProcessorBehavior::Fail(message.to_string()))
    }

    pub fn delayed(delay: Duration) -> Self {
        Self::with_behavior(ProcessorBehavior::Delay(delay))
    }

    pub fn set_behavior(&self, behavior: ProcessorBehavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn calls(&self) -> Vec<ScrapeRequest> {
        lock(&self.calls).clone()
    }

    /// Invocations that ran to the end, including abandoned ones.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Default for MockProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseProcessor for MockProcessor {
    async fn invoke(&self, request: &ScrapeRequest) -> Result<serde_json::Value> {
        lock(&self.calls).push(request.clone());
        let behavior = lock(&self.behavior).clone();

        let result = match behavior {
            ProcessorBehavior::Succeed => Ok(serde_json::json!({ "success": true })),
            ProcessorBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
            ProcessorBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(serde_json::json!({ "success": true }))
            }
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// Mock Change Feed
// =============================================================================

pub struct MockChangeFeed {
    auto_confirm: bool,
    fail_subscribe: AtomicBool,
    filters: Mutex<Vec<ChangeFilter>>,
    senders: Mutex<Vec<mpsc::Sender<ChannelEvent>>>,
    active: Arc<AtomicUsize>,
    unsubscribes: Arc<AtomicUsize>,
}

impl MockChangeFeed {
    /// A feed that confirms every subscription immediately.
    pub fn new() -> Self {
        Self {
            auto_confirm: true,
            fail_subscribe: AtomicBool::new(false),
            filters: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A feed that waits for [`confirm`](Self::confirm).
    pub fn manual() -> Self {
        Self {
            auto_confirm: false,
            ..Self::new()
        }
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Send `Subscribed` on the latest subscription.
    pub fn confirm(&self) -> bool {
        self.emit(ChannelEvent::Subscribed)
    }

    /// Send a row change on the latest subscription.
    pub fn emit_change(&self, payload: serde_json::Value) -> bool {
        self.emit(ChannelEvent::Change(payload))
    }

    pub fn emit(&self, event: ChannelEvent) -> bool {
        lock(&self.senders)
            .last()
            .map(|tx| tx.try_send(event).is_ok())
            .unwrap_or(false)
    }

    pub fn filters(&self) -> Vec<ChangeFilter> {
        lock(&self.filters).clone()
    }

    pub fn subscribe_count(&self) -> usize {
        lock(&self.filters).len()
    }

    /// Subscriptions neither unsubscribed nor dropped.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

impl Default for MockChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseChangeFeed for MockChangeFeed {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        lock(&self.filters).push(filter.clone());
        if self.fail_subscribe.load(Ordering::SeqCst) {
            bail!("channel {} refused", filter.channel);
        }

        let (tx, rx) = mpsc::channel(32);
        if self.auto_confirm {
            let _ = tx.try_send(ChannelEvent::Subscribed);
        }
        lock(&self.senders).push(tx);
        self.active.fetch_add(1, Ordering::SeqCst);

        Ok(ChangeSubscription {
            events: rx,
            handle: Box::new(MockSubscription {
                active: self.active.clone(),
                unsubscribes: self.unsubscribes.clone(),
            }),
        })
    }
}

struct MockSubscription {
    active: Arc<AtomicUsize>,
    unsubscribes: Arc<AtomicUsize>,
}

#[async_trait]
impl SubscriptionHandle for MockSubscription {
    async fn unsubscribe(self: Box<Self>) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Recording Notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        lock(&self.sent).iter().filter(|n| predicate(n)).count()
    }
}

impl BaseNotifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        lock(&self.sent).push(notification);
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub auth: Arc<MockAuth>,
    pub store: Arc<MockJobStore>,
    pub processor: Arc<MockProcessor>,
    pub change_feed: Arc<MockChangeFeed>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestDependencies {
    /// Signed in as [`test_user`], empty store, succeeding processor.
    pub fn new() -> Self {
        Self {
            auth: Arc::new(MockAuth::signed_in(test_user())),
            store: Arc::new(MockJobStore::new()),
            processor: Arc::new(MockProcessor::new()),
            change_feed: Arc::new(MockChangeFeed::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn mock_auth(mut self, auth: MockAuth) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn mock_store(mut self, store: MockJobStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn mock_processor(mut self, processor: MockProcessor) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    pub fn mock_change_feed(mut self, change_feed: MockChangeFeed) -> Self {
        self.change_feed = Arc::new(change_feed);
        self
    }

    /// Build AppDeps backed by these mocks.
    pub fn deps(&self) -> AppDeps {
        AppDeps::new(
            self.auth.clone(),
            self.store.clone(),
            self.processor.clone(),
            self.change_feed.clone(),
            self.notifier.clone(),
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
