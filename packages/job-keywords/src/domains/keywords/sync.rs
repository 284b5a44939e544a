//! Live keyword list for one job at a time.
//!
//! `KeywordSync` subscribes to row changes in `extracted_keywords` for the
//! current job and re-reads the table as soon as it subscribes, again when the
//! subscription is confirmed, and whenever a change arrives. While the table is still empty for the job (the
//! extraction function has not written anything yet) it re-reads on a fixed
//! delay until rows show up or the retry ceiling is reached.
//!
//! One driver task per subscription owns the event stream, the retry timer,
//! and the fetches it starts, so tearing the driver down cancels all three.
//! Observers follow the list through a [`watch`](tokio::sync::watch) channel.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use supabase_client::ChannelEvent;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::models::{FetchOutcome, Keyword, KeywordSnapshot};
use super::retry::{RetryPolicy, RetryState};
use crate::common::{InFlight, JobId};
use crate::error::{JobError, Result};
use crate::kernel::{
    AppDeps, BaseChangeFeed, BaseJobStore, BaseNotifier, ChangeFilter, Notification,
    SubscriptionHandle,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct KeywordSync {
    inner: Arc<SyncInner>,
    change_feed: Arc<dyn BaseChangeFeed>,
    driver: tokio::sync::Mutex<Option<Driver>>,
}

/// State shared between the public handle, the driver, and its fetch tasks.
struct SyncInner {
    store: Arc<dyn BaseJobStore>,
    notifier: Arc<dyn BaseNotifier>,
    policy: RetryPolicy,
    fetch_in_progress: AtomicBool,
    /// A trigger was dropped because the guard was taken.
    missed: AtomicBool,
    /// Replay one fetch for the followed job on the next wake.
    catch_up: AtomicBool,
    feed_open: AtomicBool,
    retry: Mutex<RetryState>,
    active_job: Mutex<Option<JobId>>,
    last_fetched: Mutex<Option<JobId>>,
    snapshot: watch::Sender<KeywordSnapshot>,
    /// Wakes the driver after a retry is scheduled outside it.
    wake: Notify,
}

struct Driver {
    job_id: JobId,
    handle: Box<dyn SubscriptionHandle>,
    task: JoinHandle<()>,
}

impl Driver {
    /// Stop the driver (and any fetch it is running), then release the
    /// subscription.
    async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
        self.handle.unsubscribe().await;
        debug!(job_id = %self.job_id, "Keyword subscription released");
    }
}

impl KeywordSync {
    pub fn new(deps: &AppDeps, policy: RetryPolicy) -> Self {
        let (snapshot, _) = watch::channel(KeywordSnapshot::default());
        Self {
            inner: Arc::new(SyncInner {
                store: deps.store.clone(),
                notifier: deps.notifier.clone(),
                policy,
                fetch_in_progress: AtomicBool::new(false),
                missed: AtomicBool::new(false),
                catch_up: AtomicBool::new(false),
                feed_open: AtomicBool::new(false),
                retry: Mutex::new(RetryState::default()),
                active_job: Mutex::new(None),
                last_fetched: Mutex::new(None),
                snapshot,
                wake: Notify::new(),
            }),
            change_feed: deps.change_feed.clone(),
            driver: tokio::sync::Mutex::new(None),
        }
    }

    /// Follow `job_id`, replacing any previous subscription.
    ///
    /// A first fetch starts right away without waiting for the backend to
    /// confirm the subscription. The current list is kept until a fetch
    /// replaces it.
    pub async fn sync(&self, job_id: JobId) -> Result<()> {
        let mut driver = self.driver.lock().await;
        if let Some(previous) = driver.take() {
            debug!(job_id = %previous.job_id, "Cleaning up existing subscription");
            previous.shutdown().await;
        }
        self.inner.start(job_id);

        let filter = ChangeFilter::keywords_for(job_id);
        let subscription = match self.change_feed.subscribe(filter).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to subscribe to keyword changes");
                self.inner.stop();
                self.inner.notifier.notify(Notification::KeywordFetchFailed {
                    job_id,
                    reason: e.to_string(),
                });
                return Err(JobError::fetch("keyword subscription", e));
            }
        };
        info!(job_id = %job_id, "Subscribed to keyword changes");
        self.inner.feed_open.store(true, Ordering::Release);

        let task = tokio::spawn(run_driver(self.inner.clone(), job_id, subscription.events));
        *driver = Some(Driver {
            job_id,
            handle: subscription.handle,
            task,
        });
        Ok(())
    }

    /// Fetch now for the job being followed.
    pub async fn refresh(&self) -> FetchOutcome {
        match self.inner.active_job() {
            Some(job_id) => self.inner.fetch(job_id).await,
            None => FetchOutcome::Skipped,
        }
    }

    /// Drop every entry with this keyword text from the local list. The
    /// backend is not touched and `update_count` does not change.
    pub fn remove(&self, keyword: &str) -> bool {
        self.inner.snapshot.send_if_modified(|snapshot| {
            let before = snapshot.keywords.len();
            snapshot.keywords.retain(|k| k.keyword != keyword);
            snapshot.keywords.len() != before
        })
    }

    /// Stop following, release the subscription, and clear all state.
    /// Calling it again is a no-op.
    pub async fn reset(&self) {
        if let Some(driver) = self.driver.lock().await.take() {
            driver.shutdown().await;
        }
        self.inner.stop();
        self.inner.clear();
    }

    pub fn watch(&self) -> watch::Receiver<KeywordSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> KeywordSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn keywords(&self) -> Vec<Keyword> {
        self.inner.snapshot.borrow().keywords.clone()
    }

    pub fn update_count(&self) -> u64 {
        self.inner.snapshot.borrow().update_count
    }

    pub fn retry_attempts(&self) -> u32 {
        self.inner.retry_state().attempts()
    }

    /// Job whose rows were last loaded.
    pub fn last_fetched_job(&self) -> Option<JobId> {
        *lock(&self.inner.last_fetched)
    }

    /// Job being followed.
    pub fn active_job(&self) -> Option<JobId> {
        self.inner.active_job()
    }

    /// False once the change feed has reported itself closed.
    pub async fn is_subscribed(&self) -> bool {
        self.driver.lock().await.is_some() && self.inner.feed_open.load(Ordering::Acquire)
    }
}

impl Drop for KeywordSync {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.task.abort();
        }
    }
}

impl SyncInner {
    fn active_job(&self) -> Option<JobId> {
        *lock(&self.active_job)
    }

    fn retry_state(&self) -> MutexGuard<'_, RetryState> {
        lock(&self.retry)
    }

    fn start(&self, job_id: JobId) {
        *lock(&self.active_job) = Some(job_id);
        self.missed.store(false, Ordering::Release);
        self.catch_up.store(false, Ordering::Release);
        self.retry_state().reset();
    }

    fn stop(&self) {
        *lock(&self.active_job) = None;
        self.feed_open.store(false, Ordering::Release);
        self.retry_state().reset();
    }

    fn clear(&self) {
        *lock(&self.last_fetched) = None;
        self.snapshot.send_if_modified(|snapshot| {
            let cleared = *snapshot != KeywordSnapshot::default();
            *snapshot = KeywordSnapshot::default();
            cleared
        });
    }

    /// Single-flight fetch. A fetch that finds the synchronizer has moved on
    /// to another job hands any trigger it blocked back to the driver.
    async fn fetch(&self, job_id: JobId) -> FetchOutcome {
        let Some(guard) = InFlight::acquire(&self.fetch_in_progress) else {
            debug!(job_id = %job_id, "Fetch already in progress, skipping");
            self.missed.store(true, Ordering::Release);
            return FetchOutcome::Skipped;
        };

        let outcome = self.load(job_id).await;

        let blocked = self.missed.swap(false, Ordering::AcqRel);
        drop(guard);
        if blocked && self.active_job().is_some_and(|active| active != job_id) {
            debug!(job_id = %job_id, "Replaying trigger blocked by a stale fetch");
            self.catch_up.store(true, Ordering::Release);
            self.wake.notify_one();
        }
        outcome
    }

    async fn load(&self, job_id: JobId) -> FetchOutcome {
        debug!(job_id = %job_id, "Fetching keywords");
        let rows = match self.store.fetch_keywords(job_id).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Error fetching keywords");
                self.notifier.notify(Notification::KeywordFetchFailed {
                    job_id,
                    reason: e.to_string(),
                });
                return FetchOutcome::Failed;
            }
        };

        if self.active_job() != Some(job_id) {
            debug!(job_id = %job_id, "Discarding keywords for a job no longer followed");
            return FetchOutcome::Skipped;
        }

        if rows.is_empty() {
            let scheduled = self.retry_state().on_empty(&self.policy, Instant::now());
            return match scheduled {
                Some(attempt) => {
                    debug!(
                        job_id = %job_id,
                        attempt,
                        max_retries = self.policy.max_retries,
                        "No keywords found, retry scheduled"
                    );
                    self.wake.notify_one();
                    FetchOutcome::RetryScheduled { attempt }
                }
                None => {
                    info!(job_id = %job_id, "Max retries reached, stopping fetch attempts");
                    FetchOutcome::RetriesExhausted
                }
            };
        }

        self.retry_state().on_rows();
        let keywords: Vec<Keyword> = rows.into_iter().filter_map(Keyword::from_record).collect();
        let count = keywords.len();

        self.snapshot.send_modify(|snapshot| {
            snapshot.job_id = Some(job_id);
            snapshot.keywords = keywords;
            snapshot.update_count += 1;
        });
        *lock(&self.last_fetched) = Some(job_id);

        debug!(job_id = %job_id, count, "Keywords updated");
        FetchOutcome::Updated { count }
    }
}

async fn retry_due(next_fire: Option<Instant>) {
    match next_fire {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

type Fetches = FuturesUnordered<BoxFuture<'static, FetchOutcome>>;

/// Queue a fetch unless the driver already has one pending.
fn start_fetch(fetches: &mut Fetches, inner: &Arc<SyncInner>, job_id: JobId) {
    if !fetches.is_empty() {
        debug!(job_id = %job_id, "Fetch already pending, trigger folded into it");
        return;
    }
    let inner = inner.clone();
    fetches.push(async move { inner.fetch(job_id).await }.boxed());
}

/// Owns the subscription's event stream and the retry timer for `job_id`.
async fn run_driver(
    inner: Arc<SyncInner>,
    job_id: JobId,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    let mut fetches = Fetches::new();
    let mut feed_open = true;
    start_fetch(&mut fetches, &inner, job_id);

    loop {
        let next_fire = inner.retry_state().next_fire();

        tokio::select! {
            biased;

            event = events.recv(), if feed_open => match event {
                Some(ChannelEvent::Subscribed) => {
                    debug!(job_id = %job_id, "Subscription confirmed");
                    start_fetch(&mut fetches, &inner, job_id);
                }
                Some(ChannelEvent::Change(payload)) => {
                    debug!(job_id = %job_id, %payload, "Received keywords update");
                    start_fetch(&mut fetches, &inner, job_id);
                }
                Some(ChannelEvent::Error(message)) => {
                    warn!(job_id = %job_id, %message, "Keyword channel error");
                }
                Some(ChannelEvent::Closed) | None => {
                    warn!(job_id = %job_id, "Keyword change feed closed");
                    feed_open = false;
                    inner.feed_open.store(false, Ordering::Release);
                }
            },
            _ = retry_due(next_fire) => {
                let due = {
                    let mut retry = inner.retry_state();
                    // Rows may have arrived since the timer was armed.
                    let due = retry.next_fire() == next_fire;
                    if due {
                        retry.fired();
                    }
                    due
                };
                if due {
                    start_fetch(&mut fetches, &inner, job_id);
                }
            }
            _ = inner.wake.notified() => {
                if inner.catch_up.swap(false, Ordering::AcqRel) {
                    start_fetch(&mut fetches, &inner, job_id);
                }
            }
            Some(outcome) = fetches.next(), if !fetches.is_empty() => {
                debug!(job_id = %job_id, ?outcome, "Keyword fetch finished");
            }
        }
    }
}
