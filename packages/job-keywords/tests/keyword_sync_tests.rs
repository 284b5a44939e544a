//! Keyword synchronizer: triggers, retry timing, and teardown.

use std::time::Duration;

use job_keywords::kernel::test_dependencies::{MockChangeFeed, MockJobStore};
use job_keywords::kernel::TestDependencies;
use job_keywords::{
    FetchOutcome, JobId, JobProcessor, JobScrapingService, KeywordSync, RetryPolicy,
};
use tokio::time::sleep;

fn keyword_sync(deps: &TestDependencies) -> KeywordSync {
    KeywordSync::new(&deps.deps(), RetryPolicy::default())
}

#[tokio::test(start_paused = true)]
async fn overlapping_triggers_share_one_fetch() {
    let deps = TestDependencies::new()
        .mock_store(MockJobStore::new().with_keyword_fetch_delay(Duration::from_secs(1)))
        .mock_change_feed(MockChangeFeed::manual());
    let job_id = JobId::new(11);
    deps.store.add_keyword(job_id, "rust", Some(4));
    let sync = keyword_sync(&deps);

    sync.sync(job_id).await.unwrap();
    assert!(deps.change_feed.confirm());
    assert!(deps.change_feed.emit_change(serde_json::json!({"type": "INSERT"})));
    assert!(deps.change_feed.emit_change(serde_json::json!({"type": "INSERT"})));
    assert!(deps.change_feed.emit_change(serde_json::json!({"type": "UPDATE"})));

    sleep(Duration::from_secs(5)).await;

    assert_eq!(deps.store.max_concurrent_fetches(), 1);
    assert_eq!(deps.store.keyword_fetch_count(), 1);
    assert_eq!(sync.update_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_refresh_is_skipped() {
    let deps = TestDependencies::new()
        .mock_store(MockJobStore::new().with_keyword_fetch_delay(Duration::from_millis(500)))
        .mock_change_feed(MockChangeFeed::manual());
    let job_id = JobId::new(12);
    deps.store.add_keyword(job_id, "tokio", Some(2));
    let sync = keyword_sync(&deps);
    sync.sync(job_id).await.unwrap();

    let (first, second) = tokio::join!(sync.refresh(), sync.refresh());

    assert_eq!(first, FetchOutcome::Updated { count: 1 });
    assert_eq!(second, FetchOutcome::Skipped);
    assert_eq!(deps.store.keyword_fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_results_retry_ten_times_then_stop() {
    let deps = TestDependencies::new();
    let sync = keyword_sync(&deps);

    sync.sync(JobId::new(13)).await.unwrap();

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(deps.store.keyword_fetch_count(), 1);
    assert_eq!(sync.retry_attempts(), 1);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(deps.store.keyword_fetch_count(), 2);
    assert_eq!(sync.retry_attempts(), 2);

    sleep(Duration::from_secs(30)).await;
    // One fetch on subscribe plus ten retries.
    assert_eq!(deps.store.keyword_fetch_count(), 11);
    assert_eq!(sync.retry_attempts(), 0);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(deps.store.keyword_fetch_count(), 11);
    assert_eq!(sync.update_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rows_clear_retry_counter_and_bump_update_count() {
    let deps = TestDependencies::new();
    let job_id = JobId::new(14);
    let sync = keyword_sync(&deps);
    sync.sync(job_id).await.unwrap();

    sleep(Duration::from_millis(500)).await;
    assert_eq!(sync.retry_attempts(), 1);

    deps.store.add_keyword(job_id, "kubernetes", Some(3));
    assert_eq!(sync.refresh().await, FetchOutcome::Updated { count: 1 });

    assert_eq!(sync.retry_attempts(), 0);
    assert_eq!(sync.update_count(), 1);

    // The scheduled retry was dropped along with the counter.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(deps.store.keyword_fetch_count(), 2);

    // Unchanged rows still count as an update.
    assert_eq!(sync.refresh().await, FetchOutcome::Updated { count: 1 });
    assert_eq!(sync.update_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn reset_releases_subscription_and_clears_state() {
    let deps = TestDependencies::new();
    let job_id = JobId::new(15);
    deps.store.add_keyword(job_id, "rust", Some(5));
    let sync = keyword_sync(&deps);
    let mut rx = sync.watch();
    sync.sync(job_id).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(sync.keywords().len(), 1);

    sync.reset().await;

    assert_eq!(deps.change_feed.active_subscriptions(), 0);
    assert!(!sync.is_subscribed().await);
    assert!(sync.keywords().is_empty());
    assert_eq!(sync.update_count(), 0);
    assert_eq!(sync.last_fetched_job(), None);
    assert_eq!(sync.retry_attempts(), 0);

    sync.reset().await;
    assert_eq!(deps.change_feed.active_subscriptions(), 0);
    assert_eq!(deps.change_feed.unsubscribe_count(), 1);
    assert_eq!(sync.snapshot(), Default::default());
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_pending_retry() {
    let deps = TestDependencies::new();
    let sync = keyword_sync(&deps);
    sync.sync(JobId::new(16)).await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(sync.retry_attempts(), 1);

    sync.reset().await;
    sleep(Duration::from_secs(30)).await;

    assert_eq!(deps.store.keyword_fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn row_arriving_after_empty_fetch_is_picked_up() {
    let deps = TestDependencies::new();
    let job_id = JobId::new(42);
    let sync = keyword_sync(&deps);
    let mut rx = sync.watch();

    sync.sync(job_id).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(sync.retry_attempts(), 1);
    assert_eq!(sync.update_count(), 0);

    deps.store.add_keyword(job_id, "Kubernetes", Some(3));
    assert!(deps.change_feed.emit_change(serde_json::json!({
        "type": "INSERT",
        "table": "extracted_keywords",
        "record": {"job_posting_id": 42, "keyword": "Kubernetes", "frequency": 3}
    })));
    rx.changed().await.unwrap();

    let snapshot = sync.snapshot();
    assert_eq!(snapshot.job_id, Some(job_id));
    assert_eq!(snapshot.keywords.len(), 1);
    assert_eq!(snapshot.keywords[0].keyword, "Kubernetes");
    assert_eq!(snapshot.keywords[0].frequency, 3);
    assert_eq!(snapshot.update_count, 1);
    assert_eq!(sync.retry_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn switching_jobs_mid_fetch_follows_new_job() {
    let deps = TestDependencies::new()
        .mock_store(MockJobStore::new().with_keyword_fetch_delay(Duration::from_secs(1)));
    deps.store.add_keyword(JobId::new(1), "old", Some(1));
    deps.store.add_keyword(JobId::new(2), "new", Some(1));
    let sync = keyword_sync(&deps);

    sync.sync(JobId::new(1)).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    sync.sync(JobId::new(2)).await.unwrap();
    sleep(Duration::from_secs(3)).await;

    let snapshot = sync.snapshot();
    assert_eq!(snapshot.job_id, Some(JobId::new(2)));
    assert_eq!(snapshot.keywords[0].keyword, "new");
    assert_eq!(snapshot.update_count, 1);
    assert_eq!(deps.change_feed.active_subscriptions(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_during_refresh_keeps_single_fetch() {
    let deps = TestDependencies::new()
        .mock_store(MockJobStore::new().with_keyword_fetch_delay(Duration::from_secs(1)))
        .mock_change_feed(MockChangeFeed::manual());
    deps.store.add_keyword(JobId::new(6), "old", Some(1));
    deps.store.add_keyword(JobId::new(7), "new", Some(2));
    let sync = keyword_sync(&deps);
    sync.sync(JobId::new(6)).await.unwrap();

    let (stale, _) = tokio::join!(sync.refresh(), async {
        sleep(Duration::from_millis(100)).await;
        sync.reset().await;
        sync.sync(JobId::new(7)).await.unwrap();
        assert!(deps.change_feed.confirm());
    });
    assert_eq!(stale, FetchOutcome::Skipped);

    sleep(Duration::from_secs(3)).await;

    assert_eq!(deps.store.max_concurrent_fetches(), 1);
    assert_eq!(deps.store.keyword_fetch_count(), 2);
    let snapshot = sync.snapshot();
    assert_eq!(snapshot.job_id, Some(JobId::new(7)));
    assert_eq!(snapshot.keywords[0].keyword, "new");
    assert_eq!(snapshot.update_count, 1);
}

#[tokio::test(start_paused = true)]
async fn rows_without_keyword_text_are_dropped() {
    let deps = TestDependencies::new().mock_change_feed(MockChangeFeed::manual());
    let job_id = JobId::new(17);
    deps.store.add_keyword_record(
        job_id,
        job_keywords::domains::keywords::KeywordRecord {
            keyword: None,
            frequency: Some(8),
        },
    );
    deps.store.add_keyword(job_id, "graphql", None);
    let sync = keyword_sync(&deps);
    sync.sync(job_id).await.unwrap();

    assert_eq!(sync.refresh().await, FetchOutcome::Updated { count: 1 });
    assert_eq!(sync.keywords()[0].keyword, "graphql");
    assert_eq!(sync.keywords()[0].frequency, 1);
}

#[tokio::test(start_paused = true)]
async fn submitted_job_keywords_stream_in() {
    let deps = TestDependencies::new();
    let processor = JobProcessor::new(JobScrapingService::new(deps.deps()));
    let sync = keyword_sync(&deps);
    let mut rx = sync.watch();

    let job_id = processor
        .process_job("Backend engineer: Rust, Postgres")
        .await
        .unwrap();
    sync.sync(job_id).await.unwrap();

    sleep(Duration::from_millis(2_500)).await;
    deps.store.add_keyword(job_id, "Rust", Some(2));
    deps.store.add_keyword(job_id, "Postgres", Some(1));
    deps.change_feed.emit_change(serde_json::json!({"type": "INSERT"}));
    rx.changed().await.unwrap();

    let words: Vec<_> = sync.keywords().into_iter().map(|k| k.keyword).collect();
    assert_eq!(words, vec!["Rust", "Postgres"]);
    assert_eq!(sync.last_fetched_job(), Some(job_id));
}
