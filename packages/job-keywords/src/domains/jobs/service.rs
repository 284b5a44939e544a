//! Job record lifecycle against the backend.
//!
//! `JobScrapingService` owns the remote side of a submission: it writes the
//! pending record, calls the extraction function under a timeout, and marks
//! records failed when the function reports an error.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::models::{JobStatus, JobStatusUpdate, NewBucket, NewJobRecord, ScrapeRequest};
use super::DEFAULT_PROCESSOR_TIMEOUT;
use crate::common::{BucketId, JobId, UserId};
use crate::error::{JobError, Result};
use crate::kernel::AppDeps;

#[derive(Clone)]
pub struct JobScrapingService {
    deps: AppDeps,
    timeout: Duration,
}

impl JobScrapingService {
    pub fn new(deps: AppDeps) -> Self {
        Self::with_timeout(deps, DEFAULT_PROCESSOR_TIMEOUT)
    }

    pub fn with_timeout(deps: AppDeps, timeout: Duration) -> Self {
        Self { deps, timeout }
    }

    pub fn deps(&self) -> &AppDeps {
        &self.deps
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The signed-in user, or `Unauthenticated` naming what was refused.
    pub async fn require_user(&self, action: &'static str) -> Result<UserId> {
        match self.deps.auth.current_user().await {
            Ok(Some(user_id)) => Ok(user_id),
            Ok(None) => Err(JobError::Unauthenticated(action)),
            Err(e) => Err(JobError::fetch("session", e)),
        }
    }

    /// The user's bucket, creating a private `"default"` one if they have none.
    ///
    /// Lookup and creation are separate calls, so two concurrent first
    /// submissions can each create a bucket.
    pub async fn resolve_bucket(&self, user_id: &UserId) -> Result<BucketId> {
        let existing = self
            .deps
            .store
            .find_bucket_for_user(user_id)
            .await
            .map_err(|e| JobError::fetch("job source", e))?;

        if let Some(bucket) = existing {
            return Ok(bucket.id);
        }

        info!(user_id = %user_id, "No job source found, creating default");
        let bucket = self
            .deps
            .store
            .create_bucket(&NewBucket::default_for(*user_id))
            .await
            .map_err(|e| JobError::write("create default job source", e))?;

        Ok(bucket.id)
    }

    /// Create a pending record for `text` in `bucket_id` and run extraction.
    ///
    /// If the function errors the record is marked `failed`. If it times out
    /// the call is left running and the record keeps its `pending` status.
    pub async fn process_job_posting(&self, text: &str, bucket_id: BucketId) -> Result<JobId> {
        let user_id = self.require_user("process job postings").await?;

        let record = self
            .deps
            .store
            .insert_job_record(&NewJobRecord::pending(bucket_id, user_id, text, Utc::now()))
            .await
            .map_err(|e| JobError::write("create job posting", e))?;
        let job_id = record.id;
        debug!(job_id = %job_id, bucket_id = %bucket_id, "Created pending job posting");

        let request = ScrapeRequest {
            job_description: text.to_string(),
            job_posting_id: job_id,
        };

        match self.invoke_with_timeout(request).await {
            Ok(_) => {
                info!(job_id = %job_id, "Extraction function accepted job posting");
                Ok(job_id)
            }
            Err(JobError::Processor(source)) => {
                if let Err(e) = self.set_status(job_id, &user_id, JobStatus::Failed).await {
                    warn!(job_id = %job_id, error = %e, "Failed to mark job posting as failed");
                }
                Err(JobError::Processor(source))
            }
            Err(e) => Err(e),
        }
    }

    /// Set the status of one of the current user's job records.
    pub async fn update_job_posting_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let user_id = self.require_user("update job postings").await?;

        self.set_status(job_id, &user_id, status)
            .await
            .map_err(|e| JobError::write("update job posting status", e))?;

        debug!(job_id = %job_id, status = %status, "Updated job posting status");
        Ok(())
    }

    /// Put a record back to `pending` and run extraction on its stored text
    /// again. Errors leave the status as they found it.
    pub async fn retry_job_posting(&self, job_id: JobId) -> Result<()> {
        let user_id = self.require_user("retry job postings").await?;

        let record = self
            .deps
            .store
            .find_job_record(job_id, &user_id)
            .await
            .map_err(|e| JobError::fetch("job posting", e))?
            .ok_or(JobError::NotFound(job_id))?;

        self.set_status(job_id, &user_id, JobStatus::Pending)
            .await
            .map_err(|e| JobError::write("reset job posting status", e))?;

        let request = ScrapeRequest {
            job_description: record.description.unwrap_or_default(),
            job_posting_id: job_id,
        };
        self.invoke_with_timeout(request).await?;

        info!(job_id = %job_id, "Retried job posting");
        Ok(())
    }

    async fn set_status(
        &self,
        job_id: JobId,
        user_id: &UserId,
        status: JobStatus,
    ) -> anyhow::Result<()> {
        let update = JobStatusUpdate {
            status,
            updated_at: Utc::now(),
        };
        self.deps
            .store
            .update_job_status(job_id, user_id, &update)
            .await
    }

    /// Race the extraction call against the timeout. The call runs on its own
    /// task so losing the race abandons it instead of cancelling it.
    async fn invoke_with_timeout(&self, request: ScrapeRequest) -> Result<serde_json::Value> {
        let job_id = request.job_posting_id;
        let processor = self.deps.processor.clone();
        let call = tokio::spawn(async move { processor.invoke(&request).await });

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(e))) => Err(JobError::Processor(e.into())),
            Ok(Err(join_error)) => Err(JobError::Processor(Box::new(join_error))),
            Err(_) => {
                warn!(
                    job_id = %job_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Extraction function timed out, abandoning call"
                );
                Err(JobError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::jobs::models::{Bucket, JobRecord};
    use crate::kernel::test_dependencies::{
        test_user, MockAuth, MockJobStore, MockProcessor, StoreCall,
    };
    use crate::kernel::TestDependencies;

    fn bucket(id: i64) -> Bucket {
        Bucket {
            id: BucketId::new(id),
            source_name: Some("default".into()),
            user_id: Some(test_user()),
            is_public: Some(false),
        }
    }

    #[tokio::test]
    async fn test_resolve_bucket_reuses_existing() {
        let deps = TestDependencies::new().mock_store(MockJobStore::new().with_bucket(bucket(5)));
        let service = JobScrapingService::new(deps.deps());

        let bucket_id = service.resolve_bucket(&test_user()).await.unwrap();

        assert_eq!(bucket_id, BucketId::new(5));
        assert_eq!(deps.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_bucket_creates_default() {
        let deps = TestDependencies::new();
        let service = JobScrapingService::new(deps.deps());

        service.resolve_bucket(&test_user()).await.unwrap();

        let buckets = deps.store.buckets();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].source_name.as_deref(), Some("default"));
        assert_eq!(buckets[0].is_public, Some(false));
    }

    #[tokio::test]
    async fn test_process_requires_session() {
        let deps = TestDependencies::new().mock_auth(MockAuth::signed_out());
        let service = JobScrapingService::new(deps.deps());

        let err = service
            .process_job_posting("Rust engineer", BucketId::new(1))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Unauthenticated(_)));
        assert!(deps.store.calls().is_empty());
        assert!(deps.processor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_insert_failure_stops_before_processor() {
        let deps = TestDependencies::new().mock_store(MockJobStore::new().failing_inserts());
        let service = JobScrapingService::new(deps.deps());

        let err = service
            .process_job_posting("Rust engineer", BucketId::new(1))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::RemoteWrite { .. }));
        assert!(deps.processor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_processor_error_marks_failed() {
        let deps = TestDependencies::new().mock_processor(MockProcessor::failing("boom"));
        let service = JobScrapingService::new(deps.deps());

        let err = service
            .process_job_posting("Rust engineer", BucketId::new(1))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Processor(_)));
        let jobs = deps.store.jobs();
        let record = &jobs[0];
        assert_eq!(record.status, Some(JobStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_record_pending() {
        let deps = TestDependencies::new()
            .mock_processor(MockProcessor::delayed(Duration::from_secs(45)));
        let service = JobScrapingService::new(deps.deps());

        let err = service
            .process_job_posting("Rust engineer", BucketId::new(1))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Timeout(t) if t == Duration::from_secs(30)));
        let jobs = deps.store.jobs();
        let record = &jobs[0];
        assert_eq!(record.status, Some(JobStatus::Pending));
        assert!(!deps
            .store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::UpdateStatus(..))));
    }

    #[tokio::test]
    async fn test_update_status_only_touches_own_records() {
        let other_user = UserId(uuid::Uuid::from_u128(99));
        let record = JobRecord {
            id: JobId::new(8),
            source_id: None,
            user_id: Some(other_user),
            title: None,
            description: Some("text".into()),
            posting_url: None,
            status: Some(JobStatus::Pending),
            created_at: None,
            updated_at: None,
            processed_at: None,
        };
        let deps = TestDependencies::new().mock_store(MockJobStore::new().with_job(record));
        let service = JobScrapingService::new(deps.deps());

        service
            .update_job_posting_status(JobId::new(8), JobStatus::Processed)
            .await
            .unwrap();

        assert_eq!(
            deps.store.job(JobId::new(8)).unwrap().status,
            Some(JobStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_retry_missing_record_is_not_found() {
        let deps = TestDependencies::new();
        let service = JobScrapingService::new(deps.deps());

        let err = service.retry_job_posting(JobId::new(77)).await.unwrap_err();

        assert!(matches!(err, JobError::NotFound(id) if id == JobId::new(77)));
        assert!(deps.processor.calls().is_empty());
    }
}
