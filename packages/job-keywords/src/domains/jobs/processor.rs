//! Single-flight submission coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

use super::service::JobScrapingService;
use crate::common::{InFlight, JobId, UserId};
use crate::error::{JobError, Result};
use crate::kernel::{BaseNotifier, Notification};

/// What a caller can observe about the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingState {
    pub is_processing: bool,
    pub has_error: bool,
    pub current_job_id: Option<JobId>,
    pub last_scrape_time: Option<DateTime<Utc>>,
}

/// Accepts submissions one at a time and reports the outcome as
/// notifications. Errors never escape: callers get `None` and the reason
/// goes to the notifier and the log.
pub struct JobProcessor {
    service: JobScrapingService,
    notifier: Arc<dyn BaseNotifier>,
    in_flight: AtomicBool,
    state: Mutex<ProcessingState>,
}

impl JobProcessor {
    pub fn new(service: JobScrapingService) -> Self {
        let notifier = service.deps().notifier.clone();
        Self {
            service,
            notifier,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(ProcessingState::default()),
        }
    }

    pub fn service(&self) -> &JobScrapingService {
        &self.service
    }

    /// Submit `text` for extraction.
    ///
    /// Returns the new job id, or `None` when another submission is still
    /// running, nobody is signed in, or any step failed.
    pub async fn process_job(&self, text: &str) -> Option<JobId> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("Already processing a job, skipping");
            return None;
        };

        let user_id = match self.service.require_user("process job postings").await {
            Ok(user_id) => user_id,
            Err(e) => {
                self.report(e);
                return None;
            }
        };
        self.lock_state().has_error = false;

        match self.submit(&user_id, text).await {
            Ok(job_id) => {
                {
                    let mut state = self.lock_state();
                    state.current_job_id = Some(job_id);
                    state.last_scrape_time = Some(Utc::now());
                }
                info!(job_id = %job_id, "Processing started");
                self.notifier.notify(Notification::ProcessingStarted { job_id });
                Some(job_id)
            }
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    /// Re-run extraction for an existing record. Same single-flight and
    /// reporting rules as [`process_job`](Self::process_job).
    pub async fn retry_job(&self, job_id: JobId) -> Option<()> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!(job_id = %job_id, "Already processing a job, skipping retry");
            return None;
        };

        match self.service.retry_job_posting(job_id).await {
            Ok(()) => {
                {
                    let mut state = self.lock_state();
                    state.has_error = false;
                    state.current_job_id = Some(job_id);
                    state.last_scrape_time = Some(Utc::now());
                }
                self.notifier.notify(Notification::RetryStarted { job_id });
                Some(())
            }
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    /// Copy of the current state, with `is_processing` read from the guard.
    pub fn state(&self) -> ProcessingState {
        ProcessingState {
            is_processing: self.is_processing(),
            ..self.lock_state().clone()
        }
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn clear_error(&self) {
        self.lock_state().has_error = false;
    }

    async fn submit(&self, user_id: &UserId, text: &str) -> Result<JobId> {
        let bucket_id = self.service.resolve_bucket(user_id).await?;
        self.service.process_job_posting(text, bucket_id).await
    }

    fn lock_state(&self) -> MutexGuard<'_, ProcessingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn report(&self, err: JobError) {
        match err {
            JobError::Unauthenticated(action) => {
                debug!(action, "No session, submission refused");
                self.notifier.notify(Notification::LoginRequired);
            }
            err => {
                error!(error = %err, "Error processing job");
                self.lock_state().has_error = true;
                self.notifier.notify(Notification::ProcessingFailed {
                    reason: err.to_string(),
                });
            }
        }
    }
}
