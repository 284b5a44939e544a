//! Job submission: record creation, extraction-function invocation, and the
//! single-flight coordinator in front of it.

pub mod models;
pub mod processor;
pub mod service;

use std::time::Duration;

pub use models::{JobRecord, JobStatus};
pub use processor::{JobProcessor, ProcessingState};
pub use service::JobScrapingService;

/// Edge function that extracts keywords for a job record.
pub const SCRAPE_FUNCTION: &str = "scrape-job-posting";

/// How long a submission waits for the extraction function.
pub const DEFAULT_PROCESSOR_TIMEOUT: Duration = Duration::from_secs(30);
