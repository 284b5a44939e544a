//! Job-posting keyword client.
//!
//! Submits job-posting text to the backend, triggers the
//! `scrape-job-posting` edge function, and keeps a live keyword list in sync
//! with the `extracted_keywords` table.
//!
//! # Modules
//!
//! - [`domains::jobs`] - submission coordinator ([`JobProcessor`]) and the
//!   record/processor workflow ([`JobScrapingService`])
//! - [`domains::keywords`] - realtime keyword synchronizer ([`KeywordSync`])
//! - [`kernel`] - infrastructure traits, backend adapters, notifications,
//!   and test doubles
//! - [`config`] - environment configuration

pub mod common;
pub mod config;
pub mod domains;
pub mod error;
pub mod kernel;

pub use common::{BucketId, JobId, UserId};
pub use config::Config;
pub use domains::jobs::{JobProcessor, JobScrapingService, JobStatus, ProcessingState};
pub use domains::keywords::{FetchOutcome, Keyword, KeywordSnapshot, KeywordSync, RetryPolicy};
pub use error::{JobError, Result};
pub use kernel::{AppDeps, Notification, NotificationHub};
