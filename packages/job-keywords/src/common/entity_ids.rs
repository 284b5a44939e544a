//! Typed ID definitions for the remote tables this client touches.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for `job_postings` rows.
pub struct JobPosting;

/// Marker type for `job_sources` rows (buckets).
pub struct JobSource;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for job records.
pub type JobId = Id<JobPosting>;

/// Typed ID for buckets.
pub type BucketId = Id<JobSource>;

/// Auth user id (GoTrue issues UUIDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
