//! Storage abstractions for seen-listing persistence.
//!
//! The store is the notifier's only durable state: every listing id that
//! has been notified about, with the time it was first seen. One file per
//! search query.
//!
//! ## Directory Structure
//!
//! ```text
//! {state_dir}/
//! └── seen/
//!     ├── canon-ae-1-9f8a3c21.json
//!     └── snowblower-4b77d0e2.json
//! ```

pub mod json;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// Re-export for convenience
pub use json::JsonSeenStore;
pub use memory::MemorySeenStore;

/// One remembered listing id.
///
/// Records are insert-only; `first_seen_at` never changes once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenRecord {
    /// Listing id
    pub id: String,
    /// When the notifier first saw the listing
    pub first_seen_at: DateTime<Utc>,
}

impl SeenRecord {
    pub fn new(id: impl Into<String>, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            first_seen_at,
        }
    }
}

/// Trait for seen-listing storage backends.
#[async_trait]
pub trait SeenStore: Send + Sync {
    /// Whether an id has been seen before.
    async fn has(&self, id: &str) -> Result<bool>;

    /// Remember one id. Idempotent; an id already present keeps its
    /// original timestamp.
    async fn record(&self, id: &str, first_seen_at: DateTime<Utc>) -> Result<()>;

    /// Remember a batch of ids with a single durable write.
    ///
    /// The in-memory view only advances if the write succeeds, so a failed
    /// commit leaves the store observably unchanged. An empty batch is a
    /// no-op.
    async fn record_all(&self, records: &[SeenRecord]) -> Result<()>;

    /// Number of remembered ids.
    async fn count(&self) -> usize;
}
