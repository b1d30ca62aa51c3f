//! JSON file storage implementation.
//!
//! One flat file per query holding every seen listing id. Writes are
//! atomic (temp file, flush, rename) so a crash mid-commit leaves the
//! previous file intact, and the in-memory map only advances after the
//! rename lands. Worst case after a crash is a re-notification, never a
//! silently dropped one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::storage::{SeenRecord, SeenStore};

const STORE_VERSION: u32 = 1;

/// On-disk representation of a seen store.
#[derive(Debug, Serialize, Deserialize)]
struct SeenFile {
    /// Format version
    version: u32,
    /// When the file was last committed
    updated_at: DateTime<Utc>,
    /// Listing id to first-seen timestamp
    seen: HashMap<String, DateTime<Utc>>,
}

/// File-backed seen store.
pub struct JsonSeenStore {
    path: PathBuf,
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl JsonSeenStore {
    /// Open a store file, creating an empty store if the file does not
    /// exist yet.
    ///
    /// A file that exists but does not parse is an error rather than an
    /// empty store; silently starting over would re-notify every listing
    /// the operator has already seen.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: SeenFile = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::store_unavailable(format!("corrupt store {}: {e}", path.display()))
                })?;
                log::debug!(
                    "Loaded {} seen ids from {} (updated {})",
                    file.seen.len(),
                    path.display(),
                    file.updated_at
                );
                file.seen
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(AppError::store_unavailable(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            path,
            seen: RwLock::new(seen),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full map atomically (write to temp, then rename).
    async fn persist(&self, seen: &HashMap<String, DateTime<Utc>>) -> Result<()> {
        let snapshot = SeenFile {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            seen: seen.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::store_unavailable(format!("mkdir for {}: {e}", self.path.display())))?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| AppError::store_unavailable(format!("create {}: {e}", tmp.display())))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| AppError::store_unavailable(format!("write {}: {e}", tmp.display())))?;
        file.flush()
            .await
            .map_err(|e| AppError::store_unavailable(format!("flush {}: {e}", tmp.display())))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::store_unavailable(format!("rename to {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl SeenStore for JsonSeenStore {
    async fn has(&self, id: &str) -> Result<bool> {
        Ok(self.seen.read().await.contains_key(id))
    }

    async fn record(&self, id: &str, first_seen_at: DateTime<Utc>) -> Result<()> {
        self.record_all(&[SeenRecord::new(id, first_seen_at)]).await
    }

    async fn record_all(&self, records: &[SeenRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut seen = self.seen.write().await;
        let mut next = seen.clone();
        let mut changed = false;
        for record in records {
            if !next.contains_key(&record.id) {
                next.insert(record.id.clone(), record.first_seen_at);
                changed = true;
            }
        }
        if changed {
            self.persist(&next).await?;
            *seen = next;
        }
        Ok(())
    }

    async fn count(&self) -> usize {
        self.seen.read().await.len()
    }
}
