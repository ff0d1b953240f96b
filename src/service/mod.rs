pub mod deletion;

pub use deletion::{DeletionQueue, QueueClosed};

use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{BatchItem, BatchResult, ShortenedUrl, UserUrl};
use crate::storage::{short_url, Storage, StorageError, StorageResult};

/// Outcome of shortening one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortened {
    pub short_url: String,
    /// False when the owner had already shortened this URL
    pub created: bool,
}

/// Use-case layer between the transport and the storage backend
pub struct Shortener {
    storage: Arc<dyn Storage>,
    base_url: String,
    deletions: DeletionQueue,
}

impl Shortener {
    pub fn new(
        storage: Arc<dyn Storage>,
        base_url: impl Into<String>,
        deletion_workers: usize,
        deletion_queue_capacity: usize,
    ) -> Self {
        let deletions = DeletionQueue::new(
            Arc::clone(&storage),
            deletion_workers,
            deletion_queue_capacity,
        );

        Self {
            storage,
            base_url: base_url.into(),
            deletions,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shorten `url` for `owner_id`, resolving duplicates to the existing link
    pub async fn put(&self, url: &str, owner_id: i64) -> StorageResult<Shortened> {
        match self.storage.put(url, None, owner_id).await {
            Ok(alias) => {
                debug!(owner_id, alias = %alias, "shortened url");
                Ok(Shortened {
                    short_url: short_url(&self.base_url, &alias),
                    created: true,
                })
            }
            Err(StorageError::Conflict { alias }) => Ok(Shortened {
                short_url: short_url(&self.base_url, &alias),
                created: false,
            }),
            Err(e) => Err(e),
        }
    }

    /// Shorten every item in order; the first hard failure aborts the batch
    pub async fn put_batch(
        &self,
        owner_id: i64,
        items: Vec<BatchItem>,
    ) -> StorageResult<Vec<BatchResult>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let shortened = self.put(&item.original_url, owner_id).await?;
            results.push(BatchResult {
                correlation_id: item.correlation_id,
                short_url: shortened.short_url,
            });
        }
        Ok(results)
    }

    pub async fn get(&self, alias: &str) -> StorageResult<ShortenedUrl> {
        self.storage.get(alias).await
    }

    pub async fn get_all(&self, owner_id: i64) -> StorageResult<Vec<UserUrl>> {
        self.storage.get_all(owner_id, &self.base_url).await
    }

    /// Queue the aliases for deletion and return without waiting for it
    pub async fn delete(&self, owner_id: i64, aliases: Vec<String>) -> Result<(), QueueClosed> {
        let count = aliases.len();
        self.deletions.submit(owner_id, aliases).await?;
        info!(owner_id, count, "Queued aliases for deletion");
        Ok(())
    }

    pub async fn healthcheck(&self) -> StorageResult<bool> {
        self.storage.healthcheck().await
    }

    /// Stats as `{"urls": .., "users": ..}`
    pub async fn stats(&self) -> StorageResult<Vec<u8>> {
        let stats = self.storage.stats().await?;
        let json = stats
            .to_json()
            .map_err(|e| StorageError::Other(anyhow::Error::new(e).context("stats")))?;
        Ok(json)
    }

    /// Finish queued background work
    pub async fn shutdown(&self) {
        self.deletions.shutdown().await;
    }
}
