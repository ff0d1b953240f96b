use crate::models::{ShortenedUrl, Stats, UserUrl};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The owner already shortened this URL; carries the alias it got back then
    #[error("url already shortened as '{alias}'")]
    Conflict { alias: String },
    #[error("alias '{0}' already exists")]
    AlreadyExists(String),
    #[error("alias '{0}' not found")]
    NotFound(String),
    #[error("alias '{0}' has been deleted")]
    Deleted(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Absent and soft-deleted aliases are both "not found" to callers
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_) | StorageError::Deleted(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepare the backend: create tables, or replay event logs into memory
    async fn init(&self) -> Result<()>;

    /// Store `url` for `owner_id` under `alias`, generating one when `alias` is `None`.
    ///
    /// Returns the alias the URL is reachable under. If the owner already
    /// shortened `url`, fails with [`StorageError::Conflict`] carrying the
    /// existing alias.
    async fn put(&self, url: &str, alias: Option<&str>, owner_id: i64) -> StorageResult<String>;

    /// Look up a live record by alias
    async fn get(&self, alias: &str) -> StorageResult<ShortenedUrl>;

    /// List the owner's live records as short URLs under `host`
    async fn get_all(&self, owner_id: i64, host: &str) -> StorageResult<Vec<UserUrl>>;

    /// Soft-delete the aliases owned by `owner_id`; unknown or foreign aliases are skipped
    async fn delete(&self, owner_id: i64, aliases: &[String]) -> StorageResult<()>;

    async fn healthcheck(&self) -> StorageResult<bool>;

    /// Count live records and their distinct owners
    async fn stats(&self) -> StorageResult<Stats>;
}

/// Join `host` and `alias` into a short URL
pub fn short_url(host: &str, alias: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), alias)
}
