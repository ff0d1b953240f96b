pub mod memory;
pub mod postgres;
pub mod replay_log;
pub mod trait_def;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use trait_def::{short_url, Storage, StorageError, StorageResult};

use crate::config::StorageBackend;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Build and initialize the one backend `backend` selects
pub async fn connect(backend: &StorageBackend) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match backend {
        StorageBackend::Memory { file_path } => {
            match file_path {
                Some(path) => info!("Using in-memory storage persisted to {}", path.display()),
                None => info!("Using in-memory storage"),
            }
            Arc::new(MemoryStorage::new(file_path.clone()).await?)
        }
        StorageBackend::Postgres {
            dsn,
            max_connections,
        } => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(dsn, *max_connections).await?)
        }
    };

    storage.init().await?;
    Ok(storage)
}
