//! Append-only event logs backing the in-memory store
//!
//! Two newline-delimited JSON files are kept side by side: the creation log
//! (one [`CreationEvent`] per stored URL) and the deletion log (one
//! [`DeletionEvent`] per status change). Nothing is ever rewritten; startup
//! replays both files in full.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use super::memory::MemoryStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationEvent {
    pub uuid: String,
    pub alias: String,
    pub url: String,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionEvent {
    pub uuid: String,
    pub alias: String,
    pub status_del: bool,
    #[serde(default)]
    pub owner_id: i64,
}

/// Path of the deletion log that accompanies the creation log at `path`
pub fn deletion_log_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".del");
    PathBuf::from(name)
}

/// Open handles to both logs, positioned for appending
pub struct ReplayLog {
    creations: File,
    deletions: File,
}

impl ReplayLog {
    pub async fn open(path: &Path) -> Result<Self> {
        let creations = open_append(path).await?;
        let deletions = open_append(&deletion_log_path(path)).await?;
        Ok(Self {
            creations,
            deletions,
        })
    }

    pub async fn append_creation(&mut self, event: &CreationEvent) -> Result<()> {
        append_line(&mut self.creations, event)
            .await
            .context("failed to append to creation log")
    }

    pub async fn append_deletion(&mut self, event: &DeletionEvent) -> Result<()> {
        append_line(&mut self.deletions, event)
            .await
            .context("failed to append to deletion log")
    }
}

/// Open (creating if missing) a log file in append mode
pub async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open log file {}", path.display()))
}

async fn append_line<T: Serialize>(file: &mut File, event: &T) -> Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub creations: usize,
    pub deletions: usize,
}

/// Rebuild `store` from the logs at `path`.
///
/// Both files are replayed concurrently and interleave at record
/// granularity. An alias marked deleted in the deletion log ends up deleted
/// whatever the order the two passes reach it in.
pub async fn load(path: &Path, store: &MemoryStorage) -> Result<LoadSummary> {
    let deletion_path = deletion_log_path(path);
    let (creations, deletions) = tokio::try_join!(
        replay_creations(path, store),
        replay_deletions(&deletion_path, store),
    )?;
    store.finish_replay().await;

    info!(
        path = %path.display(),
        creations,
        deletions,
        "Replayed storage logs"
    );

    Ok(LoadSummary {
        creations,
        deletions,
    })
}

pub(crate) async fn replay_creations(path: &Path, store: &MemoryStorage) -> Result<usize> {
    for_each_event(path, move |event: CreationEvent| async move {
        debug!(alias = %event.alias, "replaying creation");
        store.apply_creation(event).await;
    })
    .await
}

pub(crate) async fn replay_deletions(path: &Path, store: &MemoryStorage) -> Result<usize> {
    for_each_event(path, move |event: DeletionEvent| async move {
        debug!(alias = %event.alias, status_del = event.status_del, "replaying deletion");
        store.apply_deletion(event).await;
    })
    .await
}

/// Feed every event in the file at `path` to `apply`, returning how many were read
async fn for_each_event<T, F, Fut>(path: &Path, mut apply: F) -> Result<usize>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to open log file {}", path.display()))
        }
    };

    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    let mut applied = 0usize;
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("failed to read log file {}", path.display()))?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: T = serde_json::from_str(&line).with_context(|| {
            format!("malformed event at {}:{}", path.display(), line_no)
        })?;
        apply(event).await;
        applied += 1;
    }

    Ok(applied)
}
