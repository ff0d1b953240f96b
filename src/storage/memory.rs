use crate::alias::generate_alias;
use crate::models::{ShortenedUrl, Stats, UserUrl};
use crate::storage::replay_log::{self, CreationEvent, DeletionEvent, ReplayLog};
use crate::storage::trait_def::short_url;
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Attempts at drawing an unused alias before giving up
const MAX_ALIAS_ATTEMPTS: usize = 10;

#[derive(Default)]
struct State {
    /// Every record ever stored, deleted ones included
    records: HashMap<String, ShortenedUrl>,
    /// Live `(owner_id, url)` pairs and the alias they are stored under
    owner_urls: HashMap<(i64, String), String>,
    /// Aliases seen deleted during replay, possibly before their creation
    tombstones: HashSet<String>,
    /// Last record number written to either log
    seq: u64,
    log: Option<ReplayLog>,
}

impl State {
    fn next_uuid(&mut self) -> String {
        self.seq += 1;
        self.seq.to_string()
    }

    fn observe_uuid(&mut self, uuid: &str) {
        if let Ok(n) = uuid.parse::<u64>() {
            self.seq = self.seq.max(n);
        }
    }
}

/// Alias store held in process memory, optionally persisted to replay logs.
///
/// A single reader/writer lock guards the map. Log appends happen inside the
/// write critical section, so a slow disk stalls other writers.
pub struct MemoryStorage {
    path: Option<PathBuf>,
    state: RwLock<State>,
}

impl MemoryStorage {
    pub async fn new(path: Option<PathBuf>) -> Result<Self> {
        let log = match &path {
            Some(p) => Some(ReplayLog::open(p).await?),
            None => None,
        };

        Ok(Self {
            path,
            state: RwLock::new(State {
                log,
                ..State::default()
            }),
        })
    }

    pub(crate) async fn apply_creation(&self, event: CreationEvent) {
        let mut state = self.state.write().await;
        state.observe_uuid(&event.uuid);

        // A later creation for the same alias replaces the earlier one but
        // never revives it.
        let is_deleted = state.tombstones.contains(&event.alias)
            || state
                .records
                .get(&event.alias)
                .is_some_and(|r| r.is_deleted);

        state.records.insert(
            event.alias.clone(),
            ShortenedUrl {
                owner_id: event.owner_id,
                alias: event.alias,
                original_url: event.url,
                created_at: event.created_at,
                is_deleted,
            },
        );
    }

    pub(crate) async fn apply_deletion(&self, event: DeletionEvent) {
        let mut state = self.state.write().await;
        state.observe_uuid(&event.uuid);

        if !event.status_del {
            return;
        }
        if let Some(record) = state.records.get_mut(&event.alias) {
            record.is_deleted = true;
        }
        state.tombstones.insert(event.alias);
    }

    /// Settle tombstones and rebuild the `(owner_id, url)` index after replay
    pub(crate) async fn finish_replay(&self) {
        let mut state = self.state.write().await;
        let state = &mut *state;

        for alias in state.tombstones.drain() {
            if let Some(record) = state.records.get_mut(&alias) {
                record.is_deleted = true;
            }
        }

        state.owner_urls = state
            .records
            .values()
            .filter(|r| !r.is_deleted)
            .map(|r| ((r.owner_id, r.original_url.clone()), r.alias.clone()))
            .collect();
    }

    /// Every record, deleted ones included, ordered by alias
    pub async fn snapshot(&self) -> Vec<ShortenedUrl> {
        let state = self.state.read().await;
        let mut records: Vec<ShortenedUrl> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.alias.cmp(&b.alias));
        records
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> Result<()> {
        match &self.path {
            Some(path) => {
                replay_log::load(path, self).await?;
            }
            None => info!("In-memory storage without persistence"),
        }
        Ok(())
    }

    async fn put(&self, url: &str, alias: Option<&str>, owner_id: i64) -> StorageResult<String> {
        let mut state = self.state.write().await;

        let alias = match alias.filter(|a| !a.is_empty()) {
            Some(custom) => {
                // Deleted records keep their alias too; reusing it would come
                // back deleted on the next replay.
                if state.records.contains_key(custom) {
                    return Err(StorageError::AlreadyExists(custom.to_string()));
                }
                custom.to_string()
            }
            None => {
                let mut generated = None;
                for _ in 0..MAX_ALIAS_ATTEMPTS {
                    let candidate = generate_alias();
                    if !state.records.contains_key(&candidate) {
                        generated = Some(candidate);
                        break;
                    }
                }
                generated.ok_or_else(|| {
                    StorageError::Other(anyhow::anyhow!(
                        "put: no free alias after {MAX_ALIAS_ATTEMPTS} attempts"
                    ))
                })?
            }
        };

        if let Some(existing) = state.owner_urls.get(&(owner_id, url.to_string())) {
            return Err(StorageError::Conflict {
                alias: existing.clone(),
            });
        }

        let record = ShortenedUrl {
            owner_id,
            alias: alias.clone(),
            original_url: url.to_string(),
            created_at: Utc::now(),
            is_deleted: false,
        };

        if state.log.is_some() {
            let deletion = DeletionEvent {
                uuid: state.next_uuid(),
                alias: alias.clone(),
                status_del: false,
                owner_id,
            };
            let creation = CreationEvent {
                uuid: state.next_uuid(),
                alias: alias.clone(),
                url: url.to_string(),
                owner_id,
                created_at: record.created_at,
            };
            // The creation line commits the record. A live-status line left
            // behind by a failed creation append is ignored on replay.
            if let Some(log) = state.log.as_mut() {
                log.append_deletion(&deletion).await.context("put")?;
                log.append_creation(&creation).await.context("put")?;
            }
        }

        state
            .owner_urls
            .insert((owner_id, url.to_string()), alias.clone());
        state.records.insert(alias.clone(), record);

        Ok(alias)
    }

    async fn get(&self, alias: &str) -> StorageResult<ShortenedUrl> {
        let state = self.state.read().await;
        match state.records.get(alias) {
            Some(record) if record.is_deleted => Err(StorageError::Deleted(alias.to_string())),
            Some(record) => Ok(record.clone()),
            None => Err(StorageError::NotFound(alias.to_string())),
        }
    }

    async fn get_all(&self, owner_id: i64, host: &str) -> StorageResult<Vec<UserUrl>> {
        let state = self.state.read().await;
        let mut records: Vec<&ShortenedUrl> = state
            .records
            .values()
            .filter(|r| r.owner_id == owner_id && !r.is_deleted)
            .collect();
        records.sort_by_key(|r| r.created_at);

        Ok(records
            .into_iter()
            .map(|r| UserUrl {
                short_url: short_url(host, &r.alias),
                original_url: r.original_url.clone(),
            })
            .collect())
    }

    async fn delete(&self, owner_id: i64, aliases: &[String]) -> StorageResult<()> {
        let mut state = self.state.write().await;

        for alias in aliases {
            let url = match state.records.get(alias) {
                Some(r) if r.owner_id == owner_id && !r.is_deleted => r.original_url.clone(),
                Some(r) if r.owner_id != owner_id => {
                    warn!(alias = %alias, owner_id, "skipping delete of alias owned by another user");
                    continue;
                }
                _ => continue,
            };

            if state.log.is_some() {
                let event = DeletionEvent {
                    uuid: state.next_uuid(),
                    alias: alias.clone(),
                    status_del: true,
                    owner_id,
                };
                if let Some(log) = state.log.as_mut() {
                    log.append_deletion(&event).await.context("delete")?;
                }
            }

            if let Some(record) = state.records.get_mut(alias) {
                record.is_deleted = true;
            }
            state.owner_urls.remove(&(owner_id, url));
        }

        Ok(())
    }

    async fn healthcheck(&self) -> StorageResult<bool> {
        if let Some(path) = &self.path {
            replay_log::open_append(path)
                .await
                .context("healthcheck")?;
            replay_log::open_append(&replay_log::deletion_log_path(path))
                .await
                .context("healthcheck")?;
        }
        Ok(true)
    }

    async fn stats(&self) -> StorageResult<Stats> {
        let state = self.state.read().await;
        let live = state.records.values().filter(|r| !r.is_deleted);

        let mut urls = 0;
        let mut owners = HashSet::new();
        for record in live {
            urls += 1;
            owners.insert(record.owner_id);
        }

        Ok(Stats {
            urls,
            users: owners.len(),
        })
    }
}
