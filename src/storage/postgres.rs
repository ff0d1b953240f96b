use crate::alias::generate_alias;
use crate::models::{ShortenedUrl, Stats, UserUrl};
use crate::storage::trait_def::short_url;
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(3);

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(INIT_TIMEOUT)
            .connect(database_url)
            .await
            .context("failed to connect to postgres")?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Alias the owner already stored `url` under, deleted rows included
    async fn existing_alias(&self, owner_id: i64, url: &str) -> Result<Option<String>> {
        let alias = sqlx::query_scalar::<_, String>(
            r#"
            SELECT alias FROM short_urls
            WHERE owner_id = $1 AND url = $2
            "#,
        )
        .bind(owner_id)
        .bind(url)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(alias)
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        let create = sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS short_urls (
                owner_id BIGINT NOT NULL,
                url VARCHAR NOT NULL,
                alias VARCHAR NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                deleted BOOLEAN NOT NULL DEFAULT false,
                PRIMARY KEY (owner_id, alias),
                UNIQUE (owner_id, url)
            )
            "#,
        )
        .execute(self.pool.as_ref());

        timeout(INIT_TIMEOUT, create)
            .await
            .context("timed out creating short_urls table")?
            .context("failed to create short_urls table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_short_urls_alias ON short_urls(alias)")
            .execute(self.pool.as_ref())
            .await?;

        info!("short_urls table ready");
        Ok(())
    }

    async fn put(&self, url: &str, alias: Option<&str>, owner_id: i64) -> StorageResult<String> {
        let alias = match alias.filter(|a| !a.is_empty()) {
            Some(custom) => custom.to_string(),
            None => generate_alias(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO short_urls (owner_id, url, alias, created_at, deleted)
            VALUES ($1, $2, $3, now(), false)
            "#,
        )
        .bind(owner_id)
        .bind(url)
        .bind(&alias)
        .execute(self.pool.as_ref())
        .await;

        match result {
            Ok(_) => Ok(alias),
            Err(e) if is_unique_violation(&e) => {
                // Not atomic with the insert: the conflicting row may change
                // in between, in which case the unused alias is reported.
                let existing = self.existing_alias(owner_id, url).await.context("put")?;
                if existing.is_none() {
                    warn!(owner_id, url, "conflicting row vanished before lookup");
                }
                Err(StorageError::Conflict {
                    alias: existing.unwrap_or(alias),
                })
            }
            Err(e) => Err(StorageError::Other(anyhow::Error::new(e).context("put"))),
        }
    }

    async fn get(&self, alias: &str) -> StorageResult<ShortenedUrl> {
        // Live rows win when several owners share an alias
        let record = sqlx::query_as::<_, ShortenedUrl>(
            r#"
            SELECT owner_id, alias, url, created_at, deleted
            FROM short_urls
            WHERE alias = $1
            ORDER BY deleted ASC, created_at ASC
            LIMIT 1
            "#,
        )
        .bind(alias)
        .fetch_optional(self.pool.as_ref())
        .await
        .context("get")?;

        match record {
            Some(r) if r.is_deleted => Err(StorageError::Deleted(alias.to_string())),
            Some(r) => Ok(r),
            None => Err(StorageError::NotFound(alias.to_string())),
        }
    }

    async fn get_all(&self, owner_id: i64, host: &str) -> StorageResult<Vec<UserUrl>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT alias, url
            FROM short_urls
            WHERE owner_id = $1 AND deleted = false
            ORDER BY created_at ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await
        .context("get_all")?;

        Ok(rows
            .into_iter()
            .map(|(alias, url)| UserUrl {
                short_url: short_url(host, &alias),
                original_url: url,
            })
            .collect())
    }

    async fn delete(&self, owner_id: i64, aliases: &[String]) -> StorageResult<()> {
        if aliases.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE short_urls
            SET deleted = true
            WHERE owner_id = $1 AND alias = ANY($2)
            "#,
        )
        .bind(owner_id)
        .bind(aliases)
        .execute(self.pool.as_ref())
        .await
        .context("delete")?;

        Ok(())
    }

    async fn healthcheck(&self) -> StorageResult<bool> {
        let ping = async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await
        };

        match timeout(PING_TIMEOUT, ping).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(StorageError::Other(
                anyhow::Error::new(e).context("healthcheck"),
            )),
            Err(_) => Err(StorageError::Other(anyhow::anyhow!(
                "healthcheck: ping timed out after {PING_TIMEOUT:?}"
            ))),
        }
    }

    async fn stats(&self) -> StorageResult<Stats> {
        let urls = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM short_urls WHERE deleted = false",
        )
        .fetch_one(self.pool.as_ref())
        .await
        .context("stats")?;

        let users = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT owner_id) FROM short_urls WHERE deleted = false",
        )
        .fetch_one(self.pool.as_ref())
        .await
        .context("stats")?;

        Ok(Stats {
            urls: urls as usize,
            users: users as usize,
        })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
