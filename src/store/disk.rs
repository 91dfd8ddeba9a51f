//! SQLite-backed durable string map, one file per feed URL.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::StoreError;

/// A single staged mutation, applied at the next [`DiskStore::commit`].
#[derive(Debug, Clone)]
pub enum StoreOp {
    Put {
        ns: String,
        key: String,
        value: String,
        kind: String,
    },
    Delete {
        ns: String,
        key: String,
    },
    ClearNamespace {
        ns: String,
    },
}

struct Inner {
    pool: SqlitePool,
    path: Option<PathBuf>,
    pending: Mutex<Vec<StoreOp>>,
}

/// Handle to one feed's cache file.
///
/// Writes are staged in memory and drained by [`commit`] inside a
/// single transaction, so a channel can flush all of its entries and
/// then hit the disk once. Cloning shares the same file and staging
/// queue.
///
/// [`commit`]: DiskStore::commit
#[derive(Clone)]
pub struct DiskStore {
    inner: Arc<Inner>,
}

impl DiskStore {
    /// Open (or create) the cache file for `url` under `cache_dir`.
    pub async fn open(cache_dir: &Path, url: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(cache_file_name(url));
        Self::open_at(Some(path)).await
    }

    /// In-memory store, used by tests and one-shot inspection.
    pub async fn open_memory() -> Result<Self, StoreError> {
        Self::open_at(None).await
    }

    async fn open_at(path: Option<PathBuf>) -> Result<Self, StoreError> {
        let options = match &path {
            Some(p) => SqliteConnectOptions::new().filename(p).create_if_missing(true),
            None => SqliteConnectOptions::new().in_memory(true),
        }
        // busy_timeout=5000: wait up to 5s for a lock before failing,
        // covers transient contention from an overlapping inspection run.
        .pragma("busy_timeout", "5000");

        // One connection: each feed has exactly one writer, and a second
        // connection would only add lock churn.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                ns    TEXT NOT NULL,
                key   TEXT NOT NULL,
                value TEXT NOT NULL,
                kind  TEXT NOT NULL,
                PRIMARY KEY (ns, key)
            )
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                path,
                pending: Mutex::new(Vec::new()),
            }),
        })
    }

    /// All `(key, value, kind)` rows under one namespace.
    pub async fn read_namespace(
        &self,
        ns: &str,
    ) -> Result<Vec<(String, String, String)>, StoreError> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT key, value, kind FROM cache WHERE ns = ?")
                .bind(ns)
                .fetch_all(&self.inner.pool)
                .await?;
        Ok(rows)
    }

    /// Every non-root namespace present in the file — the set of cached
    /// entry ids.
    pub async fn namespaces(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT ns FROM cache WHERE ns != '' ORDER BY ns")
                .fetch_all(&self.inner.pool)
                .await?;
        Ok(rows.into_iter().map(|(ns,)| ns).collect())
    }

    /// Stage a mutation for the next commit.
    pub fn stage(&self, op: StoreOp) {
        self.inner
            .pending
            .lock()
            .expect("store staging lock poisoned")
            .push(op);
    }

    /// Apply every staged mutation in one transaction.
    pub async fn commit(&self) -> Result<(), StoreError> {
        let ops = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .expect("store staging lock poisoned");
            std::mem::take(&mut *pending)
        };
        if ops.is_empty() {
            return Ok(());
        }

        let mut tx = self.inner.pool.begin().await?;
        for op in ops {
            match op {
                StoreOp::Put {
                    ns,
                    key,
                    value,
                    kind,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO cache (ns, key, value, kind)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(ns, key) DO UPDATE SET
                            value = excluded.value,
                            kind = excluded.kind
                    "#,
                    )
                    .bind(&ns)
                    .bind(&key)
                    .bind(&value)
                    .bind(&kind)
                    .execute(&mut *tx)
                    .await?;
                }
                StoreOp::Delete { ns, key } => {
                    sqlx::query("DELETE FROM cache WHERE ns = ? AND key = ?")
                        .bind(&ns)
                        .bind(&key)
                        .execute(&mut *tx)
                        .await?;
                }
                StoreOp::ClearNamespace { ns } => {
                    sqlx::query("DELETE FROM cache WHERE ns = ?")
                        .bind(&ns)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Hard-link this store's file under the cache name for `new_url`,
    /// preserving history when a feed moves permanently. Staged writes
    /// are committed first so the linked file is current. In-memory
    /// stores have nothing to link.
    pub async fn hard_link_as(&self, cache_dir: &Path, new_url: &str) -> Result<(), StoreError> {
        self.commit().await?;
        let Some(path) = &self.inner.path else {
            return Ok(());
        };
        let target = cache_dir.join(cache_file_name(new_url));
        if target.exists() {
            tracing::debug!(target = %target.display(), "cache file already present, not linking");
            return Ok(());
        }
        std::fs::hard_link(path, &target)?;
        Ok(())
    }
}

/// Filesystem-safe cache file name for a feed URL: scheme and leading
/// `www.` stripped, path separators folded to `,`, anything else
/// unusual folded to `_`.
pub fn cache_file_name(url: &str) -> String {
    let rest = url
        .split_once(":")
        .map(|(scheme, rest)| {
            if scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
                rest.trim_start_matches('/')
            } else {
                url
            }
        })
        .unwrap_or(url);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);

    let mut name: String = rest
        .chars()
        .map(|c| match c {
            '?' | '/' | ':' | '|' => ',',
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | ',' | '.' | '-') => c,
            _ => '_',
        })
        .collect();
    name.push_str(".db");
    name
}
