// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable delivery cursor.
//!
//! The cursor is the highest `seq` the consumer has been shown. It is read by
//! every delivery channel at connect time to request catch-up, and written
//! only by the reconciliation engine.
//!
//! # Write-Through Persistence
//!
//! Every advance is persisted **before** the in-memory value moves:
//!
//! ```text
//! accept event 42 → backend.save(key, 42) → current = 42 → publish snapshot
//!                   (failure here = current stays at 41, error surfaced)
//! ```
//!
//! A failed save is never papered over: the caller gets the error and the
//! cursor keeps its previous value, so a restart can't observe a value the
//! consumer was told about but that never reached disk.
//!
//! # Monotonicity
//!
//! [`CursorStore::set()`] ignores values that are not greater than the current
//! one. Callers don't need to compare first. The only way down is
//! [`CursorStore::reset()`], which also bumps the snapshot `epoch` so readers
//! can tell a reset apart from normal progress.
//!
//! # Backends
//!
//! The store is a thin layer over a [`CursorBackend`] key-value capability:
//! - [`SqliteCursorBackend`]: WAL-mode SQLite, survives process restarts
//! - [`MemoryCursorBackend`]: shared in-process map, for tests and embedders

use crate::config::CursorConfig;
use crate::error::{DeliveryError, Result};
use crate::metrics;
use crate::transport::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                metrics::record_cursor_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(operation = operation_name, attempts, "SQLite busy, max retries exceeded");
                }
                return Err(e);
            }
        }
    }
}

/// Key-value persistence capability the cursor is stored in.
pub trait CursorBackend: Send + Sync + 'static {
    /// Load the value stored under `key`, if any.
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<u64>>;

    /// Durably store `seq` under `key`. Must not return before the value
    /// would survive a restart.
    fn save<'a>(&'a self, key: &'a str, seq: u64) -> BoxFuture<'a, ()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()>;

    /// Release resources. Default is a no-op.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SQLite backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Cursor backend on SQLite (WAL mode).
pub struct SqliteCursorBackend {
    pool: SqlitePool,
    path: String,
}

impl SqliteCursorBackend {
    /// Open (or create) the database at `path`. `":memory:"` opens a
    /// private in-memory database.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Initializing cursor store");

        let in_memory = path_str == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path_str)
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DeliveryError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .create_if_missing(true);

        // Every connection to ":memory:" is its own database
        let max_connections = if in_memory { 1 } else { 2 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cursors (
                key TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, path: path_str })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;

        execute_with_retry("cursor_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
        })
        .await?;

        debug!("WAL checkpoint complete");
        Ok(())
    }
}

impl CursorBackend for SqliteCursorBackend {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<u64>> {
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as("SELECT seq FROM cursors WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

            match row {
                None => Ok(None),
                Some((seq,)) => u64::try_from(seq).map(Some).map_err(|_| {
                    DeliveryError::Internal(format!("stored cursor for '{}' is negative: {}", key, seq))
                }),
            }
        })
    }

    fn save<'a>(&'a self, key: &'a str, seq: u64) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let stored = i64::try_from(seq).map_err(|_| DeliveryError::CursorPersist {
                seq,
                message: "seq exceeds SQLite INTEGER range".to_string(),
            })?;
            let now = chrono::Utc::now().timestamp_millis();
            let pool = &self.pool;

            execute_with_retry("cursor_save", || async {
                sqlx::query(
                    r#"
                    INSERT INTO cursors (key, seq, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        seq = excluded.seq,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(key)
                .bind(stored)
                .bind(now)
                .execute(pool)
                .await
            })
            .await?;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let pool = &self.pool;
            execute_with_retry("cursor_remove", || async {
                sqlx::query("DELETE FROM cursors WHERE key = ?").bind(key).execute(pool).await
            })
            .await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.path.starts_with(':') {
                if let Err(e) = self.checkpoint().await {
                    warn!(error = %e, "Failed to checkpoint WAL on close");
                }
            }
            self.pool.close().await;
            info!("Cursor store closed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory backend
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process cursor backend.
///
/// Clones share the same map, so a clone handed to a second [`CursorStore`]
/// behaves like the same database reopened after a restart.
#[derive(Clone, Default)]
pub struct MemoryCursorBackend {
    values: Arc<RwLock<HashMap<String, u64>>>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryCursorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save()` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Raw stored value, bypassing any store cache.
    pub async fn stored(&self, key: &str) -> Option<u64> {
        self.values.read().await.get(key).copied()
    }
}

impl CursorBackend for MemoryCursorBackend {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<u64>> {
        Box::pin(async move { Ok(self.values.read().await.get(key).copied()) })
    }

    fn save<'a>(&'a self, key: &'a str, seq: u64) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(DeliveryError::CursorPersist {
                    seq,
                    message: "injected save failure".to_string(),
                });
            }
            self.values.write().await.insert(key.to_string(), seq);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.values.write().await.remove(key);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CursorStore
// ═══════════════════════════════════════════════════════════════════════════════

/// Published view of the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorSnapshot {
    /// Highest seq delivered to the consumer.
    pub seq: u64,
    /// Incremented on every reset.
    pub epoch: u64,
}

/// Monotonic, durable cursor over a [`CursorBackend`].
///
/// Owned by the reconciliation engine; everyone else observes it through
/// [`subscribe()`](Self::subscribe).
pub struct CursorStore {
    backend: Arc<dyn CursorBackend>,
    key: String,
    current: u64,
    epoch: u64,
    snapshot_tx: watch::Sender<CursorSnapshot>,
}

impl CursorStore {
    /// Open the cursor stored under `key` (0 if never set).
    pub async fn open(backend: Arc<dyn CursorBackend>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let current = backend.load(&key).await?.unwrap_or(0);

        if current > 0 {
            info!(key = %key, seq = current, "Restored cursor from previous run");
        }

        let (snapshot_tx, _) = watch::channel(CursorSnapshot { seq: current, epoch: 0 });
        metrics::set_cursor_value(current);

        Ok(Self {
            backend,
            key,
            current,
            epoch: 0,
            snapshot_tx,
        })
    }

    /// Open the SQLite-backed cursor described by `config`.
    pub async fn from_config(config: &CursorConfig) -> Result<Self> {
        let backend = SqliteCursorBackend::new(&config.sqlite_path).await?;
        Self::open(Arc::new(backend), config.key.clone()).await
    }

    /// Open a cursor on a fresh in-memory backend.
    pub async fn in_memory() -> Result<Self> {
        Self::open(Arc::new(MemoryCursorBackend::new()), "notif_last_seq").await
    }

    /// Current value (0 if never set).
    pub fn get(&self) -> u64 {
        self.current
    }

    /// Current value plus reset epoch.
    pub fn snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            seq: self.current,
            epoch: self.epoch,
        }
    }

    /// Watch the cursor as it advances.
    pub fn subscribe(&self) -> watch::Receiver<CursorSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Key the cursor is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Advance the cursor to `seq`.
    ///
    /// Returns `Ok(false)` without touching the backend if `seq` is not
    /// greater than the current value. On persistence failure the value is
    /// left unchanged and the error is returned.
    pub async fn set(&mut self, seq: u64) -> Result<bool> {
        if seq <= self.current {
            return Ok(false);
        }

        if let Err(e) = self.backend.save(&self.key, seq).await {
            metrics::record_cursor_persist(false);
            error!(key = %self.key, seq, current = self.current, error = %e, "Failed to persist cursor");
            return Err(e);
        }
        metrics::record_cursor_persist(true);

        self.current = seq;
        self.publish();
        debug!(seq, "Cursor advanced");
        Ok(true)
    }

    /// Forget all progress: remove the persisted key and go back to 0.
    pub async fn reset(&mut self) -> Result<()> {
        self.backend.remove(&self.key).await?;

        let previous = self.current;
        self.current = 0;
        self.epoch += 1;
        self.publish();
        info!(key = %self.key, previous, epoch = self.epoch, "Cursor reset");
        Ok(())
    }

    /// Close the backend.
    pub async fn close(&self) {
        if let Err(e) = self.backend.close().await {
            warn!(error = %e, "Failed to close cursor backend");
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
        metrics::set_cursor_value(self.current);
    }
}
