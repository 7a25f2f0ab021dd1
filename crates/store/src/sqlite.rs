//! SQLite-backed [`TransactionStore`].
//!
//! A single connection sits behind a mutex; every operation runs on the
//! blocking pool and is bounded by the configured operation timeout.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::schema::Transaction;
use crate::store::TransactionStore;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    amount REAL NOT NULL,
    raw_label TEXT NOT NULL,
    note TEXT,
    category TEXT,
    expense TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    month INTEGER NOT NULL,
    CHECK ((category IS NULL) = (is_read = 0))
);

CREATE INDEX IF NOT EXISTS idx_transactions_unread
    ON transactions (is_read, created_at);

CREATE INDEX IF NOT EXISTS idx_transactions_month
    ON transactions (month, is_read);
";

const COLUMNS: &str =
    "id, amount, raw_label, note, category, expense, is_read, created_at, month";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    op_timeout: Duration,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>, op_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_db(&conn)?;
        info!(path = %path.display(), "transaction store opened");
        Ok(Self::from_connection(conn, op_timeout))
    }

    pub fn open_in_memory(op_timeout: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn, op_timeout))
    }

    fn from_connection(conn: Connection, op_timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            op_timeout,
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&guard).map_err(StoreError::from)
        });

        match tokio::time::timeout(self.op_timeout, task).await {
            Err(_) => Err(StoreError::Timeout {
                op,
                after: self.op_timeout,
            }),
            Ok(Err(join_err)) => Err(StoreError::Unavailable(format!(
                "store task for `{op}` failed: {join_err}"
            ))),
            Ok(Ok(result)) => {
                if let Err(ref err) = result {
                    debug!(op, %err, "store operation failed");
                }
                result
            }
        }
    }
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Fixed-width RFC 3339 so that text ordering equals time ordering.
fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let created_raw: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    Ok(Transaction {
        id: row.get(0)?,
        amount: row.get(1)?,
        raw_label: row.get(2)?,
        note: row.get(3)?,
        category: row.get(4)?,
        expense: row.get(5)?,
        is_read: row.get(6)?,
        created_at,
        month: row.get(8)?,
    })
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn insert_if_absent(&self, tx: &Transaction) -> Result<bool> {
        let tx = tx.clone();
        self.run("insert_if_absent", move |conn| {
            let changed = conn.execute(
                "INSERT INTO transactions (id, amount, raw_label, note, category, expense, is_read, created_at, month) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(id) DO NOTHING",
                params![
                    tx.id,
                    tx.amount,
                    tx.raw_label,
                    tx.note,
                    tx.category,
                    tx.expense,
                    tx.is_read,
                    encode_time(tx.created_at),
                    tx.month,
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn find_latest_unread(&self) -> Result<Option<Transaction>> {
        self.run("find_latest_unread", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM transactions WHERE is_read = 0 \
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                [],
                row_to_transaction,
            )
            .optional()
        })
        .await
    }

    async fn find_unread_by_amount_and_note(
        &self,
        amount: f64,
        note: Option<&str>,
    ) -> Result<Option<Transaction>> {
        let note = note.map(str::to_string);
        self.run("find_unread_by_amount_and_note", move |conn| {
            // Notifications render whole units, so compare at that precision.
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM transactions \
                     WHERE is_read = 0 AND ROUND(amount) = ROUND(?1) AND note IS ?2 \
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![amount, note],
                row_to_transaction,
            )
            .optional()
        })
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Transaction>> {
        let id = id.to_string();
        self.run("get_by_id", move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM transactions WHERE id = ?1"),
                [id],
                row_to_transaction,
            )
            .optional()
        })
        .await
    }

    async fn mark_categorized(&self, id: &str, category: &str, detail: &str) -> Result<bool> {
        let (id, category, detail) = (id.to_string(), category.to_string(), detail.to_string());
        self.run("mark_categorized", move |conn| {
            let changed = conn.execute(
                "UPDATE transactions SET is_read = 1, category = ?2, expense = ?3 WHERE id = ?1",
                params![id, category, detail],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn sum_read_amount_for_month(&self, month: u32, only_negative: bool) -> Result<f64> {
        self.run("sum_read_amount_for_month", move |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM transactions \
                 WHERE month = ?1 AND is_read = 1 AND (?2 = 0 OR amount < 0)",
                params![month, only_negative],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn count_unread(&self) -> Result<u64> {
        self.run("count_unread", |conn| {
            conn.query_row(
                "SELECT count(*) FROM transactions WHERE is_read = 0",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n.max(0) as u64)
        })
        .await
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<Transaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run("list_unread", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM transactions WHERE is_read = 0 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1"
            ))?;
            stmt.query_map([limit], row_to_transaction)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }
}
