//! In-memory fakes shared by the unit tests of this crate.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use spendbot_store::{StoreError, Transaction, TransactionStore};

use crate::transport::{ChatTransport, TransportError};

pub(crate) fn transaction(id: &str, amount: f64, note: Option<&str>, day: u32) -> Transaction {
    let at = Utc.with_ymd_and_hms(2025, 5, day, 9, 0, 0).unwrap();
    Transaction::unread(id, amount, "Balance alert", note.map(String::from), at, chrono_tz::UTC)
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    rows: Mutex<Vec<Transaction>>,
    failing: AtomicBool,
    fail_after_commit: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn with(rows: Vec<Transaction>) -> Self {
        Self {
            rows: Mutex::new(rows),
            failing: AtomicBool::new(false),
            fail_after_commit: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `mark_categorized` writes the row, then reports a failure, the way a
    /// timed-out blocking write still lands.
    pub(crate) fn set_fail_after_commit(&self, fail: bool) {
        self.fail_after_commit.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn row(&self, id: &str) -> Option<Transaction> {
        self.rows.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn newest_unread<F: Fn(&Transaction) -> bool>(&self, keep: F) -> Option<Transaction> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_read && keep(t))
            .max_by_key(|t| t.created_at)
            .cloned()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_if_absent(&self, tx: &Transaction) -> Result<bool, StoreError> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|t| t.id == tx.id) {
            return Ok(false);
        }
        rows.push(tx.clone());
        Ok(true)
    }

    async fn find_latest_unread(&self) -> Result<Option<Transaction>, StoreError> {
        self.check()?;
        Ok(self.newest_unread(|_| true))
    }

    async fn find_unread_by_amount_and_note(
        &self,
        amount: f64,
        note: Option<&str>,
    ) -> Result<Option<Transaction>, StoreError> {
        self.check()?;
        Ok(self.newest_unread(|t| t.amount.round() == amount.round() && t.note.as_deref() == note))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        self.check()?;
        Ok(self.row(id))
    }

    async fn mark_categorized(
        &self,
        id: &str,
        category: &str,
        detail: &str,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        row.is_read = true;
        row.category = Some(category.to_string());
        row.expense = Some(detail.to_string());
        if self.fail_after_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout {
                op: "mark_categorized",
                after: std::time::Duration::from_secs(15),
            });
        }
        Ok(true)
    }

    async fn sum_read_amount_for_month(
        &self,
        month: u32,
        only_negative: bool,
    ) -> Result<f64, StoreError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.month == month && t.is_read && (!only_negative || t.amount < 0.0))
            .map(|t| t.amount)
            .sum())
    }

    async fn count_unread(&self) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.rows.lock().unwrap().iter().filter(|t| !t.is_read).count() as u64)
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<Transaction>, StoreError> {
        self.check()?;
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_read)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, text: &str) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Http("injected failure".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
