use async_trait::async_trait;

use crate::error::Result;
use crate::schema::Transaction;

/// Durable record of transactions.
///
/// Rows are only ever inserted (by ingestion) and categorized once (by the
/// categorization handler).  Nothing is deleted.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert unless a row with the same id exists.  Returns `true` when a
    /// row was written; the first write's values always win.
    async fn insert_if_absent(&self, tx: &Transaction) -> Result<bool>;

    /// Newest unread transaction by `created_at`.
    async fn find_latest_unread(&self) -> Result<Option<Transaction>>;

    /// Newest unread transaction whose signed amount and note both match.
    async fn find_unread_by_amount_and_note(
        &self,
        amount: f64,
        note: Option<&str>,
    ) -> Result<Option<Transaction>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Transaction>>;

    /// Mark read and set category + detail in one statement.  Returns
    /// `false` when no row has this id.
    async fn mark_categorized(&self, id: &str, category: &str, detail: &str) -> Result<bool>;

    /// Sum of `amount` over read transactions in `month`.  With
    /// `only_negative`, inflows are excluded.
    async fn sum_read_amount_for_month(&self, month: u32, only_negative: bool) -> Result<f64>;

    async fn count_unread(&self) -> Result<u64>;

    /// Unread transactions, newest first.
    async fn list_unread(&self, limit: usize) -> Result<Vec<Transaction>>;
}
