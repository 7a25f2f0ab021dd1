//! Categorization handler: applies a `CATEGORY - detail` reply to the
//! transaction it answers.

use std::sync::Arc;

use tracing::{debug, info, warn};

use spendbot_store::{Transaction, TransactionStore};

use crate::error::CategorizeError;
use crate::notification::parse_notification;
use crate::reply::{CategoryReply, parse_reply};
use crate::scheduler::NotificationScheduler;

/// Which transaction a reply resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    /// Whatever the scheduler is currently reminding about.
    Session,
    /// The text of the notification the user replied to.
    Notification(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategorizationReceipt {
    pub transaction_id: String,
    pub category: String,
    pub detail: String,
    pub month: u32,
    /// Sum of all categorized amounts in `month`, this one included.
    pub month_total: f64,
}

#[derive(Clone)]
pub struct CategorizationHandler {
    store: Arc<dyn TransactionStore>,
    scheduler: NotificationScheduler,
}

impl CategorizationHandler {
    pub fn new(store: Arc<dyn TransactionStore>, scheduler: NotificationScheduler) -> Self {
        Self { store, scheduler }
    }

    pub async fn handle_reply(
        &self,
        reply_text: &str,
        target: ReplyTarget,
    ) -> Result<CategorizationReceipt, CategorizeError> {
        let reply = parse_reply(reply_text)?;
        let tx = self.resolve(target).await?;

        if tx.is_read {
            // An earlier attempt committed after reporting a store failure.
            self.scheduler.release_if_pending(&tx.id).await;
            let same = tx.category.as_deref() == Some(reply.category.as_str())
                && tx.expense.as_deref() == Some(reply.detail.as_str());
            if !same {
                info!(id = %tx.id, "categorize: pending transaction already categorized");
                return Err(CategorizeError::TransactionNotFound);
            }
            return self.receipt(tx, reply).await;
        }

        if !self
            .store
            .mark_categorized(&tx.id, &reply.category, &reply.detail)
            .await?
        {
            warn!(id = %tx.id, "categorize: transaction vanished before update");
            return Err(CategorizeError::TransactionNotFound);
        }
        self.scheduler.release_if_pending(&tx.id).await;
        self.receipt(tx, reply).await
    }

    async fn receipt(
        &self,
        tx: Transaction,
        reply: CategoryReply,
    ) -> Result<CategorizationReceipt, CategorizeError> {
        let month_total = self.store.sum_read_amount_for_month(tx.month, false).await?;
        info!(
            id = %tx.id,
            category = %reply.category,
            month = tx.month,
            month_total,
            "transaction categorized"
        );

        Ok(CategorizationReceipt {
            transaction_id: tx.id,
            category: reply.category,
            detail: reply.detail,
            month: tx.month,
            month_total,
        })
    }

    /// Find the transaction a reply answers.  Unread rows only, except the
    /// row still held in the pending slot, which is returned even if read.
    async fn resolve(&self, target: ReplyTarget) -> Result<Transaction, CategorizeError> {
        let quoted = match target {
            ReplyTarget::Session => return self.pending_slot().await,
            ReplyTarget::Notification(text) => text,
        };

        // A reply to any other bot message answers the pending notification.
        let Some(parsed) = parse_notification(&quoted) else {
            debug!("categorize: quoted text is not a notification; using pending slot");
            return self.pending_slot().await;
        };

        let found = match parsed.reference {
            Some(id) => match self.store.get_by_id(&id).await? {
                Some(tx) if !tx.is_read => Some(tx),
                Some(tx) if self.is_pending(&tx.id).await => Some(tx),
                _ => None,
            },
            None => {
                self.store
                    .find_unread_by_amount_and_note(parsed.amount, parsed.note.as_deref())
                    .await?
            }
        };
        found.ok_or(CategorizeError::TransactionNotFound)
    }

    async fn pending_slot(&self) -> Result<Transaction, CategorizeError> {
        let Some(slot) = self.scheduler.pending_transaction().await else {
            return Err(CategorizeError::TransactionNotFound);
        };
        // The slot holds a snapshot; the row may have been read since.
        Ok(self.store.get_by_id(&slot.id).await?.unwrap_or(slot))
    }

    async fn is_pending(&self, id: &str) -> bool {
        self.scheduler
            .pending_transaction()
            .await
            .is_some_and(|tx| tx.id == id)
    }
}
