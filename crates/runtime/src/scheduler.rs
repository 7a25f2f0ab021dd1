//! Notification scheduler: the single-slot pending-notification tracker.
//!
//! At most one transaction is "pending" at a time.  A tick fills the slot with
//! the newest unread transaction and sends one notification; from then on a
//! resend task bound to that transaction repeats the message every
//! `resend_interval` until the transaction is read.  The slot is released by
//! the categorization handler (or an explicit reset), never by a tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use spendbot_config::AppConfig;
use spendbot_store::{Transaction, TransactionStore};

use crate::notification::render_notification;
use crate::transport::ChatTransport;

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub user_name: String,
    pub currency: String,
    pub resend_interval: Duration,
}

impl NotificationSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            user_name: config.bot.user_name.clone(),
            currency: config.bot.currency.clone(),
            resend_interval: config.resend_interval(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A notification is outstanding; nothing was sent.
    Busy,
    /// No unread transaction exists.
    Idle,
    /// The slot was filled and a notification sent.  `delivered` is false
    /// when the transport failed; the resend task retries it.
    Notified {
        transaction_id: String,
        delivered: bool,
    },
    /// The store could not be read; the next tick retries.
    StoreFailed,
}

/// Read-only view of the scheduler state.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub transaction: Option<Transaction>,
    pub awaiting_reply: bool,
    pub resend_active: bool,
}

struct ResendTask {
    transaction_id: String,
    handle: AbortHandle,
}

#[derive(Default)]
struct PendingState {
    slot: Option<Transaction>,
    awaiting_reply: bool,
    resend: Option<ResendTask>,
}

impl PendingState {
    fn abort_resend(&mut self) {
        if let Some(task) = self.resend.take() {
            task.handle.abort();
            debug!(id = %task.transaction_id, "resend task aborted");
        }
    }
}

#[derive(Clone)]
pub struct NotificationScheduler {
    store: Arc<dyn TransactionStore>,
    transport: Arc<dyn ChatTransport>,
    settings: NotificationSettings,
    state: Arc<Mutex<PendingState>>,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        transport: Arc<dyn ChatTransport>,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            store,
            transport,
            settings,
            state: Arc::new(Mutex::new(PendingState::default())),
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        if self.state.lock().await.awaiting_reply {
            debug!("tick: awaiting reply, nothing to do");
            return TickOutcome::Busy;
        }

        let tx = match self.store.find_latest_unread().await {
            Ok(Some(tx)) => tx,
            Ok(None) => return TickOutcome::Idle,
            Err(err) => {
                warn!(%err, "tick: store read failed; skipping");
                return TickOutcome::StoreFailed;
            }
        };

        // The store call above was a suspension point; re-check before claiming.
        {
            let mut state = self.state.lock().await;
            if state.awaiting_reply {
                return TickOutcome::Busy;
            }
            state.slot = Some(tx.clone());
            state.awaiting_reply = true;
        }

        let message =
            render_notification(&tx, &self.settings.user_name, &self.settings.currency);
        let delivered = self.deliver(&message, &tx.id, "notification").await;
        self.start_resend(&tx.id, message).await;

        TickOutcome::Notified {
            transaction_id: tx.id,
            delivered,
        }
    }

    /// Drive [`tick`](Self::tick) every `tick_interval` until shutdown.
    pub async fn run(self, tick_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?tick_interval, "notification scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state.lock().await.abort_resend();
        info!("notification scheduler stopped");
    }

    /// Release the slot if it holds `transaction_id`.  Returns whether it did.
    pub async fn release_if_pending(&self, transaction_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let matches = state
            .slot
            .as_ref()
            .is_some_and(|tx| tx.id == transaction_id);
        if matches {
            state.slot = None;
            state.awaiting_reply = false;
            state.abort_resend();
            debug!(id = transaction_id, "pending slot released");
        }
        matches
    }

    /// Forget the pending notification so the next tick starts afresh.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.slot = None;
        state.awaiting_reply = false;
        state.abort_resend();
        info!("notification scheduler reset");
    }

    pub async fn pending_transaction(&self) -> Option<Transaction> {
        self.state.lock().await.slot.clone()
    }

    pub async fn snapshot(&self) -> PendingSnapshot {
        let state = self.state.lock().await;
        PendingSnapshot {
            transaction: state.slot.clone(),
            awaiting_reply: state.awaiting_reply,
            resend_active: state.resend.is_some(),
        }
    }

    async fn deliver(&self, message: &str, transaction_id: &str, kind: &'static str) -> bool {
        match self.transport.send_message(message).await {
            Ok(()) => {
                info!(id = transaction_id, kind, "notification sent");
                true
            }
            Err(err) => {
                warn!(id = transaction_id, kind, %err, "notification send failed; resend will retry");
                false
            }
        }
    }

    async fn start_resend(&self, transaction_id: &str, message: String) {
        let mut state = self.state.lock().await;
        state.abort_resend();

        // Already resolved while the first send was in flight.
        if state.slot.as_ref().map(|tx| tx.id.as_str()) != Some(transaction_id) {
            return;
        }

        let this = self.clone();
        let id = transaction_id.to_string();
        let join = tokio::spawn(async move { this.resend_loop(id, message).await });
        state.resend = Some(ResendTask {
            transaction_id: transaction_id.to_string(),
            handle: join.abort_handle(),
        });
    }

    async fn resend_loop(self, transaction_id: String, message: String) {
        loop {
            tokio::time::sleep(self.settings.resend_interval).await;

            match self.store.get_by_id(&transaction_id).await {
                Ok(Some(tx)) if !tx.is_read => {
                    self.deliver(&message, &transaction_id, "resend").await;
                }
                Ok(Some(_)) => {
                    debug!(id = %transaction_id, "resend: transaction categorized; stopping");
                    break;
                }
                Ok(None) => {
                    warn!(id = %transaction_id, "resend: transaction no longer exists; stopping");
                    break;
                }
                Err(err) => {
                    warn!(id = %transaction_id, %err, "resend: store read failed; retrying next interval");
                }
            }
        }

        let mut state = self.state.lock().await;
        if state
            .resend
            .as_ref()
            .is_some_and(|task| task.transaction_id == transaction_id)
        {
            state.resend = None;
        }
    }
}
