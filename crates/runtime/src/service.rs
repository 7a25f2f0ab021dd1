//! Bot service: wires the store, scheduler, categorization handler and
//! ingestion source together and owns their background tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use spendbot_config::{AppConfig, ReplyStrategy};
use spendbot_store::schema::month_of;
use spendbot_store::{SqliteStore, StoreError, Transaction, TransactionStore};

use crate::categorize::{CategorizationHandler, CategorizationReceipt, ReplyTarget};
use crate::error::CategorizeError;
use crate::ingest::{
    CommandSource, IngestError, IngestSummary, IngestionSource, run_ingestion_cycle,
    run_ingestion_loop,
};
use crate::scheduler::{NotificationScheduler, NotificationSettings};
use crate::transport::ChatTransport;

#[derive(Debug, Clone)]
pub struct BotStatus {
    pub pending: Option<Transaction>,
    pub awaiting_reply: bool,
    pub resend_active: bool,
    pub unread: u64,
    pub ingestion_enabled: bool,
}

/// Sum of categorized outflows in one month bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outlay {
    pub month: u32,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetReport {
    /// `None` when ingestion is disabled or the cycle failed.
    pub ingested: Option<IngestSummary>,
    pub unread: u64,
}

/// Parse a user-supplied month number; only 1 to 12 is accepted.
pub fn parse_month(arg: &str) -> Option<u32> {
    arg.trim()
        .parse::<u32>()
        .ok()
        .filter(|m| (1..=12).contains(m))
}

#[derive(Clone)]
pub struct BotService {
    config: AppConfig,
    store: Arc<dyn TransactionStore>,
    scheduler: NotificationScheduler,
    handler: CategorizationHandler,
    source: Option<Arc<dyn IngestionSource>>,
}

impl BotService {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn TransactionStore>,
        transport: Arc<dyn ChatTransport>,
        source: Option<Arc<dyn IngestionSource>>,
    ) -> Self {
        let scheduler = NotificationScheduler::new(
            store.clone(),
            transport,
            NotificationSettings::from_config(&config),
        );
        let handler = CategorizationHandler::new(store.clone(), scheduler.clone());
        Self {
            config,
            store,
            scheduler,
            handler,
            source,
        }
    }

    /// Open the SQLite ledger named in the config and the configured
    /// ingestion command, if any.
    pub fn open(config: AppConfig, transport: Arc<dyn ChatTransport>) -> Result<Self, StoreError> {
        let store = SqliteStore::open(
            &config.store.path,
            Duration::from_secs(config.store.op_timeout_secs),
        )?;
        info!(path = %config.store.path, "ledger opened");
        let source = CommandSource::from_config(&config)
            .map(|s| Arc::new(s) as Arc<dyn IngestionSource>);
        Ok(Self::new(config, Arc::new(store), transport, source))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    /// Start the scheduler loop and, when configured, the ingestion loop.
    /// Both stop when `shutdown` flips to `true`.
    pub fn spawn_background(&self, shutdown: &watch::Sender<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        let scheduler = self.scheduler.clone();
        let tick = self.config.tick_interval();
        let rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move { scheduler.run(tick, rx).await }));

        if let Some(source) = self.source.clone() {
            let store = self.store.clone();
            let every = Duration::from_secs(self.config.ingestion.interval_secs);
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                run_ingestion_loop(source, store, every, rx).await
            }));
        } else {
            info!("no ingestion command configured; scheduled ingestion disabled");
        }

        handles
    }

    /// Apply a chat reply.  `quoted` is the text of the message it answers.
    pub async fn handle_reply(
        &self,
        reply_text: &str,
        quoted: Option<&str>,
    ) -> Result<CategorizationReceipt, CategorizeError> {
        let target = match (self.config.telegram.reply_strategy, quoted) {
            (ReplyStrategy::Content, Some(text)) => ReplyTarget::Notification(text.to_string()),
            _ => ReplyTarget::Session,
        };
        self.handler.handle_reply(reply_text, target).await
    }

    pub async fn status(&self) -> Result<BotStatus, StoreError> {
        let snapshot = self.scheduler.snapshot().await;
        Ok(BotStatus {
            pending: snapshot.transaction,
            awaiting_reply: snapshot.awaiting_reply,
            resend_active: snapshot.resend_active,
            unread: self.store.count_unread().await?,
            ingestion_enabled: self.source.is_some(),
        })
    }

    pub async fn pending(&self, limit: usize) -> Result<Vec<Transaction>, StoreError> {
        self.store.list_unread(limit).await
    }

    pub fn current_month(&self) -> u32 {
        month_of(Utc::now(), self.config.timezone())
    }

    /// Outflow total for `month`, defaulting to the current month.
    pub async fn outlay(&self, month: Option<u32>) -> Result<Outlay, StoreError> {
        let month = month.unwrap_or_else(|| self.current_month());
        let total = self.store.sum_read_amount_for_month(month, true).await?;
        Ok(Outlay { month, total })
    }

    /// Run one ingestion cycle now.  `Ok(None)` when no source is configured.
    pub async fn ingest_once(&self) -> Result<Option<IngestSummary>, IngestError> {
        match &self.source {
            Some(source) => run_ingestion_cycle(source.as_ref(), self.store.as_ref())
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Pull fresh transactions, then drop the pending notification so the
    /// next tick re-evaluates from scratch.
    pub async fn reset(&self) -> Result<ResetReport, StoreError> {
        let ingested = match self.ingest_once().await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(%err, "reset: ingestion failed; continuing");
                None
            }
        };
        self.scheduler.reset().await;
        Ok(ResetReport {
            ingested,
            unread: self.store.count_unread().await?,
        })
    }
}
