pub mod categorize;
pub mod error;
pub mod ingest;
pub mod notification;
pub mod reply;
pub mod scheduler;
mod service;
pub mod transport;

#[cfg(test)]
mod testing;

pub use categorize::{CategorizationHandler, CategorizationReceipt, ReplyTarget};
pub use error::CategorizeError;
pub use ingest::{
    CommandSource, IngestError, IngestSummary, IngestionSource, JsonLinesFile, parse_candidates,
    run_ingestion_cycle,
};
pub use notification::{format_amount, format_signed_amount, parse_notification, render_notification};
pub use reply::{REPLY_HINT, parse_reply};
pub use scheduler::{NotificationScheduler, NotificationSettings, PendingSnapshot, TickOutcome};
pub use service::{BotService, BotStatus, Outlay, ResetReport, parse_month};
pub use transport::{ChatTransport, TransportError};
