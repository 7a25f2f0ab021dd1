//! Ingestion adapters.
//!
//! Mail fetching and alert parsing live outside the bot.  An ingestion
//! source only has to hand over candidate transactions as JSON Lines:
//!
//! ```text
//! {"id":"18f3a","amount":-50000,"raw_label":"Balance alert","note":"coffee","created_at":"2025-05-02T08:30:00+07:00"}
//! ```
//!
//! Every candidate is inserted with `insert_if_absent`, so re-delivering
//! the same alert is harmless.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use spendbot_config::AppConfig;
use spendbot_store::{StoreError, Transaction, TransactionStore};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ingestion command timed out after {0:?}")]
    Timeout(Duration),

    #[error("ingestion command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub fetched: usize,
    pub inserted: usize,
}

/// Produces candidate transactions from somewhere outside the bot.
#[async_trait]
pub trait IngestionSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<Transaction>, IngestError>;
}

#[derive(Debug, Deserialize)]
struct CandidateLine {
    id: String,
    amount: f64,
    #[serde(default)]
    raw_label: String,
    #[serde(default)]
    note: Option<String>,
    created_at: DateTime<Utc>,
}

/// Parse JSON Lines into unread transactions.  Blank lines are ignored;
/// malformed lines are logged and skipped.
pub fn parse_candidates(text: &str, tz: Tz) -> Vec<Transaction> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str::<CandidateLine>(line) {
            Ok(c) if c.id.trim().is_empty() => {
                warn!(line = idx + 1, "ingest: candidate without id skipped");
                None
            }
            Ok(c) => Some(Transaction::unread(
                c.id.trim(),
                c.amount,
                c.raw_label,
                c.note,
                c.created_at,
                tz,
            )),
            Err(err) => {
                warn!(line = idx + 1, %err, "ingest: malformed candidate skipped");
                None
            }
        })
        .collect()
}

/// Runs an external program and reads candidates from its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    tz: Tz,
}

impl CommandSource {
    pub fn new(argv: &[String], timeout: Duration, tz: Tz) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            tz,
        })
    }

    /// `None` when no ingestion command is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        if !config.ingestion_enabled() {
            return None;
        }
        Self::new(
            &config.ingestion.command,
            Duration::from_secs(config.ingestion.timeout_secs),
            config.timezone(),
        )
    }
}

#[async_trait]
impl IngestionSource for CommandSource {
    fn name(&self) -> &str {
        &self.program
    }

    async fn fetch(&self) -> Result<Vec<Transaction>, IngestError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| IngestError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(IngestError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_candidates(&String::from_utf8_lossy(&output.stdout), self.tz))
    }
}

/// Reads candidates from a JSON Lines file.
#[derive(Debug, Clone)]
pub struct JsonLinesFile {
    path: PathBuf,
    label: String,
    tz: Tz,
}

impl JsonLinesFile {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self { path, label, tz }
    }
}

#[async_trait]
impl IngestionSource for JsonLinesFile {
    fn name(&self) -> &str {
        &self.label
    }

    async fn fetch(&self) -> Result<Vec<Transaction>, IngestError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(parse_candidates(&raw, self.tz))
    }
}

pub async fn run_ingestion_cycle(
    source: &dyn IngestionSource,
    store: &dyn TransactionStore,
) -> Result<IngestSummary, IngestError> {
    let candidates = source.fetch().await?;
    let mut summary = IngestSummary {
        fetched: candidates.len(),
        inserted: 0,
    };
    for tx in &candidates {
        if store.insert_if_absent(tx).await? {
            summary.inserted += 1;
        }
    }
    info!(
        source = source.name(),
        fetched = summary.fetched,
        inserted = summary.inserted,
        "ingestion cycle complete"
    );
    Ok(summary)
}

/// Run an ingestion cycle every `interval` until shutdown.  Failures are
/// logged; the next cycle retries.
pub async fn run_ingestion_loop(
    source: Arc<dyn IngestionSource>,
    store: Arc<dyn TransactionStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(source = source.name(), ?interval, "ingestion loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_ingestion_cycle(source.as_ref(), store.as_ref()).await {
                    warn!(source = source.name(), %err, "ingestion cycle failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("ingestion loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    const LINES: &str = r#"
{"id":"a1","amount":-50000,"raw_label":"Balance alert","note":"coffee","created_at":"2025-05-02T08:30:00+07:00"}
not json at all
{"id":"a2","amount":1200000,"created_at":"2025-05-03T01:00:00Z"}
{"id":"  ","amount":1,"created_at":"2025-05-03T01:00:00Z"}
"#;

    #[test]
    fn parses_valid_lines_and_skips_the_rest() {
        let txs = parse_candidates(LINES, chrono_tz::UTC);
        assert_eq!(txs.len(), 2);

        assert_eq!(txs[0].id, "a1");
        assert_eq!(txs[0].amount, -50_000.0);
        assert_eq!(txs[0].note.as_deref(), Some("coffee"));
        assert_eq!(txs[0].month, 5);
        assert!(!txs[0].is_read);

        assert_eq!(txs[1].id, "a2");
        assert_eq!(txs[1].raw_label, "");
        assert_eq!(txs[1].note, None);
    }

    #[tokio::test]
    async fn cycle_inserts_each_id_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        std::fs::write(&path, LINES).unwrap();

        let source = JsonLinesFile::new(&path, chrono_tz::UTC);
        let store = MemoryStore::default();

        let first = run_ingestion_cycle(&source, &store).await.unwrap();
        assert_eq!(first, IngestSummary { fetched: 2, inserted: 2 });

        let second = run_ingestion_cycle(&source, &store).await.unwrap();
        assert_eq!(second, IngestSummary { fetched: 2, inserted: 0 });
        assert_eq!(store.count_unread().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let source = JsonLinesFile::new("/definitely/not/here.jsonl", chrono_tz::UTC);
        let store = MemoryStore::default();
        assert!(matches!(
            run_ingestion_cycle(&source, &store).await,
            Err(IngestError::Io(_))
        ));
    }

    #[test]
    fn empty_command_disables_command_source() {
        assert!(CommandSource::new(&[], Duration::from_secs(1), chrono_tz::UTC).is_none());
        let mut cfg = AppConfig::default();
        assert!(CommandSource::from_config(&cfg).is_none());

        cfg.ingestion.command = vec!["  ".to_string()];
        assert!(CommandSource::from_config(&cfg).is_none());

        cfg.ingestion.command = vec!["./fetch.sh".to_string(), "--since".to_string()];
        let source = CommandSource::from_config(&cfg).unwrap();
        assert_eq!(source.name(), "./fetch.sh");
        assert_eq!(source.args, vec!["--since".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_source_reads_stdout() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '{"id":"c1","amount":-1000,"note":"bus","created_at":"2025-05-02T08:30:00Z"}'"#
                .to_string(),
        ];
        let source = CommandSource::new(&argv, Duration::from_secs(10), chrono_tz::UTC).unwrap();
        let txs = source.fetch().await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, "c1");
        assert_eq!(txs[0].note.as_deref(), Some("bus"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_source_reports_failure_status() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let source = CommandSource::new(&argv, Duration::from_secs(10), chrono_tz::UTC).unwrap();
        match source.fetch().await {
            Err(IngestError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_source_times_out() {
        let argv = vec!["sleep".to_string(), "5".to_string()];
        let source =
            CommandSource::new(&argv, Duration::from_millis(100), chrono_tz::UTC).unwrap();
        assert!(matches!(source.fetch().await, Err(IngestError::Timeout(_))));
    }
}
