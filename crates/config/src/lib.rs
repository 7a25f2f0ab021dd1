use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ── Reply strategy ────────────────────────────────────────────────────────────

/// Controls how a chat reply is matched to the transaction it categorizes.
///
/// | Strategy  | Behaviour                                                        |
/// |-----------|------------------------------------------------------------------|
/// | `session` | The reply always resolves the transaction currently being reminded about. |
/// | `content` | The reply is matched through the notification text it quotes.    |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStrategy {
    Session,
    #[default]
    Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Name used in the greeting line of notifications.  Empty disables the greeting.
    pub user_name: String,
    pub currency: String,
    /// IANA timezone name (e.g. `"Asia/Ho_Chi_Minh"`).  Used to derive the
    /// month bucket of a transaction and the "current month" of chat queries.
    /// Falls back to UTC when the name is unrecognised.
    pub timezone: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            currency: "VND".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// The single chat that receives notifications.  `0` means unset; the
    /// `TELEGRAM_CHAT_ID` environment variable takes precedence.
    pub chat_id: i64,
    pub reply_strategy: ReplyStrategy,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
    /// HTTP client timeout.  Must exceed `poll_timeout_secs`.
    pub request_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            chat_id: 0,
            reply_strategy: ReplyStrategy::Content,
            poll_timeout_secs: 25,
            request_timeout_secs: 35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the scheduler looks for a new unread transaction.
    pub tick_interval_secs: u64,
    /// How long an outstanding notification waits before it is sent again.
    pub resend_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 15,
            resend_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Program (argv) that prints new transactions as JSON Lines on stdout.
    /// Empty disables scheduled ingestion.
    pub command: Vec<String>,
    pub interval_secs: u64,
    /// The command is killed when it runs longer than this.
    pub timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            command: vec![],
            interval_secs: 60 * 60,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path.  Overridden by `SPENDBOT_DB_PATH`.
    pub path: String,
    /// Upper bound on a single store operation.
    pub op_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".spendbot/ledger.db".to_string(),
            op_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Directory for the daily rolling log file.  Empty disables file logging.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: ".spendbot/logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Holds the pid file and the single-instance lock.
    pub runtime_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_dir: ".spendbot/runtime".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub telegram: TelegramConfig,
    pub scheduler: SchedulerConfig,
    pub ingestion: IngestionConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `TELEGRAM_CHAT_ID`, `SPENDBOT_DB_PATH` and `SPENDBOT_LOG_LEVEL`
    /// as looked up through `get`.  Empty values are ignored.
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = lookup("TELEGRAM_CHAT_ID") {
            let value = value.trim();
            self.telegram.chat_id = value
                .parse()
                .map_err(|_| anyhow::anyhow!("TELEGRAM_CHAT_ID is not a number: {value}"))?;
        }
        if let Some(value) = lookup("SPENDBOT_DB_PATH") {
            self.store.path = value;
        }
        if let Some(value) = lookup("SPENDBOT_LOG_LEVEL") {
            self.telemetry.log_level = value;
        }
        Ok(())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Reject settings the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_interval_secs == 0 {
            bail!("scheduler.tick_interval_secs must be greater than zero");
        }
        if self.scheduler.resend_interval_secs == 0 {
            bail!("scheduler.resend_interval_secs must be greater than zero");
        }
        if self.ingestion.interval_secs == 0 {
            bail!("ingestion.interval_secs must be greater than zero");
        }
        if self.store.op_timeout_secs == 0 {
            bail!("store.op_timeout_secs must be greater than zero");
        }
        if self.bot.currency.trim().is_empty() {
            bail!("bot.currency must not be empty");
        }
        if self.telegram.request_timeout_secs <= self.telegram.poll_timeout_secs {
            bail!("telegram.request_timeout_secs must exceed telegram.poll_timeout_secs");
        }
        Ok(())
    }

    pub fn timezone(&self) -> Tz {
        self.bot.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(tz = %self.bot.timezone, "unrecognised timezone; falling back to UTC");
            chrono_tz::UTC
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.resend_interval_secs)
    }

    pub fn ingestion_enabled(&self) -> bool {
        self.ingestion
            .command
            .first()
            .is_some_and(|program| !program.trim().is_empty())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ── Defaults ───────────────────────────────────────────────────────────

    #[test]
    fn scheduler_defaults_match_fifteen_second_cadence() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduler.tick_interval_secs, 15);
        assert_eq!(cfg.scheduler.resend_interval_secs, 15);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(15));
        assert_eq!(cfg.resend_interval(), Duration::from_secs(15));
    }

    #[test]
    fn cosmetic_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.bot.currency, "VND");
        assert_eq!(cfg.bot.timezone, "UTC");
        assert!(cfg.bot.user_name.is_empty());
        assert_eq!(cfg.telegram.chat_id, 0);
        assert_eq!(cfg.telegram.reply_strategy, ReplyStrategy::Content);
        assert_eq!(cfg.ingestion.interval_secs, 3600);
        assert!(!cfg.ingestion_enabled());
        assert_eq!(cfg.store.path, ".spendbot/ledger.db");
        assert_eq!(cfg.telemetry.log_level, "info");
        assert_eq!(cfg.runtime.runtime_dir, ".spendbot/runtime");
    }

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.bot.currency, "VND");
        assert_eq!(cfg.scheduler.tick_interval_secs, 15);
    }

    #[test]
    fn load_from_valid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.toml");
        fs::write(
            &path,
            r#"
[bot]
user_name = "Dang"
currency = "USD"
timezone = "Asia/Ho_Chi_Minh"

[telegram]
chat_id = 7408813563
reply_strategy = "session"

[scheduler]
tick_interval_secs = 30

[ingestion]
command = ["python", "fetch_alerts.py"]
interval_secs = 1800
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.bot.user_name, "Dang");
        assert_eq!(cfg.bot.currency, "USD");
        assert_eq!(cfg.timezone(), chrono_tz::Asia::Ho_Chi_Minh);
        assert_eq!(cfg.telegram.chat_id, 7408813563);
        assert_eq!(cfg.telegram.reply_strategy, ReplyStrategy::Session);
        assert_eq!(cfg.scheduler.tick_interval_secs, 30);
        // Unspecified keys inside a present section keep their defaults.
        assert_eq!(cfg.scheduler.resend_interval_secs, 15);
        assert!(cfg.ingestion_enabled());
        assert_eq!(cfg.ingestion.command, vec!["python", "fetch_alerts.py"]);
        assert_eq!(cfg.ingestion.interval_secs, 1800);
        assert_eq!(cfg.store.op_timeout_secs, 15);
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn unknown_reply_strategy_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strategy.toml");
        fs::write(&path, "[telegram]\nreply_strategy = \"psychic\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.bot.user_name = "RoundTrip".to_string();
        cfg.telegram.reply_strategy = ReplyStrategy::Session;
        cfg.ingestion.command = vec!["./fetch.sh".to_string()];
        cfg.store.path = "/var/lib/spendbot/ledger.db".to_string();

        cfg.save_to(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.bot.user_name, "RoundTrip");
        assert_eq!(loaded.telegram.reply_strategy, ReplyStrategy::Session);
        assert_eq!(loaded.ingestion.command, vec!["./fetch.sh".to_string()]);
        assert_eq!(loaded.store.path, "/var/lib/spendbot/ledger.db");
    }

    // ── validate ───────────────────────────────────────────────────────────

    #[test]
    fn validate_rejects_zero_intervals() {
        let mut cfg = AppConfig::default();
        cfg.scheduler.resend_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.scheduler.tick_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_request_timeout_shorter_than_long_poll() {
        let mut cfg = AppConfig::default();
        cfg.telegram.request_timeout_secs = 10;
        cfg.telegram.poll_timeout_secs = 25;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let mut cfg = AppConfig::default();
        cfg.bot.timezone = "Mars/Olympus_Mons".to_string();
        assert_eq!(cfg.timezone(), chrono_tz::UTC);
    }

    // ── ReplyStrategy serde ────────────────────────────────────────────────

    #[test]
    fn reply_strategy_serde_roundtrip() {
        for (strategy, label) in [
            (ReplyStrategy::Session, "\"session\""),
            (ReplyStrategy::Content, "\"content\""),
        ] {
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, label);
            let back: ReplyStrategy = serde_json::from_str(&json).unwrap();
            assert_eq!(back, strategy);
        }
    }

    // ── Env var overrides ──────────────────────────────────────────────────

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_chat_id_db_path_and_log_level() {
        let mut cfg = AppConfig::default();
        cfg.telegram.chat_id = 1;
        cfg.store.path = "from-file.db".to_string();

        cfg.apply_env_overrides(vars(&[
            ("TELEGRAM_CHAT_ID", " 42 "),
            ("SPENDBOT_DB_PATH", "from-env.db"),
            ("SPENDBOT_LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(cfg.telegram.chat_id, 42);
        assert_eq!(cfg.store.path, "from-env.db");
        assert_eq!(cfg.telemetry.log_level, "debug");
    }

    #[test]
    fn empty_env_values_keep_file_settings() {
        let mut cfg = AppConfig::default();
        cfg.telegram.chat_id = 7;
        cfg.apply_env_overrides(vars(&[("TELEGRAM_CHAT_ID", ""), ("SPENDBOT_DB_PATH", "  ")]))
            .unwrap();
        assert_eq!(cfg.telegram.chat_id, 7);
        assert_eq!(cfg.store.path, ".spendbot/ledger.db");
    }

    #[test]
    fn non_numeric_chat_id_is_rejected() {
        let mut cfg = AppConfig::default();
        assert!(
            cfg.apply_env_overrides(vars(&[("TELEGRAM_CHAT_ID", "@me")]))
                .is_err()
        );
    }
}
