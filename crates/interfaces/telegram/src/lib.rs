use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use spendbot_config::AppConfig;
use spendbot_runtime::{
    BotService, ChatTransport, REPLY_HINT, TransportError, format_amount, format_signed_amount,
    parse_month,
};

/// Telegram rejects messages above 4096 characters; stay well below.
const MAX_MESSAGE_CHARS: usize = 3500;
const PENDING_LIST_LIMIT: usize = 20;

/// Thin client over the Bot API methods the bot needs.
pub struct TelegramApi {
    client: Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramApi {
    /// Build from `TELEGRAM_BOT_TOKEN` and the `[telegram]` timeouts.
    pub fn from_env(config: &AppConfig) -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN is not set"))?;
        if token.trim().is_empty() {
            bail!("TELEGRAM_BOT_TOKEN is empty");
        }
        Self::new(
            token.trim(),
            Duration::from_secs(config.telegram.request_timeout_secs),
            config.telegram.poll_timeout_secs,
        )
    }

    pub fn new(token: &str, request_timeout: Duration, poll_timeout_secs: u64) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{token}"),
            poll_timeout_secs,
        })
    }

    async fn fetch_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>> {
        let url = format!("{}/getUpdates", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("timeout", self.poll_timeout_secs.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let payload: TelegramResponse<Vec<TelegramUpdate>> = response.json().await?;
        if !payload.ok {
            let description = payload
                .description
                .unwrap_or_else(|| "telegram getUpdates failed".to_string());
            bail!(description);
        }

        Ok(payload.result.unwrap_or_default())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let url = format!("{}/sendMessage", self.base_url);
        let body = SendMessageRequest {
            chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let payload: TelegramResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !payload.ok {
            return Err(TransportError::Api(
                payload
                    .description
                    .unwrap_or_else(|| "telegram sendMessage failed".to_string()),
            ));
        }
        Ok(())
    }

    async fn send_chunked(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        for chunk in chunk_message(text, MAX_MESSAGE_CHARS) {
            self.send_message(chat_id, &chunk).await?;
        }
        Ok(())
    }
}

/// Delivers scheduler notifications to the configured chat.
pub struct TelegramTransport {
    api: Arc<TelegramApi>,
    chat_id: i64,
}

impl TelegramTransport {
    pub fn new(api: Arc<TelegramApi>, chat_id: i64) -> Self {
        Self { api, chat_id }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, text: &str) -> Result<(), TransportError> {
        self.api.send_chunked(self.chat_id, text).await
    }
}

/// Long-poll for updates from the configured chat until shutdown.
pub async fn run_bot(
    service: BotService,
    api: Arc<TelegramApi>,
    chat_id: i64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut offset: i64 = 0;
    info!(chat_id, "telegram polling started");

    loop {
        let updates = tokio::select! {
            res = api.fetch_updates(offset) => res,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let updates = match updates {
            Ok(u) => u,
            Err(err) => {
                let backoff = if is_conflict(&err) {
                    warn!("telegram 409 Conflict: another bot instance is polling; waiting 15s");
                    Duration::from_secs(15)
                } else {
                    warn!(%err, "telegram getUpdates failed; retrying in 5s");
                    Duration::from_secs(5)
                };
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        for update in updates {
            offset = update.update_id + 1;

            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id != chat_id {
                debug!(from = message.chat.id, "ignoring message from another chat");
                continue;
            }
            let Some(text) = message.text.as_deref() else {
                continue;
            };
            let quoted = message
                .reply_to_message
                .as_deref()
                .and_then(|m| m.text.as_deref());

            let response = handle_telegram_input(&service, text, quoted).await;
            if let Err(err) = api.send_chunked(chat_id, &response).await {
                warn!(%err, "telegram sendMessage failed");
            }
        }
    }

    info!("telegram polling stopped");
    Ok(())
}

fn is_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .and_then(reqwest::Error::status)
        == Some(StatusCode::CONFLICT)
}

async fn handle_telegram_input(service: &BotService, text: &str, quoted: Option<&str>) -> String {
    let line = normalize_telegram_command(text);
    if line.starts_with('/') {
        return handle_command(service, &line).await;
    }

    if quoted.is_none() {
        return format!("Reply to a transaction notification to categorize it.\n{REPLY_HINT}");
    }

    let currency = &service.config().bot.currency;
    match service.handle_reply(&line, quoted).await {
        Ok(receipt) => format!(
            "Saved: {} - {}\nMonth {} total: {} {currency}",
            receipt.category,
            receipt.detail,
            receipt.month,
            format_signed_amount(receipt.month_total),
        ),
        Err(err) => {
            debug!(%err, "reply not applied");
            err.user_message()
        }
    }
}

async fn handle_command(service: &BotService, line: &str) -> String {
    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    let currency = &service.config().bot.currency;

    match command {
        "/start" | "/help" => [
            "/status - what the bot is waiting for",
            "/pending - transactions not yet categorized",
            "/outlay [month] - spending for a month (1-12)",
            "/reset - fetch new transactions and restart reminders",
            "",
            "Reply to a notification to categorize it.",
            REPLY_HINT,
        ]
        .join("\n"),

        "/status" => match service.status().await {
            Ok(status) => {
                let pending = match &status.pending {
                    Some(tx) => format!(
                        "{} ({} {} {currency})",
                        tx.id,
                        tx.direction().word(),
                        format_amount(tx.amount)
                    ),
                    None => "none".to_string(),
                };
                [
                    format!("pending: {pending}"),
                    format!("awaiting reply: {}", yes_no(status.awaiting_reply)),
                    format!("resending: {}", yes_no(status.resend_active)),
                    format!("unread: {}", status.unread),
                    format!("ingestion: {}", if status.ingestion_enabled { "on" } else { "off" }),
                ]
                .join("\n")
            }
            Err(err) => store_failure(&err),
        },

        "/pending" => match service.pending(PENDING_LIST_LIMIT).await {
            Ok(rows) if rows.is_empty() => "Nothing left to categorize.".to_string(),
            Ok(rows) => {
                let mut lines: Vec<String> = rows
                    .iter()
                    .map(|tx| {
                        format!(
                            "- {} {} {} {currency} | {}",
                            tx.created_at.format("%Y-%m-%d %H:%M"),
                            tx.direction().word(),
                            format_amount(tx.amount),
                            tx.note.as_deref().unwrap_or("(none)"),
                        )
                    })
                    .collect();
                lines.push(String::new());
                lines.push(REPLY_HINT.to_string());
                lines.join("\n")
            }
            Err(err) => store_failure(&err),
        },

        "/outlay" => {
            let month = if arg.is_empty() {
                None
            } else {
                match parse_month(arg) {
                    Some(m) => Some(m),
                    None => return "Month must be a number from 1 to 12.".to_string(),
                }
            };
            match service.outlay(month).await {
                Ok(outlay) => format!(
                    "Spent in month {}: {} {currency}",
                    outlay.month,
                    format_amount(outlay.total)
                ),
                Err(err) => store_failure(&err),
            }
        }

        "/reset" => match service.reset().await {
            Ok(report) => {
                let ingested = match report.ingested {
                    Some(s) => format!("fetched {}, new {}", s.fetched, s.inserted),
                    None => "skipped".to_string(),
                };
                format!(
                    "Reminders reset.\ningestion: {ingested}\nunread: {}",
                    report.unread
                )
            }
            Err(err) => store_failure(&err),
        },

        _ => "Unknown command. Send /help for the list.".to_string(),
    }
}

fn store_failure(err: &spendbot_store::StoreError) -> String {
    warn!(%err, "command failed on store access");
    "The ledger is unavailable right now. Please try again shortly.".to_string()
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn normalize_telegram_command(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return trimmed.to_string();
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    let command = command
        .split_once('@')
        .map(|(base, _)| base)
        .unwrap_or(command);

    if rest.is_empty() {
        command.to_string()
    } else {
        format!("{command} {rest}")
    }
}

fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count() + 1;
        if current_len > 0 && current_len + line_len > max_chars {
            chunks.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_len += line_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim_end().to_string());
    }

    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    text: Option<String>,
    #[serde(default)]
    reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}
