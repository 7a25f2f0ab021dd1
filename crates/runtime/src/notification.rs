//! Notification message rendering and recovery.
//!
//! Every notification ends with a `ref: <id>` line so a quoted reply can be
//! tied back to its transaction without guessing.  Messages that lost the
//! line (edited, or sent by an older build) still carry the direction word,
//! amount and note, which are enough to look the transaction up.

use std::sync::OnceLock;

use regex::Regex;

use spendbot_store::{Direction, Transaction};

const NO_NOTE: &str = "(none)";

/// What can be recovered from the text of a sent notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNotification {
    pub reference: Option<String>,
    /// Signed amount: the direction word decides the sign.
    pub amount: f64,
    pub note: Option<String>,
}

/// Absolute value rounded to whole units with `,` thousands separators.
pub fn format_amount(amount: f64) -> String {
    let whole = format!("{:.0}", amount.abs());
    let mut with_commas = String::new();
    for (i, c) in whole.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    with_commas.chars().rev().collect()
}

/// Signed variant of [`format_amount`] for totals.
pub fn format_signed_amount(amount: f64) -> String {
    if amount < 0.0 && format_amount(amount) != "0" {
        format!("-{}", format_amount(amount))
    } else {
        format_amount(amount)
    }
}

pub fn render_notification(tx: &Transaction, user_name: &str, currency: &str) -> String {
    let direction = tx.direction();
    let article = match direction {
        Direction::Increase => "an",
        Direction::Decrease => "a",
    };
    let note = tx
        .note
        .as_deref()
        .map(|n| n.replace('\n', " "))
        .unwrap_or_else(|| NO_NOTE.to_string());

    let mut lines = Vec::with_capacity(5);
    if !user_name.trim().is_empty() {
        lines.push(format!("Hi {}", user_name.trim()));
    }
    lines.push(format!(
        "Your account saw {article} {} of {} {currency}",
        direction.word(),
        format_amount(tx.amount),
    ));
    lines.push(format!("Note: {note}"));
    lines.push("Reply to this message with CATEGORY - detail".to_string());
    lines.push(format!("ref: {}", tx.id));
    lines.join("\n")
}

fn amount_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^Your account saw an? (increase|decrease) of ([\d,]+)\b").ok())
        .as_ref()
}

fn note_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^Note: (.*?)\s*$").ok()).as_ref()
}

fn reference_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^ref: (\S+)\s*$").ok()).as_ref()
}

/// Recover the transaction reference from a notification's text.  Returns
/// `None` when the text is not a notification.
pub fn parse_notification(text: &str) -> Option<ParsedNotification> {
    let caps = amount_pattern()?.captures(text)?;
    let direction = Direction::from_word(&caps[1])?;
    let magnitude: f64 = caps[2].replace(',', "").parse().ok()?;

    let note = note_pattern()?
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|n| !n.is_empty() && n != NO_NOTE);

    let reference = reference_pattern()?
        .captures(text)
        .map(|c| c[1].to_string());

    Some(ParsedNotification {
        reference,
        amount: direction.signed(magnitude),
        note,
    })
}
