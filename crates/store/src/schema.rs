use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Direction of a balance change, derived from the sign of the amount.
///
/// Zero counts as an increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn of(amount: f64) -> Self {
        if amount < 0.0 {
            Self::Decrease
        } else {
            Self::Increase
        }
    }

    /// Word used in chat messages.
    pub fn word(self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
        }
    }

    pub fn from_word(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "increase" => Some(Self::Increase),
            "decrease" => Some(Self::Decrease),
            _ => None,
        }
    }

    /// Re-apply this direction to an absolute amount.
    pub fn signed(self, magnitude: f64) -> f64 {
        match self {
            Self::Increase => magnitude.abs(),
            Self::Decrease => -magnitude.abs(),
        }
    }
}

/// One ledger entry: a detected balance change awaiting or carrying a category.
///
/// `category` and `expense` are set together with `is_read`, never apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    pub raw_label: String,
    pub note: Option<String>,
    pub category: Option<String>,
    /// The user's free-text detail supplied with the category.
    pub expense: Option<String>,
    pub is_read: bool,
    /// Time of the underlying bank event, not of ingestion.
    pub created_at: DateTime<Utc>,
    /// Calendar month (1–12) of `created_at` in the bot's timezone.
    pub month: u32,
}

impl Transaction {
    /// Build a fresh, uncategorized transaction.  The month bucket is derived
    /// from `created_at` as seen in `tz`.
    pub fn unread(
        id: impl Into<String>,
        amount: f64,
        raw_label: impl Into<String>,
        note: Option<String>,
        created_at: DateTime<Utc>,
        tz: Tz,
    ) -> Self {
        Self {
            id: id.into(),
            amount,
            raw_label: raw_label.into(),
            note: note
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            category: None,
            expense: None,
            is_read: false,
            created_at,
            month: month_of(created_at, tz),
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.amount)
    }
}

/// Calendar month of `at` in `tz`.
pub fn month_of(at: DateTime<Utc>, tz: Tz) -> u32 {
    at.with_timezone(&tz).month()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn direction_follows_amount_sign() {
        assert_eq!(Direction::of(-50_000.0), Direction::Decrease);
        assert_eq!(Direction::of(120_000.0), Direction::Increase);
        assert_eq!(Direction::of(0.0), Direction::Increase);
    }

    #[test]
    fn direction_words_parse_back() {
        for dir in [Direction::Increase, Direction::Decrease] {
            assert_eq!(Direction::from_word(dir.word()), Some(dir));
        }
        assert_eq!(Direction::from_word(" Decrease "), Some(Direction::Decrease));
        assert_eq!(Direction::from_word("sideways"), None);
    }

    #[test]
    fn signed_restores_sign() {
        assert_eq!(Direction::Decrease.signed(50_000.0), -50_000.0);
        assert_eq!(Direction::Increase.signed(-7.0), 7.0);
    }

    #[test]
    fn month_is_derived_in_configured_timezone() {
        // 2025-05-31 20:00 UTC is already June 1st in Ho Chi Minh City (UTC+7).
        let at = Utc.with_ymd_and_hms(2025, 5, 31, 20, 0, 0).unwrap();
        let utc = Transaction::unread("a", -1.0, "alert", None, at, chrono_tz::UTC);
        let hcm = Transaction::unread("a", -1.0, "alert", None, at, chrono_tz::Asia::Ho_Chi_Minh);
        assert_eq!(utc.month, 5);
        assert_eq!(hcm.month, 6);
    }

    #[test]
    fn blank_note_is_treated_as_absent() {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let tx = Transaction::unread("a", -1.0, "alert", Some("  ".into()), at, chrono_tz::UTC);
        assert_eq!(tx.note, None);
        assert!(!tx.is_read);
        assert!(tx.category.is_none());
    }
}
