use thiserror::Error;

use spendbot_store::StoreError;

/// Why a categorization reply was not applied.  None of these leave
/// partial state behind.
#[derive(Debug, Error)]
pub enum CategorizeError {
    /// The reply does not follow `CATEGORY - detail`.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// No pending transaction matches the reply.
    #[error("no matching pending transaction")]
    TransactionNotFound,

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl CategorizeError {
    /// Text shown to the user in chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::MalformedReply(_) => format!(
                "Wrong format.\n{}",
                crate::reply::REPLY_HINT
            ),
            Self::TransactionNotFound => {
                "No pending transaction matches this reply. It may already be categorized; \
                 use /pending to see what is left."
                    .to_string()
            }
            Self::StoreUnavailable(_) => {
                "Could not save right now. Please try again in a moment.".to_string()
            }
        }
    }
}
