//! Grammar of a categorization reply: `CATEGORY - detail`.

use crate::error::CategorizeError;

pub const SEPARATOR: char = '-';

/// Reply usage hint shown to the user.
pub const REPLY_HINT: &str = "Reply with: CATEGORY - detail\nExample: SHOPPING - new shoes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryReply {
    /// Upper-cased.
    pub category: String,
    /// Trimmed, case preserved.
    pub detail: String,
}

/// Split on the first separator; both halves must be non-empty once trimmed.
pub fn parse_reply(text: &str) -> Result<CategoryReply, CategorizeError> {
    let Some((category, detail)) = text.split_once(SEPARATOR) else {
        return Err(CategorizeError::MalformedReply(format!(
            "missing `{SEPARATOR}` separator"
        )));
    };

    let category = category.trim();
    let detail = detail.trim();
    if category.is_empty() || detail.is_empty() {
        return Err(CategorizeError::MalformedReply(
            "category and detail must both be present".to_string(),
        ));
    }

    Ok(CategoryReply {
        category: category.to_uppercase(),
        detail: detail.to_string(),
    })
}
