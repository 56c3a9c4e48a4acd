//! Core error types.

use crate::models::CardId;
use thiserror::Error;

/// Errors raised by the scheduling and grading core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A card whose content cannot be graded.
    #[error("Malformed card {card_id}: {reason}")]
    MalformedCard { card_id: CardId, reason: String },

    /// A language tag other than `latin` or `german`.
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    /// A card, group or phrase that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A shelf outside `MIN_SHELF..=MAX_SHELF`.
    #[error("Invalid shelf: {0}")]
    InvalidShelf(i64),

    /// A date that is not in `YYYY-MM-DD` form.
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Failure reported by the storage collaborator.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Reading answers from the user failed.
    #[error("Input error: {0}")]
    Input(#[from] std::io::Error),
}

impl CoreError {
    /// Build a malformed-card error.
    pub fn malformed(card_id: CardId, reason: impl Into<String>) -> Self {
        Self::MalformedCard {
            card_id,
            reason: reason.into(),
        }
    }

    /// Whether the error only invalidates the card being handled.
    ///
    /// Session loops skip such cards and keep going; everything else aborts
    /// the session after the already committed updates.
    pub fn is_card_local(&self) -> bool {
        matches!(
            self,
            Self::MalformedCard { .. } | Self::UnknownLanguage(_) | Self::InvalidShelf(_) | Self::InvalidDate(_)
        )
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
