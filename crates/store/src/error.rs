use thiserror::Error;

use crate::db::Column;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DbError {
    /// The storage engine failed in a way that risks inconsistent state.
    #[error("fatal storage error: {0}")]
    Fatal(String),
    #[error("corrupt record in {column:?}: {reason}")]
    Corrupt { column: Column, reason: String },
    #[error("transaction already precommitted")]
    AlreadyPrecommitted,
    #[error("transaction not precommitted")]
    NotPrecommitted,
}

impl DbError {
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Corrupt { .. })
    }

    pub fn corrupt(column: Column, reason: impl ToString) -> Self {
        Self::Corrupt {
            column,
            reason: reason.to_string(),
        }
    }
}

/// Whether `err` carries a [`DbError`] that must abort block execution.
#[must_use]
pub fn is_fatal_db_error(err: &eyre::Report) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<DbError>())
        .any(DbError::is_fatal)
}
