//! Error taxonomy for the engine.
//!
//! Gate refusals (`InvalidTransition`, `InvalidState`, `Unauthorized`) are
//! expected outcomes the caller presents to the operator; `Conflict` means a
//! concurrent writer won and the read-check-write should be retried;
//! `Storage` wraps everything below sqlx.

use std::fmt;

use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active session")]
    Unauthenticated,

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("illegal transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("concurrent update on {entity} id {id}")]
    Conflict { entity: &'static str, id: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        EngineError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        EngineError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation {
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        EngineError::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Conflicts are safe to retry by re-reading; everything else is a
    /// terminal answer for the attempted action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    /// Generated numbers are sequenced by counting inside the transaction,
    /// so two concurrent writers can draw the same slot and the loser's
    /// insert trips the UNIQUE constraint. That is a retryable conflict,
    /// not a storage fault. `id` is the contended parent row, or 0 when the
    /// new row has no parent.
    pub(crate) fn unique_conflict(entity: &'static str, id: i64, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                EngineError::Conflict { entity, id }
            }
            _ => EngineError::Storage(err),
        }
    }
}

/// A stored enum tag that no current variant matches. Surfaces through the
/// decode path so a corrupted row reads as a storage error, not a panic.
#[derive(Debug, Error)]
#[error("unknown {kind} tag: {value:?}")]
pub struct UnknownTag {
    pub kind: &'static str,
    pub value: String,
}

impl From<UnknownTag> for EngineError {
    fn from(err: UnknownTag) -> Self {
        EngineError::Storage(sqlx::Error::Decode(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(EngineError::Conflict {
            entity: "work_orders",
            id: 1
        }
        .is_retryable());
        assert!(!EngineError::Unauthenticated.is_retryable());
        assert!(!EngineError::invalid_state("x").is_retryable());
    }

    #[test]
    fn unknown_tag_reads_as_storage_error() {
        let err: EngineError = UnknownTag {
            kind: "zone",
            value: "BASEMENT".into(),
        }
        .into();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
