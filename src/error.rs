//! Crate error type with stable numeric codes.
//!
//! [`ExpeditionError`] covers failures that leave the normal flow:
//! storage, relay transport, and wire codec problems. Player-facing
//! validation failures are not errors; they are delivered as
//! [`crate::domain::Notice`]s and the operation returns normally.

use crate::domain::ExpeditionId;

/// Server-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category        |
/// |-----------|-----------------|
/// | 1000–1999 | Validation      |
/// | 2000–2999 | State/Not Found |
/// | 3000–3999 | Server          |
#[derive(Debug, thiserror::Error)]
pub enum ExpeditionError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Expedition with the given id is not cached.
    #[error("expedition not found: {0}")]
    ExpeditionNotFound(ExpeditionId),

    /// No instance could be reserved for a new expedition.
    #[error("instance unavailable")]
    InstanceUnavailable,

    /// Storage layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A storage write reported no affected rows.
    #[error("{operation} affected no rows")]
    RowsNotAffected {
        /// Storage call that affected nothing.
        operation: &'static str,
    },

    /// Relay message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Relay transport failure.
    #[error("relay error: {0}")]
    Relay(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExpeditionError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::ExpeditionNotFound(_) => 2001,
            Self::InstanceUnavailable => 2002,
            Self::Internal(_) => 3000,
            Self::Storage(_) => 3001,
            Self::RowsNotAffected { .. } => 3002,
            Self::Codec(_) => 3003,
            Self::Relay(_) => 3004,
        }
    }

    /// Returns `true` for storage failures, which the storage failure
    /// policy decides how to handle.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::RowsNotAffected { .. })
    }
}
