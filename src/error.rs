//! Top-level error taxonomy.
//!
//! All public entry points in this crate return [`CoreResult`]. The kinds
//! mirror the stable `EError` surface porto-like daemons expose to RPC
//! clients; callers that cross an actual wire boundary map [`CoreError`]
//! onto their own numeric code + text encoding.

use std::fmt;

use crate::property::value::ParseError;

pub type CoreResult<T> = Result<T, CoreError>;

/// Stable error kinds surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Unexpected kernel/syscall failure, with errno when available.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// Parse failed, value out of range, unknown enum token, unknown index key, ...
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Rejected by a state gate.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Authorization denied.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Would overcommit a bounded resource.
    #[error("resource not available: {0}")]
    ResourceNotAvailable(String),

    /// Handler's `IsSupported` is false on this kernel.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// stdout/stderr read against a missing, non-regular, or rotated-away file.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// No container, property, or index by that name/key.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    pub fn invalid_value(msg: impl fmt::Display) -> Self {
        CoreError::InvalidValue(msg.to_string())
    }

    pub fn invalid_state(msg: impl fmt::Display) -> Self {
        CoreError::InvalidState(msg.to_string())
    }

    pub fn permission(msg: impl fmt::Display) -> Self {
        CoreError::Permission(msg.to_string())
    }

    pub fn not_supported(property: impl fmt::Display) -> Self {
        CoreError::NotSupported(property.to_string())
    }

    pub fn not_found(msg: impl fmt::Display) -> Self {
        CoreError::NotFound(msg.to_string())
    }

    /// True for kinds §7 says handlers must not log (the caller is
    /// presumed to handle them); kernel-apply failures log separately at
    /// the call site and are not folded into this helper.
    pub fn is_caller_handled(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidValue(_) | CoreError::InvalidState(_) | CoreError::Permission(_)
        )
    }
}

impl From<ParseError> for CoreError {
    fn from(e: ParseError) -> Self {
        CoreError::InvalidValue(e.to_string())
    }
}
