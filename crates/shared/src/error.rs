//! Error types for the lnk tenancy core

use thiserror::Error;

use crate::capability::Capability;
use crate::store::StoreError;

/// Caller-facing error taxonomy shared by every manager.
///
/// Business-rule violations are raised where they are detected and travel
/// unchanged to the caller. Only audit-log write failures are swallowed.
#[derive(Debug, Error)]
pub enum LnkError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authenticated but without standing (not a member, or owner-only action).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A member that lacks the specific capability.
    #[error("Permission denied: missing {capability}")]
    PermissionDenied { capability: Capability },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable classification of an [`LnkError`] for outer layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    PermissionDenied,
    Conflict,
    BadRequest,
    Storage,
    Internal,
}

impl ErrorKind {
    /// Machine-readable code, matching the API error body convention.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Conflict => "CONFLICT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Storage => "STORAGE_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status for callers that expose the core over HTTP.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Forbidden | Self::PermissionDenied => 403,
            Self::Conflict => 409,
            Self::BadRequest => 400,
            Self::Storage | Self::Internal => 500,
        }
    }
}

impl LnkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl From<StoreError> for LnkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(what) => LnkError::Conflict(what),
            StoreError::NotFound(what) => LnkError::NotFound(what),
            StoreError::Precondition(why) => LnkError::BadRequest(why),
            StoreError::Backend(msg) => {
                tracing::error!(error = %msg, "storage backend failure");
                LnkError::Storage(msg)
            }
        }
    }
}

/// Result type alias for core operations
pub type LnkResult<T> = Result<T, LnkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let err: LnkError = StoreError::UniqueViolation("slug".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: LnkError = StoreError::Precondition("owner".into()).into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err: LnkError = StoreError::NotFound("tenant".into()).into();
        assert_eq!(err.kind().http_status(), 404);
    }

    #[test]
    fn test_permission_denied_message_names_capability() {
        let err = LnkError::PermissionDenied {
            capability: Capability::MembersInvite,
        };
        assert_eq!(err.to_string(), "Permission denied: missing members.invite");
        assert_eq!(err.kind().code(), "PERMISSION_DENIED");
    }
}
