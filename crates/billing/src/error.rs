//! Billing error types

use lnk_shared::{LnkError, StoreError};
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Subscription not found for tenant: {0}")]
    SubscriptionNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The subscription or invoice is not in a state that allows the transition.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Already in the requested state.
    #[error("Already {0}")]
    AlreadyInState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Refund amount ({requested_cents} cents) exceeds invoice total ({available_cents} cents)")]
    RefundAmountExceedsTotal {
        requested_cents: i64,
        available_cents: i64,
    },

    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    /// The quota collaborator rejected a plan change.
    #[error("Quota update failed: {0}")]
    Quota(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(what) => BillingError::AlreadyExists(what),
            StoreError::NotFound(what) => BillingError::NotFound(what),
            StoreError::Precondition(why) => BillingError::ConcurrentModification(why),
            StoreError::Backend(msg) => BillingError::Database(msg),
        }
    }
}

impl From<BillingError> for LnkError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SubscriptionNotFound(_) | BillingError::NotFound(_) => {
                LnkError::NotFound(err.to_string())
            }
            BillingError::AlreadyExists(_)
            | BillingError::AlreadyInState(_)
            | BillingError::ConcurrentModification(_) => LnkError::Conflict(err.to_string()),
            BillingError::InvalidTransition(_)
            | BillingError::InvalidInput(_)
            | BillingError::InvalidAmount(_)
            | BillingError::RefundAmountExceedsTotal { .. } => LnkError::BadRequest(err.to_string()),
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "billing storage failure");
                LnkError::Storage(msg)
            }
            BillingError::Quota(_) | BillingError::Config(_) => LnkError::Internal(err.to_string()),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
