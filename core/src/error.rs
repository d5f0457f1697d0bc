//! Error taxonomy for the engine.
//!
//! Errors are split by who can act on them:
//!
//! - [`EngineError::Validation`] and [`EngineError::KeyInvalid`] go back to the caller
//! - [`EngineError::CapacityExhausted`] is the "sold out" state, distinct from an invalid code
//! - [`EngineError::IntegrityViolation`] means the completion guard was bypassed and is alerting
//! - [`StoreError`] wraps persistence failures and always aborts the unit of work

use crate::types::{KeyId, ParseError, PaymentReference, PurchaseId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a key cannot be redeemed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRejection {
    /// No key with this code exists
    #[error("key not found")]
    NotFound,
    /// Key was already redeemed (or has a booking in flight)
    #[error("key already used")]
    AlreadyUsed,
    /// Key was cancelled by an operator
    #[error("key cancelled")]
    Cancelled,
    /// Key passed its expiry date
    #[error("key expired")]
    Expired,
}

/// Errors from the transactional store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Database connection or query failed
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness or locking conflict aborted the transaction
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A row the transaction depends on is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failure injected by a test harness
    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Errors from the payment gateway boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Callback signature did not match
    #[error("Invalid callback signature")]
    InvalidSignature,

    /// Callback payload could not be decoded
    #[error("Malformed callback payload: {0}")]
    MalformedPayload(String),

    /// Gateway could not be reached or refused the request
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad input, recoverable by the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Key cannot be redeemed; terminal for that code
    #[error("Key invalid: {0}")]
    KeyInvalid(KeyRejection),

    /// No capacity slot left
    #[error("Capacity exhausted: {confirmed} of {max} confirmed, {pending} awaiting payment")]
    CapacityExhausted {
        /// Confirmed attendees
        confirmed: u32,
        /// Purchases holding a slot while awaiting payment
        pending: u32,
        /// Hard capacity
        max: u32,
    },

    /// Callback for a purchase that is no longer pending
    #[error("Duplicate callback for reference {0}")]
    DuplicateCallback(PaymentReference),

    /// Payment was declined by the gateway
    #[error("Payment declined ({code}): {reason}")]
    GatewayRejected {
        /// Gateway response code
        code: String,
        /// Human readable reason
        reason: String,
    },

    /// Completion attempted on a key that is not active
    #[error("Integrity violation on purchase {purchase_id} (key {key_id}): {detail}")]
    IntegrityViolation {
        /// Purchase being completed
        purchase_id: PurchaseId,
        /// Key that was not active
        key_id: KeyId,
        /// What was found
        detail: String,
    },

    /// Transition not allowed from the current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Purchase does not exist
    #[error("Purchase {0} not found")]
    PurchaseNotFound(PurchaseId),

    /// Key does not exist
    #[error("Key {0} not found")]
    KeyNotFound(KeyId),

    /// Gateway boundary failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<KeyRejection> for EngineError {
    fn from(rejection: KeyRejection) -> Self {
        Self::KeyInvalid(rejection)
    }
}

impl From<ParseError> for EngineError {
    fn from(err: ParseError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Convenience alias for engine results
pub type EngineResult<T> = Result<T, EngineError>;
