use alloy_primitives::{Address, B256};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::authorization::WindowError;
use crate::relay::SettledTransfer;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Compliance error: {0}")]
    Compliance(#[from] ComplianceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Relay-domain errors
///
/// Shape errors reject the batch before any chain interaction. `Aborted`
/// carries the index report the caller needs to decide between retrying and
/// forking a corrective batch.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Batch contains no authorizations")]
    EmptyBatch,

    #[error("Authorization {index}: initiator {found} does not match batch initiator {expected}")]
    MixedInitiators {
        index: usize,
        expected: Address,
        found: Address,
    },

    #[error("Batch aborted at authorization {index}: {cause}")]
    Aborted {
        index: usize,
        cause: AbortCause,
        settled: Vec<SettledTransfer>,
    },

    #[error("Batch cancelled before execution")]
    Cancelled,

    #[error("No relay signing keys configured")]
    NoSigners,
}

/// Why a batch stopped at a given authorization
#[derive(Error, Debug)]
pub enum AbortCause {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("Submission failed: {0}")]
    Submission(String),
}

/// Settlement-ledger errors
///
/// Every precondition violation rejects the whole entrypoint call with no
/// partial writes. This is the atomicity boundary the relay relies on.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Array length mismatch: {recipients} recipients, {amounts} amounts")]
    ArrayLengthMismatch { recipients: usize, amounts: usize },

    #[error("Nonce count mismatch: {recipients} recipients, {nonces} nonces")]
    NonceCountMismatch { recipients: usize, nonces: usize },

    #[error("Batch contains no recipients")]
    EmptyBatch,

    #[error("Insufficient allowance: required {required}, available {available}")]
    InsufficientAllowance { required: String, available: String },

    #[error("Batch total overflows the amount type")]
    AmountOverflow,

    #[error("Payout not found: {0}")]
    PayoutNotFound(u64),
}

/// Settlement-token errors, surfaced as the redemption call's revert reason
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Invalid authorization signature: {0}")]
    InvalidSignature(String),

    #[error("Authorization nonce already used: {0}")]
    AuthorizationReused(B256),

    #[error("Authorization expired (validBefore {valid_before}, now {now})")]
    AuthorizationExpired { valid_before: u64, now: u64 },

    #[error("Authorization not yet valid (validAfter {valid_after}, now {now})")]
    AuthorizationNotYetValid { valid_after: u64, now: u64 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Insufficient allowance: required {required}, available {available}")]
    InsufficientAllowance { required: String, available: String },
}

/// Compliance-service errors. These degrade gracefully: a payout stays valid
/// and paid without an attestation receipt.
#[derive(Error, Debug)]
pub enum ComplianceError {
    #[error("Compliance API key not configured")]
    MissingApiKey,

    #[error("Compliance API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Compliance transport error: {0}")]
    Transport(String),

    #[error("Compliance response decode error: {0}")]
    Decode(String),

    #[error("Receipt event stream closed before a terminal status")]
    StreamClosed,
}

impl From<reqwest::Error> for ComplianceError {
    fn from(error: reqwest::Error) -> Self {
        ComplianceError::Transport(error.to_string())
    }
}

/// API error response structure. `success` is always false; the relay's
/// callers branch on it without inspecting the status code.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Relay(RelayError::EmptyBatch) => (
                StatusCode::BAD_REQUEST,
                "EMPTY_BATCH",
                "No authorizations provided".to_string(),
                None,
            ),
            AppError::Relay(RelayError::MixedInitiators {
                index,
                expected,
                found,
            }) => (
                StatusCode::BAD_REQUEST,
                "MIXED_INITIATORS",
                format!("Authorization {} is from a different initiator", index),
                Some(serde_json::json!({
                    "index": index,
                    "expected": expected,
                    "found": found,
                })),
            ),
            AppError::Relay(RelayError::Aborted {
                index,
                cause,
                settled,
            }) => {
                let (status, code) = match &cause {
                    AbortCause::Window(WindowError::Expired { .. }) => {
                        (StatusCode::BAD_REQUEST, "AUTHORIZATION_EXPIRED")
                    }
                    AbortCause::Window(WindowError::NotYetValid { .. }) => {
                        (StatusCode::BAD_REQUEST, "AUTHORIZATION_NOT_YET_VALID")
                    }
                    AbortCause::Window(WindowError::TooNarrow { .. }) => {
                        (StatusCode::BAD_REQUEST, "AUTHORIZATION_WINDOW_TOO_NARROW")
                    }
                    AbortCause::Submission(_) => (StatusCode::BAD_GATEWAY, "SUBMISSION_FAILED"),
                };
                (
                    status,
                    code,
                    format!("Batch aborted at authorization {}: {}", index, cause),
                    Some(serde_json::json!({
                        "failed_index": index,
                        "settled": settled,
                    })),
                )
            }
            AppError::Relay(RelayError::Cancelled) => (
                StatusCode::CONFLICT,
                "BATCH_CANCELLED",
                "Batch cancelled before the first redemption".to_string(),
                None,
            ),
            AppError::Relay(RelayError::NoSigners) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_RELAY_SIGNERS",
                "No relay signing keys configured".to_string(),
                None,
            ),
            AppError::Ledger(LedgerError::ArrayLengthMismatch { recipients, amounts }) => (
                StatusCode::BAD_REQUEST,
                "ARRAY_LENGTH_MISMATCH",
                "Recipients and amounts arrays differ in length".to_string(),
                Some(serde_json::json!({
                    "recipients": recipients,
                    "amounts": amounts,
                })),
            ),
            AppError::Ledger(LedgerError::NonceCountMismatch { recipients, nonces }) => (
                StatusCode::BAD_REQUEST,
                "NONCE_COUNT_MISMATCH",
                "Nonces must correspond 1:1 with recipients".to_string(),
                Some(serde_json::json!({
                    "recipients": recipients,
                    "nonces": nonces,
                })),
            ),
            AppError::Ledger(LedgerError::EmptyBatch) => (
                StatusCode::BAD_REQUEST,
                "EMPTY_BATCH",
                "No recipients provided".to_string(),
                None,
            ),
            AppError::Ledger(LedgerError::InsufficientAllowance { required, available }) => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_ALLOWANCE",
                "Caller allowance does not cover the batch total".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Ledger(LedgerError::AmountOverflow) => (
                StatusCode::BAD_REQUEST,
                "AMOUNT_OVERFLOW",
                "Batch total overflows the amount type".to_string(),
                None,
            ),
            AppError::Ledger(LedgerError::PayoutNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "PAYOUT_NOT_FOUND",
                format!("Payout not found: {}", id),
                None,
            ),
            AppError::Token(TokenError::AuthorizationReused(nonce)) => (
                StatusCode::CONFLICT,
                "NONCE_ALREADY_USED",
                format!("Authorization nonce already used: {}", nonce),
                None,
            ),
            AppError::Token(err) => (
                StatusCode::BAD_REQUEST,
                "TOKEN_REVERT",
                err.to_string(),
                None,
            ),
            AppError::Compliance(ComplianceError::MissingApiKey) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMPLIANCE_KEY_MISSING",
                "Compliance API key not configured".to_string(),
                None,
            ),
            AppError::Compliance(ComplianceError::Api { status: 404, body }) => (
                StatusCode::NOT_FOUND,
                "RECEIPT_NOT_FOUND",
                format!("Compliance API error: {}", body),
                None,
            ),
            AppError::Compliance(ComplianceError::Api { status, body }) => (
                StatusCode::BAD_GATEWAY,
                "COMPLIANCE_API_ERROR",
                format!("Compliance API error: {}", body),
                Some(serde_json::json!({ "upstream_status": status })),
            ),
            AppError::Compliance(err) => (
                StatusCode::BAD_GATEWAY,
                "COMPLIANCE_UNAVAILABLE",
                err.to_string(),
                None,
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::InvalidAddress(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_ADDRESS", msg, None)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::ExternalError(msg) => (StatusCode::BAD_GATEWAY, "EXTERNAL_ERROR", msg, None),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<hex::FromHexError> for AppError {
    fn from(error: hex::FromHexError) -> Self {
        AppError::InvalidInput(format!("Hex decode error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
