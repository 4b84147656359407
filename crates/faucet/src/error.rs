//! Error types for the faucet service

use crate::admission::Denial;
use crate::dispatcher::ClaimStatus;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Request-path errors. Each maps to one terminal claim state.
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("{0}")]
    AdmissionDenied(Denial),

    #[error("Faucet is busy, try again in a minute")]
    Throttled,

    #[error("Transaction failed: {0}")]
    ExecutionFailed(String),

    #[error("Transaction timed out after {}s", .0.as_secs())]
    ExecutionTimeout(Duration),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] sled::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    pub fn code(&self) -> &'static str {
        match self {
            FaucetError::InvalidRequest(_) => "INVALID_REQUEST",
            FaucetError::InvalidAddress(_) => "INVALID_ADDRESS",
            FaucetError::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
            FaucetError::VerificationFailed(_) => "VERIFICATION_FAILED",
            FaucetError::AdmissionDenied(_) => "RATE_LIMIT_EXCEEDED",
            FaucetError::Throttled => "THROTTLED",
            FaucetError::ExecutionFailed(_) => "TRANSACTION_FAILED",
            FaucetError::ExecutionTimeout(_) => "TRANSACTION_TIMEOUT",
            FaucetError::Rpc(_) => "RPC_ERROR",
            FaucetError::Ledger(_) => "LEDGER_ERROR",
            FaucetError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Terminal claim state this error represents.
    pub fn claim_status(&self) -> ClaimStatus {
        match self {
            FaucetError::InvalidRequest(_)
            | FaucetError::InvalidAddress(_)
            | FaucetError::UnsupportedNetwork(_)
            | FaucetError::VerificationFailed(_) => ClaimStatus::Rejected,
            FaucetError::AdmissionDenied(_) | FaucetError::Throttled => ClaimStatus::Denied,
            FaucetError::ExecutionFailed(_)
            | FaucetError::ExecutionTimeout(_)
            | FaucetError::Rpc(_)
            | FaucetError::Ledger(_)
            | FaucetError::Internal(_) => ClaimStatus::Failed,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::InvalidRequest(_)
            | FaucetError::InvalidAddress(_)
            | FaucetError::UnsupportedNetwork(_) => StatusCode::BAD_REQUEST,
            FaucetError::VerificationFailed(_) => StatusCode::UNAUTHORIZED,
            FaucetError::AdmissionDenied(_) | FaucetError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            FaucetError::AdmissionDenied(denial) => Some(denial.retry_after.as_secs().max(1)),
            FaucetError::Throttled => Some(60),
            _ => None,
        };

        let body = Json(json!({
            "status": self.claim_status(),
            "error": self.code(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
