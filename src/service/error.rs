use axum::http::StatusCode;
use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::{error::HttpError, service::payment_provider::GatewayError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("Escrow {0} not found")]
    EscrowNotFound(Uuid),

    #[error("Withdrawal {0} not found")]
    WithdrawalNotFound(Uuid),

    #[error("Project {0} not found")]
    ProjectNotFound(Uuid),

    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("Payment method {0} not found")]
    PaymentMethodNotFound(Uuid),

    #[error("Payment blocked by risk checks (score {risk_score:.4})")]
    PaymentBlocked { risk_score: f64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Project {0} already has an active escrow")]
    EscrowAlreadyActive(Uuid),

    #[error("Webhook signature verification failed")]
    GatewaySignatureInvalid,

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: BigDecimal,
        available: BigDecimal,
    },

    #[error("Too many requests")]
    RateLimited,

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,

            ServiceError::Unauthorized(_) | ServiceError::GatewaySignatureInvalid => StatusCode::UNAUTHORIZED,

            ServiceError::Forbidden(_) | ServiceError::PaymentBlocked { .. } => StatusCode::FORBIDDEN,

            ServiceError::TransactionNotFound(_)
            | ServiceError::EscrowNotFound(_)
            | ServiceError::WithdrawalNotFound(_)
            | ServiceError::ProjectNotFound(_)
            | ServiceError::UserNotFound(_)
            | ServiceError::PaymentMethodNotFound(_) => StatusCode::NOT_FOUND,

            ServiceError::InvalidState(_) | ServiceError::EscrowAlreadyActive(_) => StatusCode::CONFLICT,

            ServiceError::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            ServiceError::Gateway(_) => StatusCode::BAD_GATEWAY,

            ServiceError::Database(_) | ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::TransactionNotFound(_)
            | ServiceError::EscrowNotFound(_)
            | ServiceError::WithdrawalNotFound(_)
            | ServiceError::ProjectNotFound(_)
            | ServiceError::UserNotFound(_)
            | ServiceError::PaymentMethodNotFound(_) => "NOT_FOUND",
            ServiceError::PaymentBlocked { .. } => "PAYMENT_BLOCKED",
            ServiceError::InvalidState(_) | ServiceError::EscrowAlreadyActive(_) => "INVALID_STATE",
            ServiceError::GatewaySignatureInvalid => "GATEWAY_SIGNATURE_INVALID",
            ServiceError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ServiceError::RateLimited => "RATE_LIMITED",
            ServiceError::Gateway(_) => "GATEWAY_UNAVAILABLE",
            ServiceError::Database(_) | ServiceError::Other(_) => "INTERNAL",
        }
    }

    /// Text that may reach a client. Internal failures and risk scores stay server-side.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Database(_) | ServiceError::Other(_) => {
                "An unexpected error occurred. Please try again later".to_string()
            }
            ServiceError::Gateway(_) => "Payment gateway is temporarily unavailable".to_string(),
            ServiceError::PaymentBlocked { .. } => {
                "Payment was blocked by our security checks".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        if status.is_server_error() {
            tracing::error!(error = %error, code = error.code(), "request failed");
        }
        HttpError::with_code(error.public_message(), status, error.code())
    }
}
