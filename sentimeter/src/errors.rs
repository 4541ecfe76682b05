use crate::cache::CacheError;
use crate::classifier::ClassifierError;
use crate::db::errors::DbError;
use crate::ledger::{BalanceCheck, LedgerError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde_json::{Value, json};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// A required field is missing or malformed
    #[error("{message}")]
    Validation { message: String },

    /// The host cannot pay for the request: unknown, inactive or short of funds
    #[error("{}", .check.error.as_deref().unwrap_or(BalanceCheck::INSUFFICIENT))]
    PaymentRequired { check: BalanceCheck, estimated_cost: Decimal },

    /// Classification call failed (network, timeout, non-2xx)
    #[error("Upstream classification failed: {0}")]
    Upstream(String),

    /// Classification reply was not the expected JSON document
    #[error("Failed to parse classification: {0}")]
    UpstreamParse(String),

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// Conflict with existing state, e.g. refunding a deduction twice
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::Upstream(_) | Error::UpstreamParse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } | DbError::OutOfRange { .. } => {
                    StatusCode::BAD_REQUEST
                }
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// JSON body sent to the client. Always carries `error`, and `details` where there
    /// is something safe to say.
    pub fn body(&self) -> Value {
        match self {
            Error::Validation { message } => json!({ "error": "Invalid request", "details": message }),
            Error::BadRequest { message } => json!({ "error": "Bad request", "details": message }),
            Error::PaymentRequired { check, estimated_cost } => json!({
                "error": "Insufficient balance",
                "details": self.to_string(),
                "balance": check.balance.to_f64().unwrap_or_default(),
                "estimatedCost": estimated_cost.to_f64().unwrap_or_default(),
                "hostExists": check.host_exists,
                "active": check.active,
                "sufficient": false,
            }),
            Error::Upstream(details) => json!({ "error": "Upstream classification failed", "details": details }),
            Error::UpstreamParse(details) => json!({ "error": "Failed to parse classification", "details": details }),
            Error::NotFound { .. } => json!({ "error": "Not found", "details": self.to_string() }),
            Error::Conflict { message } => json!({ "error": "Conflict", "details": message }),
            Error::Database(DbError::NotFound) => json!({ "error": "Not found", "details": "Resource not found" }),
            Error::Database(DbError::UniqueViolation { .. }) => {
                json!({ "error": "Conflict", "details": "Resource already exists" })
            }
            Error::Database(DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } | DbError::OutOfRange { .. }) => {
                json!({ "error": "Bad request", "details": "Invalid data provided" })
            }
            Error::Internal { .. } | Error::Database(DbError::Other(_)) | Error::Other(_) => {
                json!({ "error": "Internal server error" })
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            // Already logged by the analyzer and classifier
            Error::Upstream(_) | Error::UpstreamParse(_) => {
                tracing::debug!("Classification error: {}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::PaymentRequired { .. } => {
                tracing::info!("Payment required: {}", self);
            }
            Error::Validation { .. } | Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount | LedgerError::AmountTooLarge => Error::Validation { message: err.to_string() },
            LedgerError::BalanceLimitExceeded(_) => Error::BadRequest { message: err.to_string() },
            LedgerError::HostNotFound(host) => Error::NotFound {
                resource: "Host".to_string(),
                id: host,
            },
            LedgerError::TransactionNotFound(id) => Error::NotFound {
                resource: "Transaction".to_string(),
                id: id.to_string(),
            },
            LedgerError::NotRefundable(_) => Error::BadRequest { message: err.to_string() },
            LedgerError::AlreadyRefunded(_) => Error::Conflict { message: err.to_string() },
            LedgerError::InsufficientBalance { .. } => Error::Conflict { message: err.to_string() },
            LedgerError::Storage(db_err) => Error::Database(db_err),
        }
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidPattern { .. } => Error::BadRequest { message: err.to_string() },
            CacheError::Database(db_err) => Error::Database(db_err),
            CacheError::Serialization(e) => Error::Other(e.into()),
        }
    }
}

impl From<ClassifierError> for Error {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Upstream(message) => Error::Upstream(message),
            ClassifierError::Parse { message, .. } => Error::UpstreamParse(message),
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use uuid::Uuid;

    #[test]
    fn test_payment_required_body() {
        let check = BalanceCheck::evaluate(None, Decimal::from_str("0.5").unwrap());
        let err = Error::PaymentRequired {
            check,
            estimated_cost: Decimal::from_str("0.5").unwrap(),
        };

        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        let body = err.body();
        assert_eq!(body["error"], "Insufficient balance");
        assert_eq!(body["details"], BalanceCheck::HOST_NOT_FOUND);
        assert_eq!(body["hostExists"], false);
        assert_eq!(body["sufficient"], false);
        assert_eq!(body["estimatedCost"], 0.5);
    }

    #[test]
    fn test_ledger_error_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(Error::from(LedgerError::AlreadyRefunded(id)).status_code(), StatusCode::CONFLICT);
        assert_eq!(Error::from(LedgerError::TransactionNotFound(id)).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::from(LedgerError::NotRefundable(id)).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::from(LedgerError::InvalidAmount).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::from(LedgerError::AmountTooLarge).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::from(LedgerError::BalanceLimitExceeded("a.com".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::from(LedgerError::Storage(DbError::OutOfRange { message: "numeric field overflow".to_string() })).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = Error::Other(anyhow::anyhow!("connection string postgres://secret"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body(), json!({ "error": "Internal server error" }));
    }

    #[test]
    fn test_upstream_parse_body() {
        let err = Error::from(ClassifierError::Parse {
            message: "Invalid classification JSON".to_string(),
            raw: "not json".to_string(),
        });
        assert_eq!(err.body()["error"], "Failed to parse classification");
        assert_eq!(err.body()["details"], "Invalid classification JSON");
    }
}
