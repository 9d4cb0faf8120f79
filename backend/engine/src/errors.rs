//! Application-wide error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The supplied confirmation signature did not verify.  No mutation.
    #[error("invalid signature")]
    InvalidSignature,

    /// No payment order exists for the supplied gateway order id.
    #[error("payment order not found")]
    OrderNotFound,

    #[error("proposal not found")]
    ProposalNotFound,

    /// The order is already settled by a different gateway payment.
    /// Surfaced to operators as a potential fraud / double-payment signal.
    #[error("order {order_id} already settled by a different payment")]
    PaymentIdConflict { order_id: String },

    /// The order and the transaction ledger disagree.  Requires manual
    /// reconciliation; never auto-healed.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// A lifecycle transition whose preconditions are not met.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Malformed or incomplete request input (e.g. a missing reason).
    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(serde::Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        // A rejected confirmation must not reveal whether the signature or
        // the order reference was the problem.
        let (status, code, detail) = match &self {
            EngineError::InvalidSignature | EngineError::OrderNotFound => (
                StatusCode::UNAUTHORIZED,
                "confirmation_rejected",
                "confirmation rejected".to_string(),
            ),
            EngineError::ProposalNotFound => {
                (StatusCode::NOT_FOUND, "not_found", self.to_string())
            }
            EngineError::PaymentIdConflict { .. } => {
                error!("payment id conflict: {self}");
                (StatusCode::CONFLICT, "payment_id_conflict", self.to_string())
            }
            EngineError::InconsistentState(_) => {
                error!("ledger/order disagreement, manual reconciliation required: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "inconsistent_state",
                    self.to_string(),
                )
            }
            EngineError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "invalid_transition", self.to_string())
            }
            EngineError::Validation(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                self.to_string(),
            ),
            EngineError::Database(_)
            | EngineError::Migrate(_)
            | EngineError::Json(_)
            | EngineError::Config(_) => {
                error!("internal error: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: code, detail })).into_response()
    }
}
