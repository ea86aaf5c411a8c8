use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use skyledger_core::LedgerError;

#[derive(Debug)]
pub enum AppError {
    /// Missing, malformed or expired bearer token.
    AuthenticationError(String),
    ValidationError(String),
    NotFoundError(String),
    /// Anything else. Ledger errors travel here and are unpacked when the
    /// response is built.
    Anyhow(anyhow::Error),
}

pub fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Unauthorized(_) => StatusCode::FORBIDDEN,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AlreadyExists(_) => StatusCode::CONFLICT,
        LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LedgerError::SoldOut(_) => StatusCode::CONFLICT,
        LedgerError::InsufficientPayment { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::SystemPaused => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::InvalidState(_) => StatusCode::CONFLICT,
        LedgerError::TransferRejected(_) => StatusCode::BAD_GATEWAY,
        LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Anyhow(err) => match err.downcast_ref::<LedgerError>() {
                Some(LedgerError::Internal(msg)) => {
                    tracing::error!("Ledger internal error: {}", msg);
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal Server Error".to_string())
                }
                Some(ledger_err) => (ledger_status(ledger_err), ledger_err.kind(), ledger_err.to_string()),
                None => {
                    tracing::error!("Internal Server Error: {:#}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal Server Error".to_string())
                }
            },
        };

        let body = Json(json!({
            "error": kind,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}
