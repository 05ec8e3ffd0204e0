use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the whole service. The HTTP boundary maps each
/// variant to a status code and the `{success, error, message}` envelope;
/// the realtime boundary reuses `code()`/`to_string()` for error frames.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    ProofRequired(String),

    #[error("delivery already assigned to another courier")]
    AlreadyAssigned,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Payment(String),

    #[error("payment outcome unknown; retry later")]
    PaymentPending,

    #[error("{0}")]
    Dependency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Auth(_) => "auth_error",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::ProofRequired(_) => "proof_required",
            AppError::AlreadyAssigned => "already_assigned",
            AppError::Conflict(_) => "conflict",
            AppError::Payment(_) => "payment_error",
            AppError::PaymentPending => "payment_pending",
            AppError::Dependency(_) => "dependency_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InvalidTransition(_)
            | AppError::ProofRequired(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyAssigned | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Payment(_) | AppError::PaymentPending => StatusCode::PAYMENT_REQUIRED,
            AppError::Dependency(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        }));

        (self.status(), body).into_response()
    }
}
