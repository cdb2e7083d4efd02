//! Typed error set for the dispatch API.
//!
//! Every "fails with X when Y" contract in the service surfaces here as a
//! variant with a stable wire code. Handlers and domain managers return
//! `ApiResult`; the `IntoResponse` impl renders `{"code", "message"}` with
//! the mapped HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No shift is currently active")]
    NoActiveShift,

    #[error("A shift is already active")]
    ShiftAlreadyActive,

    #[error("A shift already exists for that date and slot")]
    DuplicateShift,

    #[error("No active schedule exists for that slot")]
    ScheduleNotFound,

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Nothing to print")]
    NothingToPrint,

    #[error("Operator has not entered this route")]
    NoEnter,

    #[error("Initial print has not been emitted for this route")]
    NoInitial,

    #[error("No active catalog version")]
    NoActiveCatalog,

    #[error("Operation blocked: {0}")]
    ValidationBlocked(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Authentication required")]
    AuthRequired,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] comanda_common::Error),
}

impl ApiError {
    /// Stable wire code for the error shape
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoActiveShift => "NO_ACTIVE_SHIFT",
            ApiError::ShiftAlreadyActive => "SHIFT_ALREADY_ACTIVE",
            ApiError::DuplicateShift => "DUPLICATE_SHIFT",
            ApiError::ScheduleNotFound => "SCHEDULE_NOT_FOUND",
            ApiError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            ApiError::NothingToPrint => "NOTHING_TO_PRINT",
            ApiError::NoEnter => "NO_ENTER",
            ApiError::NoInitial => "NO_INITIAL",
            ApiError::NoActiveCatalog => "NO_ACTIVE_CATALOG",
            ApiError::ValidationBlocked(_) => "VALIDATION_BLOCKED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::AuthRequired => "AUTH_REQUIRED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) | ApiError::Database(_) | ApiError::Common(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NoActiveShift
            | ApiError::ScheduleNotFound
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ShiftAlreadyActive | ApiError::DuplicateShift => StatusCode::CONFLICT,
            ApiError::RouteNotFound(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NothingToPrint
            | ApiError::NoEnter
            | ApiError::NoInitial
            | ApiError::NoActiveCatalog
            | ApiError::ValidationBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::AuthRequired => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) | ApiError::Database(_) | ApiError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers and domain managers
pub type ApiResult<T> = Result<T, ApiError>;
