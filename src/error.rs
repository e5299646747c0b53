// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
///
/// Gating outcomes (PaymentRequired, RateLimited, Conflict) are expected
/// business results, not faults; only InternalServerError is logged at
/// error level.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (ownership or role mismatch)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (duplicate in-progress attempt, already-completed
    // resubmission, operation in flight)
    Conflict(String),

    // 402 Payment Required (premium/price gate)
    PaymentRequired(String),

    // 429 Too Many Requests (daily quota exhausted)
    RateLimited { remaining: i64, limit: i64 },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::PaymentRequired(msg) => {
                (StatusCode::PAYMENT_REQUIRED, json!({ "error": msg }))
            }
            AppError::RateLimited { remaining, limit } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": format!("Daily limit reached ({} per day)", limit),
                    "remaining": remaining,
                    "limit": limit,
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}
