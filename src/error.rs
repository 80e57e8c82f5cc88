use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("KV store error: {0}")]
    KvError(String),

    #[error("bus error: {0}")]
    BusError(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("unknown RPC method: {0}")]
    UnknownMethod(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("operation timed out: {0}")]
    TimeoutError(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPayload(_) | AppError::UnknownMethod(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::TimeoutError(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::KvError(_)
            | AppError::BusError(_)
            | AppError::ProviderError(_)
            | AppError::ConfigError(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::KvError(_) => "kv_error",
            AppError::BusError(_) => "bus_error",
            AppError::ProviderError(_) => "provider_error",
            AppError::InvalidPayload(_) => "invalid_payload",
            AppError::UnknownMethod(_) => "unknown_method",
            AppError::ConfigError(_) => "config_error",
            AppError::TimeoutError(_) => "timeout_error",
            AppError::NotFound => "not_found",
            AppError::InternalError(_) => "internal_error",
        }
    }

    /// The `{success: false, message, data: null}` shape the RPC query
    /// surface returns for failed mutations and unknown methods.
    pub fn to_rpc_error(&self) -> serde_json::Value {
        let message = match self {
            // The RPC surface reports unknown methods with this exact
            // message regardless of which method name was requested.
            AppError::UnknownMethod(_) => "Invalid method".to_string(),
            other => other.to_string(),
        };
        json!({
            "success": false,
            "message": message,
            "data": null,
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = json!({
            "error": self.error_type(),
            "message": self.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "status_code": status_code.as_u16(),
        });

        tracing::error!(
            error = %self,
            status_code = %status_code,
            error_type = self.error_type(),
            "request failed"
        );

        (status_code, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::TimeoutError(err.to_string())
        } else {
            AppError::ProviderError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidPayload(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::KvError(err.to_string())
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        AppError::TimeoutError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
