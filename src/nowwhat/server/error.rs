// SPDX-License-Identifier: MIT

//! Error envelope of the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub details: Option<Value>,
}

/// `{"success": false, "error": {...}}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Configuration(String),

    /// Model credentials are not configured
    #[error("{0}")]
    ApiKey(String),

    #[error("{0}")]
    Agent(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ApiKey(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Agent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Configuration(_) => "CONFIGURATION_ERROR",
            ApiError::ApiKey(_) => "API_KEY_ERROR",
            ApiError::Agent(_) => "AGENT_ERROR",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "ValidationError",
            ApiError::Configuration(_) => "ConfigurationError",
            ApiError::ApiKey(_) => "APIKeyError",
            ApiError::Agent(_) => "AgentError",
            ApiError::Internal(_) => "InternalServerError",
        }
    }

    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                error_type: self.error_type(),
                details: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "API error: {}", self);
        } else {
            tracing::warn!(code = self.code(), "API error: {}", self);
        }

        (status, Json(self.body())).into_response()
    }
}
