use std::io;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::interpreter::{InterpreterError, PoolError, TeardownErrors};

/// Custom error type for hook_gateway operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("POST method only")]
    PostOnly,

    #[error("Access Deny")]
    AccessDenied,

    #[error("Invalid request URI: {0}")]
    InvalidUri(String),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Invalid webhook payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Script(#[from] InterpreterError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Interpreter teardown failed:\n{0}")]
    Teardown(#[from] TeardownErrors),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid server state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl HookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HookError::AccessDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;
