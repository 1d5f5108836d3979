//! Error handling module

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Agent unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("Malformed agent response: {0}")]
    MalformedResponse(String),

    #[error("Agent rejected request (HTTP {status}): {message}")]
    AgentRejected { status: u16, message: String },

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("A command is already in flight for outlet {0}")]
    CommandInFlight(String),

    #[error("Command failed for {outlet}: {cause}")]
    CommandFailed { outlet: String, cause: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Stable machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NetworkUnavailable(_) => "network_unavailable",
            AppError::MalformedResponse(_) => "malformed_response",
            AppError::AgentRejected { .. } => "agent_rejected",
            AppError::PersistenceError(_) => "persistence_error",
            AppError::CommandInFlight(_) => "command_in_flight",
            AppError::CommandFailed { .. } => "command_failed",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::ConfigError(_) => "config_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NetworkUnavailable(_)
            | AppError::MalformedResponse(_)
            | AppError::AgentRejected { .. }
            | AppError::CommandFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::CommandInFlight(_) => StatusCode::CONFLICT,
            AppError::PersistenceError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::CommandInFlight("1".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::CommandFailed {
                outlet: "Outlet 1".into(),
                cause: "timeout".into()
            }
            .into_response()
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::PersistenceError("write".into())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::BadRequest("port".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_command_failed_names_outlet() {
        let err = AppError::CommandFailed {
            outlet: "Outlet 3".into(),
            cause: "Agent unreachable: timeout".into(),
        };
        assert_eq!(
            err.to_string(),
            "Command failed for Outlet 3: Agent unreachable: timeout"
        );
        assert_eq!(err.kind(), "command_failed");
    }
}
