//! Connection settings API handlers

use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::models::ConnectionSettings;
use crate::state::AppState;

// ============================================================================
// Request types
// ============================================================================

/// Absent fields keep their current value
#[derive(Deserialize, Default)]
pub struct UpdateConnectionRequest {
    pub agent_host: Option<String>,
    /// Number or numeric string
    pub agent_port: Option<Value>,
    pub pdu_host: Option<String>,
    pub snmp_community: Option<String>,
    pub snmp_version: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct TestConnectionRequest {
    pub agent_host: Option<String>,
    pub agent_port: Option<Value>,
}

/// Port as typed by the user: integer in 1..=65535, given as number or string
pub fn parse_port(value: &Value) -> Result<u16, AppError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p > 0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid agent port: {}", value)))
}

fn non_empty(field: &str, value: String) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/connection - Current settings and last health-check status
pub async fn get_connection(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.connection.current();
    Json(serde_json::json!({
        "settings": settings,
        "agent_base_url": settings.agent_base_url(),
    }))
}

/// PUT /api/connection - Validate and persist settings
pub async fn update_connection(
    State(state): State<AppState>,
    Json(req): Json<UpdateConnectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let current = state.connection.current();

    let settings = ConnectionSettings {
        agent_host: match req.agent_host {
            Some(host) => non_empty("agent_host", host)?,
            None => current.agent_host,
        },
        agent_port: match req.agent_port.as_ref() {
            Some(port) => parse_port(port)?,
            None => current.agent_port,
        },
        pdu_host: match req.pdu_host {
            Some(host) => non_empty("pdu_host", host)?,
            None => current.pdu_host,
        },
        snmp_community: req.snmp_community.unwrap_or(current.snmp_community),
        snmp_version: req.snmp_version.unwrap_or(current.snmp_version),
        connection_status: current.connection_status,
    };

    let saved = state.connection.save(settings).await?;
    Ok(Json(serde_json::json!({
        "settings": saved,
        "agent_base_url": saved.agent_base_url(),
    })))
}

/// POST /api/connection/test - Probe the agent (current address unless overridden)
pub async fn test_connection(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req: TestConnectionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TestConnectionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let current = state.connection.current();
    let host = match req.agent_host {
        Some(host) => non_empty("agent_host", host)?,
        None => current.agent_host,
    };
    let port = match req.agent_port.as_ref() {
        Some(port) => parse_port(port)?,
        None => current.agent_port,
    };

    let status = state.connection.test_connection(&host, port).await;
    Ok(Json(serde_json::json!({
        "status": status,
        "agent_base_url": crate::models::agent_base_url(&host, port),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_port_accepts_numbers_and_strings() {
        assert_eq!(parse_port(&json!(5000)).unwrap(), 5000);
        assert_eq!(parse_port(&json!(" 8080 ")).unwrap(), 8080);
        assert_eq!(parse_port(&json!(65535)).unwrap(), 65535);
    }

    #[test]
    fn test_parse_port_rejects_out_of_range_and_garbage() {
        for bad in [json!(0), json!(65536), json!(-1), json!("50a0"), json!(50.5), json!(null)] {
            assert!(matches!(parse_port(&bad), Err(AppError::BadRequest(_))));
        }
    }
}
