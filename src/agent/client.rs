//! SNMP agent API client

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::AgentConfig;
use crate::connection::ConnectionConfig;
use crate::error::AppError;
use crate::models::{parse_timestamp, Outlet, OutletState};

/// Raw `/outlets/{id}/history` row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecord {
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub voltage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub current: Option<f64>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutletsResponse {
    outlets: Vec<AgentOutlet>,
}

#[derive(Debug, Deserialize)]
struct AgentOutlet {
    id: Value,
    name: Option<String>,
    state: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    voltage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    current: Option<f64>,
    #[serde(rename = "lastUpdated")]
    last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Accepts a JSON number, a numeric string, or null
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

impl AgentOutlet {
    fn into_outlet(self, fetched_at: DateTime<Utc>) -> Result<Outlet, AppError> {
        let id = match self.id {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(AppError::MalformedResponse(format!(
                    "outlet id must be a string or number, got {}",
                    other
                )))
            }
        };

        let state = match self.state.as_deref().map(OutletState::parse) {
            Some(Some(state)) => state,
            _ => {
                tracing::warn!(
                    "[Agent] Outlet {} reported state {:?}, treating as off",
                    id,
                    self.state
                );
                OutletState::Off
            }
        };

        Ok(Outlet {
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Outlet {}", id)),
            state,
            voltage: self.voltage.unwrap_or(0.0).max(0.0),
            current: self.current.unwrap_or(0.0).max(0.0),
            last_updated: self
                .last_updated
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(fetched_at),
            id,
        })
    }
}

/// Build the shared HTTP client used for every agent call
pub fn build_http_client(config: &AgentConfig) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .build()?;
    Ok(client)
}

/// `{base}/{segments...}` with each segment percent-encoded
fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url, AppError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| AppError::ConfigError(format!("Invalid agent address {}: {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| AppError::ConfigError(format!("Agent address {} cannot be a base", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::NetworkUnavailable("timeout".to_string())
    } else if e.is_connect() {
        AppError::NetworkUnavailable(format!("connection failed: {}", e))
    } else {
        AppError::NetworkUnavailable(e.to_string())
    }
}

/// Reject 2xx bodies that carry an agent-side `error` field
fn reject_embedded_error(body: &Value) -> Result<(), AppError> {
    match body.get("error") {
        None | Some(Value::Null) => Ok(()),
        Some(err) => Err(AppError::AgentRejected {
            status: 200,
            message: err.as_str().map(String::from).unwrap_or_else(|| err.to_string()),
        }),
    }
}

async fn execute(request: RequestBuilder) -> Result<Value, AppError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        // FastAPI-style {"detail": "..."} bodies
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or_else(|| text.chars().take(200).collect());
        return Err(AppError::AgentRejected {
            status: status.as_u16(),
            message,
        });
    }

    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| AppError::MalformedResponse(e.to_string()))
}

/// Liveness probe against an arbitrary agent address.
///
/// Succeeds only for a 2xx `{"status": "ok"}` answer.
pub async fn probe_health(http_client: &Client, base_url: &str) -> Result<(), AppError> {
    let url = endpoint(base_url, &["healthz"])?;
    let body = execute(http_client.get(url)).await?;
    let health: HealthResponse = serde_json::from_value(body)
        .map_err(|e| AppError::MalformedResponse(format!("healthz: {}", e)))?;

    if health.status == "ok" {
        Ok(())
    } else {
        Err(AppError::MalformedResponse(format!(
            "healthz reported status {:?}",
            health.status
        )))
    }
}

/// Agent client bound to whatever address ConnectionConfig currently holds
pub struct AgentClient {
    http_client: Client,
    connection: Arc<ConnectionConfig>,
}

impl AgentClient {
    pub fn new(http_client: Client, connection: Arc<ConnectionConfig>) -> Self {
        Self {
            http_client,
            connection,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        endpoint(&self.connection.agent_base_url(), segments)
    }

    /// GET /outlets
    pub async fn list_outlets(&self) -> Result<Vec<Outlet>, AppError> {
        let url = self.endpoint(&["outlets"])?;
        let body = execute(self.http_client.get(url)).await?;
        let response: OutletsResponse = serde_json::from_value(body)
            .map_err(|e| AppError::MalformedResponse(format!("outlets: {}", e)))?;

        let fetched_at = Utc::now();
        response
            .outlets
            .into_iter()
            .map(|o| o.into_outlet(fetched_at))
            .collect()
    }

    /// POST /outlets/{id}/toggle, returning the state the agent reports afterwards
    pub async fn toggle(&self, outlet_id: &str) -> Result<OutletState, AppError> {
        let url = self.endpoint(&["outlets", outlet_id, "toggle"])?;
        let body = execute(self.http_client.post(url)).await?;
        reject_embedded_error(&body)?;

        body.get("state")
            .and_then(|s| s.as_str())
            .and_then(OutletState::parse)
            .ok_or_else(|| {
                AppError::MalformedResponse(format!(
                    "toggle response has no on/off state: {}",
                    body
                ))
            })
    }

    /// POST /outlets/{id}/cycle. The acknowledgment may or may not carry a state.
    pub async fn cycle(&self, outlet_id: &str) -> Result<Option<OutletState>, AppError> {
        let url = self.endpoint(&["outlets", outlet_id, "cycle"])?;
        let body = execute(self.http_client.post(url)).await?;
        if !body.is_object() {
            return Err(AppError::MalformedResponse(format!(
                "cycle acknowledgment is not an object: {}",
                body
            )));
        }
        reject_embedded_error(&body)?;

        Ok(body
            .get("state")
            .and_then(|s| s.as_str())
            .and_then(OutletState::parse))
    }

    /// GET /outlets/{id}/history?limit=N, rows in agent order
    pub async fn history(
        &self,
        outlet_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, AppError> {
        let mut url = self.endpoint(&["outlets", outlet_id, "history"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let body = execute(self.http_client.get(url)).await?;
        let rows = match body {
            Value::Array(rows) => rows,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(rows)) => rows,
                _ => {
                    return Err(AppError::MalformedResponse(
                        "history response is neither an array nor {data: [...]}".to_string(),
                    ))
                }
            },
            other => {
                return Err(AppError::MalformedResponse(format!(
                    "history response is not an array: {}",
                    other
                )))
            }
        };

        let total = rows.len();
        let records: Vec<HistoryRecord> = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect();
        if records.len() < total {
            tracing::debug!(
                "[Agent] Dropped {} undecodable history rows for outlet {}",
                total - records.len(),
                outlet_id
            );
        }

        Ok(records)
    }
}
