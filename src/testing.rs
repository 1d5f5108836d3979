//! Test support: in-process fake SNMP agent and component builders

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};

use crate::agent::{build_http_client, AgentClient};
use crate::config::{AgentConfig, ConnectionDefaults};
use crate::connection::ConnectionConfig;
use crate::db::MemoryStore;
use crate::models::OutletState;

/// Per-request timeout used by every test client
pub const AGENT_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct FakeOutlet {
    pub id: String,
    pub state: OutletState,
    pub voltage: f64,
    pub current: f64,
}

/// Scripted agent behaviour, editable between requests
#[derive(Debug, Clone)]
pub struct Script {
    pub outlets: Vec<FakeOutlet>,
    pub outlets_status: u16,
    /// Replaces the body built from `outlets`
    pub outlets_body: Option<Value>,
    pub outlets_delay: Duration,
    pub command_status: u16,
    /// Replaces the toggle/cycle acknowledgment
    pub command_body: Option<Value>,
    pub command_delay: Duration,
    pub history_status: u16,
    pub history_body: Value,
    pub health_status: u16,
    pub health_body: Value,
}

impl Default for Script {
    fn default() -> Self {
        let outlet = |id: &str, state, current| FakeOutlet {
            id: id.to_string(),
            state,
            voltage: 120.0,
            current,
        };
        Self {
            outlets: vec![
                outlet("1", OutletState::On, 2.5),
                outlet("2", OutletState::Off, 0.0),
                outlet("3", OutletState::On, 1.5),
            ],
            outlets_status: 200,
            outlets_body: None,
            outlets_delay: Duration::ZERO,
            command_status: 200,
            command_body: None,
            command_delay: Duration::ZERO,
            history_status: 200,
            history_body: json!([]),
            health_status: 200,
            health_body: json!({ "status": "ok" }),
        }
    }
}

#[derive(Default)]
struct Calls {
    healthz: AtomicUsize,
    outlets: AtomicUsize,
    toggle: AtomicUsize,
    cycle: AtomicUsize,
    history: AtomicUsize,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    calls: Calls,
    last_history_limit: Mutex<Option<usize>>,
}

/// Real HTTP server on 127.0.0.1:0 speaking the agent's API
pub struct FakeAgent {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
}

impl FakeAgent {
    pub async fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let app = Router::new()
            .route("/healthz", get(healthz))
            .route("/outlets", get(list_outlets))
            .route("/outlets/:id/toggle", post(toggle))
            .route("/outlets/:id/cycle", post(cycle))
            .route("/outlets/:id/history", get(history))
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, shared }
    }

    pub fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.shared.script.lock());
    }

    pub fn outlet_state(&self, id: &str) -> Option<OutletState> {
        self.shared
            .script
            .lock()
            .outlets
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.state)
    }

    pub fn outlets_calls(&self) -> usize {
        self.shared.calls.outlets.load(Ordering::SeqCst)
    }

    pub fn toggle_calls(&self) -> usize {
        self.shared.calls.toggle.load(Ordering::SeqCst)
    }

    pub fn cycle_calls(&self) -> usize {
        self.shared.calls.cycle.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.shared.calls.history.load(Ordering::SeqCst)
    }

    pub fn last_history_limit(&self) -> Option<usize> {
        *self.shared.last_history_limit.lock()
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn healthz(State(shared): State<Arc<Shared>>) -> (StatusCode, Json<Value>) {
    shared.calls.healthz.fetch_add(1, Ordering::SeqCst);
    let script = shared.script.lock().clone();
    (status(script.health_status), Json(script.health_body))
}

async fn list_outlets(State(shared): State<Arc<Shared>>) -> (StatusCode, Json<Value>) {
    shared.calls.outlets.fetch_add(1, Ordering::SeqCst);
    let delay = shared.script.lock().outlets_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    // Read after the delay so edits made meanwhile are visible
    let script = shared.script.lock().clone();
    let body = script.outlets_body.unwrap_or_else(|| {
        let outlets: Vec<Value> = script
            .outlets
            .iter()
            .map(|o| {
                json!({
                    "id": o.id,
                    "name": format!("Outlet {}", o.id),
                    "state": o.state.as_str(),
                    "voltage": o.voltage,
                    "current": o.current,
                    "lastUpdated": Utc::now().to_rfc3339(),
                })
            })
            .collect();
        json!({ "outlets": outlets })
    });
    (status(script.outlets_status), Json(body))
}

async fn command_delay(shared: &Shared) {
    let delay = shared.script.lock().command_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

async fn toggle(
    State(shared): State<Arc<Shared>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    shared.calls.toggle.fetch_add(1, Ordering::SeqCst);
    command_delay(&shared).await;

    let mut script = shared.script.lock();
    if let Some(body) = script.command_body.clone() {
        return (status(script.command_status), Json(body));
    }
    let code = status(script.command_status);
    match script.outlets.iter_mut().find(|o| o.id == id) {
        Some(outlet) if code.is_success() => {
            outlet.state = match outlet.state {
                OutletState::On => OutletState::Off,
                OutletState::Off => OutletState::On,
            };
            (code, Json(json!({ "id": id, "state": outlet.state.as_str() })))
        }
        Some(_) => (code, Json(json!({ "detail": "toggle failed" }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("Outlet {} not found", id) })),
        ),
    }
}

async fn cycle(
    State(shared): State<Arc<Shared>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    shared.calls.cycle.fetch_add(1, Ordering::SeqCst);
    command_delay(&shared).await;

    let mut script = shared.script.lock();
    if let Some(body) = script.command_body.clone() {
        return (status(script.command_status), Json(body));
    }
    let code = status(script.command_status);
    match script.outlets.iter_mut().find(|o| o.id == id) {
        Some(outlet) if code.is_success() => {
            outlet.state = OutletState::On;
            (
                code,
                Json(json!({ "id": id, "state": "on", "message": "Outlet cycled" })),
            )
        }
        Some(_) => (code, Json(json!({ "detail": "cycle failed" }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("Outlet {} not found", id) })),
        ),
    }
}

async fn history(
    State(shared): State<Arc<Shared>>,
    Path(_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    shared.calls.history.fetch_add(1, Ordering::SeqCst);
    *shared.last_history_limit.lock() = params.get("limit").and_then(|l| l.parse().ok());

    let script = shared.script.lock().clone();
    (status(script.history_status), Json(script.history_body))
}

/// Address nothing is listening on
pub async fn unreachable_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn http_client() -> Client {
    build_http_client(&AgentConfig {
        timeout_ms: AGENT_TIMEOUT_MS,
        connect_timeout_ms: 500,
    })
    .unwrap()
}

/// ConnectionConfig over a fresh MemoryStore, pointed at `addr`
pub fn connection_for(addr: SocketAddr) -> Arc<ConnectionConfig> {
    let mut defaults = ConnectionDefaults::default().to_settings();
    defaults.agent_host = addr.ip().to_string();
    defaults.agent_port = addr.port();
    Arc::new(ConnectionConfig::new(
        Arc::new(MemoryStore::new()),
        http_client(),
        defaults,
    ))
}

pub async fn agent_client(addr: SocketAddr) -> AgentClient {
    let connection = connection_for(addr);
    connection.load().await;
    AgentClient::new(http_client(), connection)
}
