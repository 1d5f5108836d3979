//! API module - HTTP handlers and routes

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // Outlets
        .route("/api/outlets", get(handlers::list_outlets))
        .route("/api/outlets/refresh", post(handlers::refresh_outlets))
        .route("/api/outlets/:id/toggle", post(handlers::toggle_outlet))
        .route("/api/outlets/:id/cycle", post(handlers::cycle_outlet))
        .route("/api/outlets/:id/history", get(handlers::outlet_history))
        // Commands
        .route("/api/commands", get(handlers::list_commands))
        // Connection settings
        .route(
            "/api/connection",
            get(handlers::get_connection).put(handlers::update_connection),
        )
        .route("/api/connection/test", post(handlers::test_connection))
        .fallback(handlers::not_found)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::config::Config;
    use crate::db::MemoryStore;
    use crate::state::{Core, ExternalStore};
    use crate::testing::FakeAgent;

    struct Harness {
        agent: FakeAgent,
        memory: Arc<MemoryStore>,
        core: Core,
        base: String,
        http: reqwest::Client,
    }

    async fn harness() -> Harness {
        let agent = FakeAgent::start().await;
        let memory = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.defaults.agent_host = "127.0.0.1".to_string();
        config.defaults.agent_port = agent.addr.port();
        config.agent.timeout_ms = crate::testing::AGENT_TIMEOUT_MS;

        let core = Core::activate(&config, ExternalStore::memory(memory.clone()))
            .await
            .unwrap();
        let app = routes().with_state(core.state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Harness {
            agent,
            memory,
            core,
            base: format!("http://{}", addr),
            http: reqwest::Client::new(),
        }
    }

    impl Harness {
        async fn get(&self, path: &str) -> (u16, Value) {
            let response = self
                .http
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap();
            (response.status().as_u16(), response.json().await.unwrap())
        }

        async fn send(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> (u16, Value) {
            let mut request = self.http.request(method, format!("{}{}", self.base, path));
            if let Some(body) = body {
                request = request.json(&body);
            }
            let response = request.send().await.unwrap();
            (response.status().as_u16(), response.json().await.unwrap())
        }
    }

    #[tokio::test]
    async fn test_health_and_snapshot() {
        let h = harness().await;

        let (status, body) = h.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");

        let (status, body) = h.get("/api/outlets").await;
        assert_eq!(status, 200);
        assert_eq!(body["outlets"].as_array().unwrap().len(), 3);
        assert_eq!(body["stale"], false);
        assert_eq!(body["outlets"][0]["power"], 300.0);

        let (status, body) = h.get("/api/nope").await;
        assert_eq!(status, 404);
        assert_eq!(body["kind"], "not_found");

        h.core.deactivate().await;
    }

    #[tokio::test]
    async fn test_toggle_route_and_conflict() {
        let h = harness().await;

        let (status, body) = h.send(reqwest::Method::POST, "/api/outlets/1/toggle", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["command"]["status"], "succeeded");
        assert_eq!(body["command"]["resulting_state"], "off");
        assert_eq!(body["outlet"]["state"], "off");

        h.agent.script(|s| s.command_delay = Duration::from_millis(200));
        let slow = tokio::spawn({
            let http = h.http.clone();
            let url = format!("{}/api/outlets/2/toggle", h.base);
            async move { http.post(url).send().await.unwrap().status().as_u16() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (status, body) = h.send(reqwest::Method::POST, "/api/outlets/2/toggle", None).await;
        assert_eq!(status, 409);
        assert_eq!(body["kind"], "command_in_flight");
        assert_eq!(slow.await.unwrap(), 200);

        let (_, body) = h.get("/api/commands").await;
        assert_eq!(body["commands"].as_array().unwrap().len(), 2);

        h.core.deactivate().await;
    }

    #[tokio::test]
    async fn test_failed_command_maps_to_bad_gateway() {
        let h = harness().await;
        h.agent.script(|s| s.command_status = 500);

        let (status, body) = h.send(reqwest::Method::POST, "/api/outlets/3/cycle", None).await;
        assert_eq!(status, 502);
        assert_eq!(body["kind"], "command_failed");
        assert!(body["error"].as_str().unwrap().contains("Outlet 3"));

        h.core.deactivate().await;
    }

    #[tokio::test]
    async fn test_history_route_reports_fallback() {
        let h = harness().await;
        h.agent.script(|s| s.history_status = 503);

        let (status, body) = h.get("/api/outlets/1/history?limit=12").await;
        assert_eq!(status, 200);
        assert_eq!(body["synthetic"], true);
        assert_eq!(body["readings"].as_array().unwrap().len(), 12);
        assert!(body["error"].is_string());

        h.core.deactivate().await;
    }

    #[tokio::test]
    async fn test_connection_update_validates_and_persists() {
        let h = harness().await;

        let (status, body) = h
            .send(
                reqwest::Method::PUT,
                "/api/connection",
                Some(json!({ "agent_port": "70000" })),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["kind"], "bad_request");
        assert!(h.memory.agents().is_empty());

        let (status, body) = h
            .send(
                reqwest::Method::PUT,
                "/api/connection",
                Some(json!({ "pdu_host": "10.1.1.5", "snmp_community": "ops" })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["settings"]["pdu_host"], "10.1.1.5");
        assert_eq!(h.memory.agents().len(), 1);
        assert_eq!(h.memory.devices()[0].snmp_community, "ops");

        let (_, body) = h.get("/api/connection").await;
        assert_eq!(body["settings"]["pdu_host"], "10.1.1.5");

        h.core.deactivate().await;
    }

    #[tokio::test]
    async fn test_connection_test_route() {
        let h = harness().await;

        let (status, body) = h.send(reqwest::Method::POST, "/api/connection/test", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "connected");

        let dead = crate::testing::unreachable_addr().await;
        let (status, body) = h
            .send(
                reqwest::Method::POST,
                "/api/connection/test",
                Some(json!({ "agent_host": "127.0.0.1", "agent_port": dead.port() })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "unreachable");

        h.core.deactivate().await;
    }
}
