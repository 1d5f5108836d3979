//! Application state and core activation
//!
//! Components are built once at startup and injected into handlers through
//! axum's `State`; nothing is created lazily.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::agent::{build_http_client, AgentClient};
use crate::config::Config;
use crate::connection::ConnectionConfig;
use crate::db::{ChangeFeed, MemoryStore, MongoDb, SettingsRepository};
use crate::history::HistoryQueryService;
use crate::outlets::{ChangeFeedListener, CommandDispatcher, OutletStateStore, RefreshOutcome};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<ConnectionConfig>,
    pub outlets: Arc<OutletStateStore>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub history: Arc<HistoryQueryService>,
    pub started_at: DateTime<Utc>,
}

/// Backends for settings records and change notifications
pub struct ExternalStore {
    pub repo: Arc<dyn SettingsRepository>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl ExternalStore {
    /// MongoDB when configured and reachable, otherwise the in-process store
    pub async fn connect(config: &Config) -> Self {
        if config.database.mongodb_url.is_some() {
            match MongoDb::connect(&config.database).await {
                Ok(db) => {
                    let db = Arc::new(db);
                    return Self {
                        repo: db.clone(),
                        feed: db,
                    };
                }
                Err(e) => {
                    tracing::warn!("MongoDB unavailable, falling back to in-memory store: {}", e);
                }
            }
        } else {
            tracing::warn!("No MongoDB URL configured, settings will not survive a restart");
        }
        Self::memory(Arc::new(MemoryStore::new()))
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            repo: store.clone(),
            feed: store,
        }
    }
}

/// Running core: state for handlers plus the change-feed listener to stop on shutdown
pub struct Core {
    pub state: AppState,
    pub listener: Option<ChangeFeedListener>,
}

impl Core {
    /// Load settings, perform the initial outlet fetch, then start listening for changes.
    ///
    /// Only an unbuildable HTTP client is fatal; every backend failure degrades.
    pub async fn activate(config: &Config, store: ExternalStore) -> anyhow::Result<Self> {
        let http_client = build_http_client(&config.agent)?;

        let connection = Arc::new(ConnectionConfig::new(
            store.repo,
            http_client.clone(),
            config.defaults.to_settings(),
        ));
        connection.load().await;

        let agent = Arc::new(AgentClient::new(http_client, connection.clone()));
        let outlets = Arc::new(OutletStateStore::new(agent.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(agent.clone(), outlets.clone()));
        let history = Arc::new(HistoryQueryService::new(agent, &config.history));

        match outlets.refresh().await {
            RefreshOutcome::Refreshed { count } => {
                tracing::info!("Initial outlet fetch: {} outlets", count)
            }
            RefreshOutcome::Degraded { error, synthetic } => tracing::warn!(
                "Initial outlet fetch failed (synthetic: {}): {}",
                synthetic,
                error
            ),
            RefreshOutcome::Skipped => {}
        }

        let listener = match store.feed.subscribe().await {
            Ok(subscription) => Some(ChangeFeedListener::start(
                outlets.clone(),
                subscription,
                Duration::from_millis(config.feed.debounce_ms),
            )),
            Err(e) => {
                tracing::warn!("Change feed unavailable, outlets refresh on demand only: {}", e);
                None
            }
        };

        Ok(Self {
            state: AppState {
                connection,
                outlets,
                dispatcher,
                history,
                started_at: Utc::now(),
            },
            listener,
        })
    }

    /// Tear down the change-feed subscription
    pub async fn deactivate(self) {
        if let Some(listener) = self.listener {
            listener.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAgent;

    fn config_for(agent: &FakeAgent) -> Config {
        let mut config = Config::default();
        config.defaults.agent_host = "127.0.0.1".to_string();
        config.defaults.agent_port = agent.addr.port();
        config.feed.debounce_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_activate_fetches_and_subscribes() {
        let agent = FakeAgent::start().await;
        let memory = Arc::new(MemoryStore::new());

        let core = Core::activate(&config_for(&agent), ExternalStore::memory(memory.clone()))
            .await
            .unwrap();
        assert_eq!(core.state.outlets.get().outlets.len(), 3);
        assert!(core.listener.is_some());
        assert_eq!(memory.subscriber_count(), 1);

        core.deactivate().await;
        assert_eq!(memory.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_activate_with_agent_down_shows_sample_set() {
        let agent = FakeAgent::start().await;
        agent.script(|s| s.outlets_status = 500);

        let core = Core::activate(
            &config_for(&agent),
            ExternalStore::memory(Arc::new(MemoryStore::new())),
        )
        .await
        .unwrap();
        let snapshot = core.state.outlets.get();
        assert!(snapshot.synthetic);
        assert_eq!(snapshot.outlets.len(), 3);

        core.deactivate().await;
    }
}
