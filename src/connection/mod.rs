//! ConnectionConfig: agent + device connection settings
//!
//! Owns the process-wide `ConnectionSettings`, loads and persists them through
//! the settings repository, and runs explicit health checks against the agent.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Client;

use crate::agent::probe_health;
use crate::db::{AgentRecord, DeviceRecord, SettingsRepository};
use crate::error::AppError;
use crate::models::{agent_base_url, ConnectionSettings, ConnectionStatus};

const DEFAULT_AGENT_NAME: &str = "Default Agent";
const DEFAULT_DEVICE_NAME: &str = "Default PDU";

pub struct ConnectionConfig {
    repo: Arc<dyn SettingsRepository>,
    http_client: Client,
    defaults: ConnectionSettings,
    current: RwLock<ConnectionSettings>,
    // Held across the whole find-then-insert upsert
    save_lock: tokio::sync::Mutex<()>,
}

impl ConnectionConfig {
    /// Start from `defaults`; call [`load`](Self::load) to pick up stored settings
    pub fn new(
        repo: Arc<dyn SettingsRepository>,
        http_client: Client,
        defaults: ConnectionSettings,
    ) -> Self {
        Self {
            repo,
            http_client,
            current: RwLock::new(defaults.clone()),
            defaults,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot of the in-memory settings
    pub fn current(&self) -> ConnectionSettings {
        self.current.read().clone()
    }

    pub fn agent_base_url(&self) -> String {
        self.current.read().agent_base_url()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.current.read().connection_status
    }

    /// Read the singleton agent + device records.
    ///
    /// Missing records, or a store that cannot be read, leave the built-in
    /// defaults in place.
    pub async fn load(&self) -> ConnectionSettings {
        let loaded = match self.read_stored().await {
            Ok(Some(settings)) => {
                tracing::info!(
                    "[Connection] Loaded settings: agent {}, PDU {}",
                    settings.agent_base_url(),
                    settings.pdu_host
                );
                settings
            }
            Ok(None) => {
                tracing::info!("[Connection] No stored agent record, using defaults");
                self.defaults.clone()
            }
            Err(e) => {
                tracing::warn!("[Connection] Failed to read settings, using defaults: {}", e);
                self.defaults.clone()
            }
        };

        *self.current.write() = loaded.clone();
        loaded
    }

    async fn read_stored(&self) -> Result<Option<ConnectionSettings>, AppError> {
        let agent = match self.repo.find_agent().await? {
            Some(agent) => agent,
            None => return Ok(None),
        };

        let mut settings = self.defaults.clone();
        settings.agent_host = agent.host.clone();
        settings.agent_port = match u16::try_from(agent.port) {
            Ok(port) if port > 0 => port,
            _ => {
                tracing::warn!(
                    "[Connection] Stored agent port {} is out of range, keeping {}",
                    agent.port,
                    self.defaults.agent_port
                );
                self.defaults.agent_port
            }
        };
        settings.connection_status = ConnectionStatus::from_stored(&agent.status);

        if let Some(device) = self.repo.find_device_for_agent(&agent.id).await? {
            settings.pdu_host = device.host;
            settings.snmp_community = device.snmp_community;
            settings.snmp_version = device.snmp_version;
        }

        Ok(Some(settings))
    }

    /// Persist `settings`: upsert the agent record, then the device record scoped to it.
    ///
    /// The stored agent status reflects the last explicit health check.
    pub async fn save(&self, settings: ConnectionSettings) -> Result<ConnectionSettings, AppError> {
        if settings.agent_port == 0 {
            return Err(AppError::BadRequest("agent port must be 1-65535".to_string()));
        }
        let _guard = self.save_lock.lock().await;

        let status = self.status();
        let stored_status = match status {
            ConnectionStatus::Connected => ConnectionStatus::Connected,
            _ => ConnectionStatus::Unknown,
        }
        .as_str();
        let now = Utc::now().to_rfc3339();

        // 1. Agent first, so the device always has a valid parent
        let agent = match self.repo.find_agent().await? {
            Some(mut agent) => {
                agent.host = settings.agent_host.clone();
                agent.port = i32::from(settings.agent_port);
                agent.status = stored_status.to_string();
                agent.updated_at = now.clone();
                self.repo.update_agent(&agent).await?;
                agent
            }
            None => {
                let agent = AgentRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: DEFAULT_AGENT_NAME.to_string(),
                    host: settings.agent_host.clone(),
                    port: i32::from(settings.agent_port),
                    status: stored_status.to_string(),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                };
                self.repo.insert_agent(&agent).await?;
                agent
            }
        };

        // 2. Device scoped to that agent
        match self.repo.find_device_for_agent(&agent.id).await? {
            Some(mut device) => {
                device.host = settings.pdu_host.clone();
                device.snmp_community = settings.snmp_community.clone();
                device.snmp_version = settings.snmp_version.clone();
                device.updated_at = now.clone();
                self.repo.update_device(&device).await?;
            }
            None => {
                let device = DeviceRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: DEFAULT_DEVICE_NAME.to_string(),
                    host: settings.pdu_host.clone(),
                    snmp_community: settings.snmp_community.clone(),
                    snmp_version: settings.snmp_version.clone(),
                    agent_id: agent.id.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                };
                self.repo.insert_device(&device).await?;
            }
        }

        let saved = ConnectionSettings {
            connection_status: status,
            ..settings
        };
        *self.current.write() = saved.clone();

        tracing::info!(
            "[Connection] Saved settings: agent {} (record {}), PDU {}",
            saved.agent_base_url(),
            agent.id,
            saved.pdu_host
        );
        Ok(saved)
    }

    /// Probe `GET /healthz` on the given agent address.
    ///
    /// Never fails: any error resolves to `Unreachable`. Only the in-memory
    /// status is updated; nothing is persisted.
    pub async fn test_connection(&self, agent_host: &str, agent_port: u16) -> ConnectionStatus {
        let base_url = agent_base_url(agent_host, agent_port);

        let status = match probe_health(&self.http_client, &base_url).await {
            Ok(()) => {
                tracing::info!("[Connection] Agent {} is healthy", base_url);
                ConnectionStatus::Connected
            }
            Err(e) => {
                tracing::warn!("[Connection] Agent {} health check failed: {}", base_url, e);
                ConnectionStatus::Unreachable
            }
        };

        self.current.write().connection_status = status;
        status
    }
}
