//! Configuration module

use serde::Deserialize;

use crate::models::{ConnectionSettings, ConnectionStatus};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub defaults: ConnectionDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub mongodb_url: Option<String>,
    #[serde(default = "default_database_name")]
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            mongodb_url: None,
            name: default_database_name(),
        }
    }
}

/// HTTP behaviour towards the SNMP agent
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_agent_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_agent_timeout_ms(),
            connect_timeout_ms: default_agent_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
    #[serde(default = "default_history_max_limit")]
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Quiet window used to coalesce bursts of change notifications
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Built-in connection settings used until the store provides real ones
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDefaults {
    #[serde(default = "default_agent_host")]
    pub agent_host: String,
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    #[serde(default = "default_pdu_host")]
    pub pdu_host: String,
    #[serde(default = "default_snmp_community")]
    pub snmp_community: String,
    #[serde(default = "default_snmp_version")]
    pub snmp_version: String,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            agent_host: default_agent_host(),
            agent_port: default_agent_port(),
            pdu_host: default_pdu_host(),
            snmp_community: default_snmp_community(),
            snmp_version: default_snmp_version(),
        }
    }
}

impl ConnectionDefaults {
    pub fn to_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            agent_host: self.agent_host.clone(),
            agent_port: self.agent_port,
            pdu_host: self.pdu_host.clone(),
            snmp_community: self.snmp_community.clone(),
            snmp_version: self.snmp_version.clone(),
            connection_status: ConnectionStatus::Unknown,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_database_name() -> String {
    "pdu_control".to_string()
}

fn default_agent_timeout_ms() -> u64 {
    10_000
}

fn default_agent_connect_timeout_ms() -> u64 {
    3_000
}

fn default_history_limit() -> usize {
    24
}

fn default_history_max_limit() -> usize {
    1_000
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_agent_host() -> String {
    "localhost".to_string()
}

fn default_agent_port() -> u16 {
    5000
}

fn default_pdu_host() -> String {
    "192.168.1.100".to_string()
}

fn default_snmp_community() -> String {
    "public".to_string()
}

fn default_snmp_version() -> String {
    "2c".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("PDUCTL").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Invalid configuration, using defaults: {}", e);
            Config::default()
        });

        Ok(config)
    }
}
