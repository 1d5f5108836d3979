//! Data models for pdu-control

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

// ============================================================================
// Outlet Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutletState {
    On,
    Off,
}

impl OutletState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutletState::On => "on",
            OutletState::Off => "off",
        }
    }

    /// Strict parse; anything other than `on`/`off` is rejected
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "on" => Some(OutletState::On),
            "off" => Some(OutletState::Off),
            _ => None,
        }
    }
}

/// One controllable PDU port as last reported by the agent
#[derive(Debug, Clone, PartialEq)]
pub struct Outlet {
    pub id: String,
    pub name: String,
    pub state: OutletState,
    /// Volts, never negative
    pub voltage: f64,
    /// Amps, never negative
    pub current: f64,
    pub last_updated: DateTime<Utc>,
}

impl Outlet {
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

// ============================================================================
// Connection Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Unknown,
    Connected,
    Unreachable,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Unknown => "unknown",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Unreachable => "unreachable",
        }
    }

    /// Interpret the `status` column of a stored agent record
    pub fn from_stored(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "connected" => ConnectionStatus::Connected,
            "unreachable" => ConnectionStatus::Unreachable,
            _ => ConnectionStatus::Unknown,
        }
    }
}

/// Agent + device connection settings (process singleton, owned by ConnectionConfig)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub agent_host: String,
    pub agent_port: u16,
    pub pdu_host: String,
    /// Forwarded to the agent, never used by the core
    pub snmp_community: String,
    pub snmp_version: String,
    pub connection_status: ConnectionStatus,
}

impl ConnectionSettings {
    pub fn agent_base_url(&self) -> String {
        agent_base_url(&self.agent_host, self.agent_port)
    }
}

pub fn agent_base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host.trim(), port)
}

// ============================================================================
// Telemetry Models
// ============================================================================

/// One historical telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub state: OutletState,
}

impl Reading {
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Reading", 5)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.serialize_field("voltage", &self.voltage)?;
        s.serialize_field("current", &self.current)?;
        s.serialize_field("power", &self.power())?;
        s.serialize_field("state", &self.state)?;
        s.end()
    }
}

// ============================================================================
// Command Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Toggle,
    Cycle,
}

impl CommandKind {
    /// Agent path segment (`/outlets/{id}/{segment}`)
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Toggle => "toggle",
            CommandKind::Cycle => "cycle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A control action against one outlet
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub id: uuid::Uuid,
    pub outlet_id: String,
    pub outlet_name: String,
    pub kind: CommandKind,
    pub status: CommandStatus,
    /// State reported by the agent once the command resolved
    pub resulting_state: Option<OutletState>,
    pub error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse a timestamp as emitted by the agent or the store.
///
/// Accepts RFC 3339 and the offset-less ISO form (`2024-05-01T10:00:00.123456`),
/// which is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_outlet_state_parse() {
        assert_eq!(OutletState::parse("on"), Some(OutletState::On));
        assert_eq!(OutletState::parse(" OFF "), Some(OutletState::Off));
        assert_eq!(OutletState::parse("unknown"), None);
        assert_eq!(OutletState::parse(""), None);
    }

    #[test]
    fn test_reading_serializes_power() {
        let reading = Reading {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            voltage: 120.0,
            current: 2.5,
            state: OutletState::On,
        };
        let value = serde_json::to_value(&reading).unwrap();
        assert_eq!(value["power"], 300.0);
        assert_eq!(value["state"], "on");
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T10:00:00.000000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_connection_status_from_stored() {
        assert_eq!(
            ConnectionStatus::from_stored("connected"),
            ConnectionStatus::Connected
        );
        assert_eq!(
            ConnectionStatus::from_stored("error"),
            ConnectionStatus::Unknown
        );
        assert_eq!(agent_base_url(" pdu-agent ", 5000), "http://pdu-agent:5000");
    }
}
