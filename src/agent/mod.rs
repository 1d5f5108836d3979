//! SNMP agent HTTP integration
//!
//! - `client`: typed access to the agent API (`/healthz`, `/outlets`, commands, history)

pub mod client;

pub use client::{build_http_client, probe_health, AgentClient, HistoryRecord};
