//! External store module - settings records and change notifications
//!
//! - `mongo`: MongoDB backend (agents/devices collections, change stream on outlet_readings)
//! - `memory`: process-local backend used when no MongoDB URL is configured

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::AppError;

pub use self::memory::MemoryStore;
pub use self::mongo::MongoDb;

/// Table whose updates drive outlet re-synchronization
pub const OUTLET_READINGS: &str = "outlet_readings";

// ============================================================================
// Record types
// ============================================================================

/// Agent record (`agents` collection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: i32,
    /// "connected" | "unknown"
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// PDU device record (`devices` collection), always scoped to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    pub snmp_community: String,
    pub snmp_version: String,
    pub agent_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// The singleton agent record (oldest if several exist)
    async fn find_agent(&self) -> Result<Option<AgentRecord>, AppError>;

    async fn insert_agent(&self, agent: &AgentRecord) -> Result<(), AppError>;

    /// Update by `id`; fails if the record no longer exists
    async fn update_agent(&self, agent: &AgentRecord) -> Result<(), AppError>;

    async fn find_device_for_agent(&self, agent_id: &str)
        -> Result<Option<DeviceRecord>, AppError>;

    async fn insert_device(&self, device: &DeviceRecord) -> Result<(), AppError>;

    /// Update by `id`; fails if the record no longer exists
    async fn update_device(&self, device: &DeviceRecord) -> Result<(), AppError>;
}

// ============================================================================
// Change notifications
// ============================================================================

/// One change notification. The body carries no guarantees; consumers re-fetch.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub operation: String,
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(table: &str, operation: &str) -> Self {
        Self {
            table: table.to_string(),
            operation: operation.to_string(),
            received_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to change notifications on `outlet_readings`
    async fn subscribe(&self) -> Result<Subscription, AppError>;
}

/// Live change-feed subscription.
///
/// Must be ended with [`Subscription::unsubscribe`]. Dropping an active
/// subscription still cancels the producer but is logged as a leak.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    cancel: Option<oneshot::Sender<()>>,
    producer: Option<JoinHandle<()>>,
    source: &'static str,
}

impl Subscription {
    /// Wrap a producer task. The task must stop once `cancel` resolves.
    pub fn new(
        source: &'static str,
        events: mpsc::Receiver<ChangeEvent>,
        cancel: oneshot::Sender<()>,
        producer: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            cancel: Some(cancel),
            producer: Some(producer),
            source,
        }
    }

    /// Next notification; `None` once the producer has ended
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Cancel the producer and wait for it to release its resources
    pub async fn unsubscribe(mut self) {
        self.events.close();
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.await {
                tracing::warn!("[ChangeFeed] {} producer ended abnormally: {}", self.source, e);
            }
        }
        tracing::info!("[ChangeFeed] Unsubscribed from {}", self.source);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            tracing::error!(
                "[ChangeFeed] {} subscription dropped without unsubscribe",
                self.source
            );
            let _ = cancel.send(());
        }
    }
}
