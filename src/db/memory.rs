//! In-process store
//!
//! Same contract as the MongoDB backend, kept in memory. Used when no
//! MongoDB URL is configured, and as the store in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};

use super::{
    AgentRecord, ChangeEvent, ChangeFeed, DeviceRecord, SettingsRepository, Subscription,
    OUTLET_READINGS,
};
use crate::error::AppError;

#[derive(Default)]
struct Tables {
    agents: Vec<AgentRecord>,
    devices: Vec<DeviceRecord>,
}

#[derive(Default)]
struct FailureSwitches {
    agent_writes: bool,
    device_writes: bool,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    failures: Mutex<FailureSwitches>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            tables: Mutex::new(Tables::default()),
            failures: Mutex::new(FailureSwitches::default()),
            changes,
        }
    }

    fn check_write(&self, table: &str) -> Result<(), AppError> {
        let failures = self.failures.lock();
        let failing = match table {
            "agents" => failures.agent_writes,
            _ => failures.device_writes,
        };
        if failing {
            return Err(AppError::PersistenceError(format!("{} write rejected", table)));
        }
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub fn fail_agent_writes(&self, fail: bool) {
        self.failures.lock().agent_writes = fail;
    }

    pub fn fail_device_writes(&self, fail: bool) {
        self.failures.lock().device_writes = fail;
    }

    pub fn agents(&self) -> Vec<AgentRecord> {
        self.tables.lock().agents.clone()
    }

    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.tables.lock().devices.clone()
    }

    /// Emit an `outlet_readings` update, as the agent's logging would
    pub fn touch_readings(&self) {
        let _ = self.changes.send(ChangeEvent::new(OUTLET_READINGS, "update"));
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
    async fn find_agent(&self) -> Result<Option<AgentRecord>, AppError> {
        Ok(self.tables.lock().agents.first().cloned())
    }

    async fn insert_agent(&self, agent: &AgentRecord) -> Result<(), AppError> {
        self.check_write("agents")?;
        self.tables.lock().agents.push(agent.clone());
        Ok(())
    }

    async fn update_agent(&self, agent: &AgentRecord) -> Result<(), AppError> {
        self.check_write("agents")?;
        let mut tables = self.tables.lock();
        let existing = tables
            .agents
            .iter_mut()
            .find(|a| a.id == agent.id)
            .ok_or_else(|| AppError::PersistenceError(format!("agent {} not found", agent.id)))?;
        *existing = agent.clone();
        Ok(())
    }

    async fn find_device_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Option<DeviceRecord>, AppError> {
        Ok(self
            .tables
            .lock()
            .devices
            .iter()
            .find(|d| d.agent_id == agent_id)
            .cloned())
    }

    async fn insert_device(&self, device: &DeviceRecord) -> Result<(), AppError> {
        self.check_write("devices")?;
        let mut tables = self.tables.lock();
        if !tables.agents.iter().any(|a| a.id == device.agent_id) {
            return Err(AppError::PersistenceError(format!(
                "device references unknown agent {}",
                device.agent_id
            )));
        }
        tables.devices.push(device.clone());
        Ok(())
    }

    async fn update_device(&self, device: &DeviceRecord) -> Result<(), AppError> {
        self.check_write("devices")?;
        let mut tables = self.tables.lock();
        let existing = tables
            .devices
            .iter_mut()
            .find(|d| d.id == device.id)
            .ok_or_else(|| {
                AppError::PersistenceError(format!("device {} not found", device.id))
            })?;
        *existing = device.clone();
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self) -> Result<Subscription, AppError> {
        let mut source = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(64);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let producer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    received = source.recv() => match received {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Consumers re-fetch on any event, so one stands in for all skipped ones
                            tracing::debug!("[ChangeFeed] memory feed lagged by {}", skipped);
                            if tx.send(ChangeEvent::new(OUTLET_READINGS, "update")).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        tracing::info!("[ChangeFeed] Subscribed to memory {}", OUTLET_READINGS);
        Ok(Subscription::new("memory", rx, cancel_tx, producer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn agent(id: &str) -> AgentRecord {
        AgentRecord {
            id: id.to_string(),
            name: "Default Agent".to_string(),
            host: "localhost".to_string(),
            port: 5000,
            status: "unknown".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[tokio::test]
    async fn test_device_requires_existing_agent() {
        let store = MemoryStore::new();
        let device = DeviceRecord {
            id: "d1".into(),
            name: "Default PDU".into(),
            host: "192.168.1.100".into(),
            snmp_community: "public".into(),
            snmp_version: "2c".into(),
            agent_id: "missing".into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(store.insert_device(&device).await.is_err());

        store.insert_agent(&agent("missing")).await.unwrap();
        assert!(store.insert_device(&device).await.is_ok());
        assert_eq!(
            store.find_device_for_agent("missing").await.unwrap(),
            Some(device)
        );
    }

    #[tokio::test]
    async fn test_update_unknown_agent_fails() {
        let store = MemoryStore::new();
        let err = store.update_agent(&agent("a1")).await.unwrap_err();
        assert!(matches!(err, AppError::PersistenceError(_)));
    }

    #[tokio::test]
    async fn test_subscription_delivers_and_releases() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe().await.unwrap();
        assert_eq!(store.subscriber_count(), 1);

        store.touch_readings();
        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.table, OUTLET_READINGS);

        sub.unsubscribe().await;
        assert_eq!(store.subscriber_count(), 0);
    }
}
