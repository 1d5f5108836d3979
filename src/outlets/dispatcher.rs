//! CommandDispatcher: toggle / cycle requests against the agent
//!
//! At most one command per outlet is in flight; a second request for the same
//! outlet is rejected with `CommandInFlight`. Commands on different outlets run
//! concurrently. Nothing is retried.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use super::store::OutletStateStore;
use crate::agent::AgentClient;
use crate::error::AppError;
use crate::models::{Command, CommandKind, CommandStatus, OutletState};

/// Resolved commands kept for inspection
const COMMAND_LOG_CAPACITY: usize = 100;

pub struct CommandDispatcher {
    agent: Arc<AgentClient>,
    store: Arc<OutletStateStore>,
    log: Mutex<VecDeque<Command>>,
}

impl CommandDispatcher {
    pub fn new(agent: Arc<AgentClient>, store: Arc<OutletStateStore>) -> Self {
        Self {
            agent,
            store,
            log: Mutex::new(VecDeque::with_capacity(COMMAND_LOG_CAPACITY)),
        }
    }

    /// Toggle an outlet. The returned command carries the state the agent reports.
    pub async fn toggle(&self, outlet_id: &str) -> Result<Command, AppError> {
        self.dispatch(outlet_id, CommandKind::Toggle).await
    }

    /// Power-cycle an outlet.
    ///
    /// Cycling an outlet that is currently off is the caller's concern; the
    /// call still goes to the agent.
    pub async fn cycle(&self, outlet_id: &str) -> Result<Command, AppError> {
        self.dispatch(outlet_id, CommandKind::Cycle).await
    }

    /// Most recent first
    pub fn recent_commands(&self) -> Vec<Command> {
        self.log.lock().iter().rev().cloned().collect()
    }

    async fn dispatch(&self, outlet_id: &str, kind: CommandKind) -> Result<Command, AppError> {
        let pending = self.store.begin_command(outlet_id, kind)?;

        let mut command = Command {
            id: uuid::Uuid::new_v4(),
            outlet_id: outlet_id.to_string(),
            outlet_name: pending.outlet_name().to_string(),
            kind,
            status: CommandStatus::Pending,
            resulting_state: None,
            error: None,
            requested_at: Utc::now(),
            resolved_at: None,
        };

        if kind == CommandKind::Cycle && pending.known_state() == Some(OutletState::Off) {
            tracing::debug!(
                "[Dispatcher] Cycling {} while it is off, agent decides",
                command.outlet_name
            );
        }

        let result = match kind {
            CommandKind::Toggle => self.agent.toggle(outlet_id).await.map(Some),
            CommandKind::Cycle => self.agent.cycle(outlet_id).await,
        };
        command.resolved_at = Some(Utc::now());

        match result {
            Ok(state) => {
                pending.finish(state);
                command.status = CommandStatus::Succeeded;
                command.resulting_state = state;
                tracing::info!(
                    "[Dispatcher] {} {} succeeded (state: {})",
                    kind.as_str(),
                    command.outlet_name,
                    state.map(|s| s.as_str()).unwrap_or("unreported")
                );
                self.record(command.clone());
                self.reconcile();
                Ok(command)
            }
            Err(e) => {
                drop(pending);
                let cause = e.to_string();
                tracing::warn!(
                    "[Dispatcher] {} {} failed: {}",
                    kind.as_str(),
                    command.outlet_name,
                    cause
                );
                command.status = CommandStatus::Failed;
                command.error = Some(cause.clone());
                let outlet = command.outlet_name.clone();
                self.record(command);
                Err(AppError::CommandFailed { outlet, cause })
            }
        }
    }

    fn record(&self, command: Command) {
        let mut log = self.log.lock();
        if log.len() == COMMAND_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(command);
    }

    /// Background refresh to pick up voltage/current after a command
    fn reconcile(&self) {
        let store = self.store.clone();
        tokio::spawn(async move {
            store.refresh().await;
        });
    }
}
