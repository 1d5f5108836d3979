//! OutletStateStore: canonical in-memory view of all outlets
//!
//! Writes go through exactly two paths: the merge step of [`OutletStateStore::refresh`]
//! and the confirmation of a dispatched command ([`PendingCommand::finish`]).
//! Readers get a cloned [`OutletSnapshot`]; no lock is held across agent I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::agent::AgentClient;
use crate::error::AppError;
use crate::models::{CommandKind, Outlet, OutletState};

// ============================================================================
// Snapshot types
// ============================================================================

/// One outlet as exposed to readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutletView {
    pub id: String,
    pub name: String,
    pub state: OutletState,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub last_updated: DateTime<Utc>,
    /// Command currently in flight for this outlet
    pub pending: Option<CommandKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutletSnapshot {
    pub outlets: Vec<OutletView>,
    /// The last refresh failed; `outlets` is the last known-good collection
    pub stale: bool,
    /// `outlets` is the built-in sample set, no fetch has ever succeeded
    pub synthetic: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl OutletSnapshot {
    pub fn outlet(&self, id: &str) -> Option<&OutletView> {
        self.outlets.iter().find(|o| o.id == id)
    }
}

/// Result of one `refresh()` call. Failures are reported here, never as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed { count: usize },
    Degraded { error: String, synthetic: bool },
    /// Another refresh was in flight; it will run once more on this caller's behalf
    Skipped,
}

// ============================================================================
// Store
// ============================================================================

struct Entry {
    outlet: Outlet,
    /// Set when a command result was applied, so an older fetch cannot undo it
    confirmed_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    /// Agent order
    entries: Vec<Entry>,
    pending: HashMap<String, CommandKind>,
    has_succeeded: bool,
    stale: bool,
    synthetic: bool,
    last_error: Option<String>,
    last_success_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RefreshGate {
    running: bool,
    rerun: bool,
}

pub struct OutletStateStore {
    agent: Arc<AgentClient>,
    inner: RwLock<Inner>,
    gate: Mutex<RefreshGate>,
}

impl OutletStateStore {
    pub fn new(agent: Arc<AgentClient>) -> Self {
        Self {
            agent,
            inner: RwLock::new(Inner::default()),
            gate: Mutex::new(RefreshGate::default()),
        }
    }

    /// Current snapshot. Never blocks on I/O.
    pub fn get(&self) -> OutletSnapshot {
        let inner = self.inner.read();
        OutletSnapshot {
            outlets: inner
                .entries
                .iter()
                .map(|entry| {
                    let o = &entry.outlet;
                    OutletView {
                        id: o.id.clone(),
                        name: o.name.clone(),
                        state: o.state,
                        voltage: o.voltage,
                        current: o.current,
                        power: o.power(),
                        last_updated: o.last_updated,
                        pending: inner.pending.get(&o.id).copied(),
                    }
                })
                .collect(),
            stale: inner.stale,
            synthetic: inner.synthetic,
            last_error: inner.last_error.clone(),
            last_success_at: inner.last_success_at,
        }
    }

    /// Re-fetch the outlet collection from the agent and merge it in.
    ///
    /// Not reentrant: a call made while another is in flight returns `Skipped`
    /// and the in-flight call performs exactly one more fetch before returning.
    pub async fn refresh(&self) -> RefreshOutcome {
        {
            let mut gate = self.gate.lock();
            if gate.running {
                gate.rerun = true;
                tracing::debug!("[OutletStore] Refresh already in flight, queued one more pass");
                return RefreshOutcome::Skipped;
            }
            gate.running = true;
        }
        let mut slot = GateSlot {
            gate: &self.gate,
            armed: true,
        };

        loop {
            let outcome = self.fetch_and_merge().await;

            let mut gate = self.gate.lock();
            if gate.rerun {
                gate.rerun = false;
                continue;
            }
            gate.running = false;
            slot.armed = false;
            return outcome;
        }
    }

    async fn fetch_and_merge(&self) -> RefreshOutcome {
        let started = Instant::now();
        let result = self.agent.list_outlets().await;

        let mut inner = self.inner.write();
        match result {
            Ok(fetched) => {
                let count = fetched.len();
                inner.merge(fetched, started);
                inner.has_succeeded = true;
                inner.stale = false;
                inner.synthetic = false;
                inner.last_error = None;
                inner.last_success_at = Some(Utc::now());
                tracing::debug!("[OutletStore] Refreshed {} outlets", count);
                RefreshOutcome::Refreshed { count }
            }
            Err(e) => {
                let error = e.to_string();
                if inner.has_succeeded {
                    tracing::warn!(
                        "[OutletStore] Refresh failed, keeping {} last known outlets: {}",
                        inner.entries.len(),
                        error
                    );
                } else if inner.entries.is_empty() {
                    tracing::warn!(
                        "[OutletStore] Refresh failed before any successful fetch, showing sample outlets: {}",
                        error
                    );
                    inner.entries = synthetic_outlets();
                    inner.synthetic = true;
                } else {
                    // Sample set already shown; keep states confirmed on it since
                    tracing::warn!(
                        "[OutletStore] Refresh failed again, keeping sample outlets: {}",
                        error
                    );
                }
                inner.stale = true;
                inner.last_error = Some(error.clone());
                RefreshOutcome::Degraded {
                    error,
                    synthetic: inner.synthetic,
                }
            }
        }
    }

    /// Mark `outlet_id` as having a command in flight.
    ///
    /// Fails with `CommandInFlight` if one is already pending for it.
    pub fn begin_command(
        &self,
        outlet_id: &str,
        kind: CommandKind,
    ) -> Result<PendingCommand<'_>, AppError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.pending.get(outlet_id) {
            tracing::debug!(
                "[OutletStore] Rejected {} on outlet {}: {} still pending",
                kind.as_str(),
                outlet_id,
                existing.as_str()
            );
            return Err(AppError::CommandInFlight(outlet_id.to_string()));
        }
        inner.pending.insert(outlet_id.to_string(), kind);

        let entry = inner.entries.iter().find(|e| e.outlet.id == outlet_id);
        Ok(PendingCommand {
            store: self,
            outlet_id: outlet_id.to_string(),
            outlet_name: entry
                .map(|e| e.outlet.name.clone())
                .unwrap_or_else(|| format!("Outlet {}", outlet_id)),
            known_state: entry.map(|e| e.outlet.state),
            resolved: false,
        })
    }

    fn clear_pending(&self, outlet_id: &str) {
        self.inner.write().pending.remove(outlet_id);
    }

    fn confirm(&self, outlet_id: &str, state: Option<OutletState>) {
        let mut inner = self.inner.write();
        inner.pending.remove(outlet_id);
        let Some(state) = state else {
            return;
        };
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.outlet.id == outlet_id) {
            entry.outlet.state = state;
            entry.outlet.last_updated = Utc::now();
            entry.confirmed_at = Some(Instant::now());
        }
    }
}

impl Inner {
    /// Merge a fresh collection by id.
    ///
    /// Entries with a pending command are kept as displayed, even if the agent
    /// no longer lists them. Entries confirmed after `started` are kept too,
    /// since the fetch may predate the command.
    fn merge(&mut self, fetched: Vec<Outlet>, started: Instant) {
        let mut previous: HashMap<String, Entry> = self
            .entries
            .drain(..)
            .map(|e| (e.outlet.id.clone(), e))
            .collect();

        let mut merged = Vec::with_capacity(fetched.len());
        for outlet in fetched {
            let keep_previous = self.pending.contains_key(&outlet.id)
                || previous
                    .get(&outlet.id)
                    .and_then(|e| e.confirmed_at)
                    .is_some_and(|at| at > started);

            match previous.remove(&outlet.id) {
                Some(entry) if keep_previous => merged.push(entry),
                _ => merged.push(Entry {
                    outlet,
                    confirmed_at: None,
                }),
            }
        }

        for (id, entry) in previous {
            if self.pending.contains_key(&id) {
                merged.push(entry);
            }
        }

        self.entries = merged;
    }
}

/// Releases the refresh gate if a refresh future is dropped mid-flight
struct GateSlot<'a> {
    gate: &'a Mutex<RefreshGate>,
    armed: bool,
}

impl Drop for GateSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut gate = self.gate.lock();
            gate.running = false;
            gate.rerun = false;
        }
    }
}

/// In-flight command on one outlet.
///
/// Dropping it without [`finish`](Self::finish) clears the pending tag and
/// leaves the displayed state untouched.
pub struct PendingCommand<'a> {
    store: &'a OutletStateStore,
    outlet_id: String,
    outlet_name: String,
    known_state: Option<OutletState>,
    resolved: bool,
}

impl PendingCommand<'_> {
    pub fn outlet_name(&self) -> &str {
        &self.outlet_name
    }

    /// State the store showed when the command began
    pub fn known_state(&self) -> Option<OutletState> {
        self.known_state
    }

    /// Apply the agent-confirmed state (if reported) and clear the pending tag
    pub fn finish(mut self, state: Option<OutletState>) {
        self.resolved = true;
        self.store.confirm(&self.outlet_id, state);
    }
}

impl Drop for PendingCommand<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.store.clear_pending(&self.outlet_id);
        }
    }
}

/// Fixed sample shown until the first successful fetch
fn synthetic_outlets() -> Vec<Entry> {
    let now = Utc::now();
    [
        ("1", OutletState::On, 120.0, 5.0),
        ("2", OutletState::Off, 0.0, 0.0),
        ("3", OutletState::On, 120.0, 3.0),
    ]
    .into_iter()
    .map(|(id, state, voltage, current)| Entry {
        outlet: Outlet {
            id: id.to_string(),
            name: format!("Outlet {}", id),
            state,
            voltage,
            current,
            last_updated: now,
        },
        confirmed_at: None,
    })
    .collect()
}
