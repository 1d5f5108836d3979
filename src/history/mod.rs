//! HistoryQueryService: telemetry series for one outlet
//!
//! When the agent cannot supply history the service substitutes a generated
//! series of the requested length and reports the failure alongside it.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use serde::Serialize;

use crate::agent::{AgentClient, HistoryRecord};
use crate::config::HistoryConfig;
use crate::models::{parse_timestamp, OutletState, Reading};

const SYNTHETIC_VOLTAGE: f64 = 120.0;

/// Readings oldest to newest, plus provenance
#[derive(Debug, Clone, Serialize)]
pub struct HistorySeries {
    pub outlet_id: String,
    pub readings: Vec<Reading>,
    /// Generated locally because the agent fetch failed
    pub synthetic: bool,
    pub error: Option<String>,
}

pub struct HistoryQueryService {
    agent: Arc<AgentClient>,
    default_limit: usize,
    max_limit: usize,
}

impl HistoryQueryService {
    pub fn new(agent: Arc<AgentClient>, config: &HistoryConfig) -> Self {
        Self {
            agent,
            default_limit: config.default_limit.max(1),
            max_limit: config.max_limit.max(1),
        }
    }

    /// `None` or 0 selects the configured default; larger values are clamped
    pub fn effective_limit(&self, limit: Option<usize>) -> usize {
        match limit {
            None | Some(0) => self.default_limit,
            Some(n) => n.min(self.max_limit),
        }
    }

    /// Never fails; a failed fetch yields a synthetic series with `error` set
    pub async fn fetch(&self, outlet_id: &str, limit: Option<usize>) -> HistorySeries {
        let limit = self.effective_limit(limit);

        match self.agent.history(outlet_id, limit).await {
            Ok(records) => {
                let readings = to_readings(records, limit);
                tracing::debug!(
                    "[History] Outlet {}: {} readings",
                    outlet_id,
                    readings.len()
                );
                HistorySeries {
                    outlet_id: outlet_id.to_string(),
                    readings,
                    synthetic: false,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "[History] Fetch failed for outlet {}, substituting {} synthetic readings: {}",
                    outlet_id,
                    limit,
                    e
                );
                HistorySeries {
                    outlet_id: outlet_id.to_string(),
                    readings: synthetic_series(limit),
                    synthetic: true,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Ascending by timestamp, newest `limit` kept
fn to_readings(records: Vec<HistoryRecord>, limit: usize) -> Vec<Reading> {
    let mut readings: Vec<Reading> = records
        .into_iter()
        .filter_map(|record| {
            let timestamp = record.created_at.as_deref().and_then(parse_timestamp)?;
            Some(Reading {
                timestamp,
                voltage: record.voltage.unwrap_or(0.0).max(0.0),
                current: record.current.unwrap_or(0.0).max(0.0),
                state: record
                    .state
                    .as_deref()
                    .and_then(OutletState::parse)
                    .unwrap_or(OutletState::Off),
            })
        })
        .collect();

    readings.sort_by_key(|r| r.timestamp);
    if readings.len() > limit {
        readings.drain(..readings.len() - limit);
    }
    readings
}

/// `count` hourly samples ending now
fn synthetic_series(count: usize) -> Vec<Reading> {
    let now = Utc::now();
    let mut rng = rand::thread_rng();

    (0..count)
        .map(|i| {
            let hours_back = (count - 1 - i) as i64;
            Reading {
                timestamp: now - Duration::hours(hours_back),
                voltage: SYNTHETIC_VOLTAGE,
                current: rng.gen_range(3.0..5.0),
                state: OutletState::On,
            }
        })
        .collect()
}
