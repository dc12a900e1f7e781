//! Shared canary state: the schedule and every node's health.
//!
//! The scheduler is the only writer. Pass results are published under a
//! single write lock, so a reader never sees a half-classified pass.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::history::{classify, HealthHistory, HealthState, Sample};
use crate::config::{HealthConfig, Node};
use crate::probe::ProbeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    Starting,
    Probing,
    Sleeping,
    Finished,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Starting => "STARTING",
            RunMode::Probing => "PROBING",
            RunMode::Sleeping => "SLEEPING",
            RunMode::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct ScheduleStatus {
    mode: RunMode,
    pass: u32,
    /// None runs until the process is stopped.
    max_passes: Option<u32>,
    started: DateTime<Utc>,
    current_node: Option<String>,
    sleep_started: Option<DateTime<Utc>>,
    sleep_seconds: u64,
}

#[derive(Debug, Clone)]
struct NodeHealth {
    node: Node,
    history: HealthHistory,
    state: HealthState,
    last_healthy: Option<DateTime<Utc>>,
    last_checked: Option<DateTime<Utc>>,
    last_outcome: Option<ProbeOutcome>,
}

struct Inner {
    schedule: ScheduleStatus,
    nodes: Vec<NodeHealth>,
}

/// One probe result, ready to publish.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub node: String,
    pub outcome: ProbeOutcome,
    pub at: DateTime<Utc>,
}

/// A node whose classification changed at the end of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub node: String,
    pub peer: String,
    pub from: HealthState,
    pub to: HealthState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub mode: RunMode,
    pub pass: u32,
    pub max_passes: Option<u32>,
    pub started: DateTime<Utc>,
    pub current_node: Option<String>,
    /// Set only while sleeping between passes.
    pub sleep_started: Option<DateTime<Utc>>,
    pub sleep_remaining_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub name: String,
    pub peer: String,
    pub tuning: String,
    pub state: HealthState,
    pub history: Vec<Sample>,
    pub history_glyphs: String,
    pub last_healthy: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_outcome: Option<ProbeOutcome>,
}

/// A consistent copy of everything the status surface shows.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub schedule: ScheduleView,
    pub nodes: Vec<NodeView>,
}

#[derive(Clone)]
pub struct CanaryState {
    inner: Arc<RwLock<Inner>>,
    health: HealthConfig,
}

impl CanaryState {
    pub fn new(nodes: &[Node], health: HealthConfig, max_passes: Option<u32>) -> Self {
        let nodes = nodes
            .iter()
            .map(|node| NodeHealth {
                node: node.clone(),
                history: HealthHistory::new(health.history_size),
                state: HealthState::Pending,
                last_healthy: None,
                last_checked: None,
                last_outcome: None,
            })
            .collect();

        Self {
            inner: Arc::new(RwLock::new(Inner {
                schedule: ScheduleStatus {
                    mode: RunMode::Starting,
                    pass: 0,
                    max_passes,
                    started: Utc::now(),
                    current_node: None,
                    sleep_started: None,
                    sleep_seconds: 0,
                },
                nodes,
            })),
            health,
        }
    }

    pub async fn set_mode(&self, mode: RunMode) {
        let mut inner = self.inner.write().await;
        inner.schedule.mode = mode;
        if mode != RunMode::Probing {
            inner.schedule.current_node = None;
        }
    }

    pub async fn begin_pass(&self, pass: u32) {
        let mut inner = self.inner.write().await;
        inner.schedule.mode = RunMode::Probing;
        inner.schedule.pass = pass;
        inner.schedule.sleep_started = None;
        inner.schedule.sleep_seconds = 0;
    }

    pub async fn probing(&self, node: &str) {
        self.inner.write().await.schedule.current_node = Some(node.to_string());
    }

    pub async fn begin_sleep(&self, seconds: u64) {
        let mut inner = self.inner.write().await;
        inner.schedule.mode = RunMode::Sleeping;
        inner.schedule.current_node = None;
        inner.schedule.sleep_started = Some(Utc::now());
        inner.schedule.sleep_seconds = seconds;
    }

    /// Fold a pass's results into history, reclassify every node and return
    /// the nodes whose classification changed.
    ///
    /// Local faults are remembered as the last outcome but never enter the
    /// history.
    pub async fn complete_pass(&self, results: &[PassResult]) -> Vec<Transition> {
        let mut inner = self.inner.write().await;

        for result in results {
            let Some(entry) = inner.nodes.iter_mut().find(|n| n.node.name == result.node) else {
                tracing::warn!("Result for unknown node {} dropped", result.node);
                continue;
            };

            if let Some(sample) = result.outcome.sample() {
                entry.history.push(sample);
            }
            if result.outcome == ProbeOutcome::Healthy {
                entry.last_healthy = Some(result.at);
            }
            entry.last_checked = Some(result.at);
            entry.last_outcome = Some(result.outcome.clone());
        }

        let mut transitions = Vec::new();
        for entry in inner.nodes.iter_mut() {
            let state = classify(&entry.history, &self.health);
            if state != entry.state {
                transitions.push(Transition {
                    node: entry.node.name.clone(),
                    peer: entry.node.peer.clone(),
                    from: entry.state,
                    to: state,
                });
                entry.state = state;
            }
        }
        inner.schedule.current_node = None;
        transitions
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        let schedule = &inner.schedule;

        let sleep_started = schedule
            .sleep_started
            .filter(|_| schedule.mode == RunMode::Sleeping);
        let sleep_remaining_seconds = sleep_started.map(|since| {
            let elapsed = (Utc::now() - since).num_seconds().max(0) as u64;
            schedule.sleep_seconds.saturating_sub(elapsed)
        });

        StatusSnapshot {
            schedule: ScheduleView {
                mode: schedule.mode,
                pass: schedule.pass,
                max_passes: schedule.max_passes,
                started: schedule.started,
                current_node: schedule.current_node.clone(),
                sleep_started,
                sleep_remaining_seconds,
            },
            nodes: inner
                .nodes
                .iter()
                .map(|n| NodeView {
                    name: n.node.name.clone(),
                    peer: n.node.peer.clone(),
                    tuning: n.node.describe_tuning(),
                    state: n.state,
                    history: n.history.samples(),
                    history_glyphs: n.history.render(),
                    last_healthy: n.last_healthy,
                    last_checked: n.last_checked,
                    last_outcome: n.last_outcome.clone(),
                })
                .collect(),
        }
    }
}
