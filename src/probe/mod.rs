//! Probe cycle.
//!
//! A probe is a mail with a fresh random subject. It is queued locally,
//! pushed over RF through the node under test, and then looked for in the
//! inbox via the internet path. Seeing the subject come back proves the
//! node relayed it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{MailConfig, Node, PollConfig};
use crate::health::Sample;
use crate::mail::{MailClient, MailError, Outgoing};
use crate::radio::{tune, RadioError, SharedRig};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("local rig failure: {0}")]
    LocalRig(#[from] RadioError),
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error("probe {token} not seen after {attempts} fetch(es)")]
    Unreachable { token: String, attempts: u32 },
    #[error("radio task failed: {0}")]
    Join(String),
}

impl ProbeError {
    /// Whether the fault lies on this side of the RF link.
    pub fn is_local(&self) -> bool {
        matches!(self, ProbeError::LocalRig(_) | ProbeError::Join(_))
    }
}

/// The result of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
    /// Something local broke; says nothing about the node.
    LocalFault(String),
}

impl ProbeOutcome {
    /// The history sample this outcome contributes, if any.
    pub fn sample(&self) -> Option<Sample> {
        match self {
            ProbeOutcome::Healthy => Some(Sample::Pass),
            ProbeOutcome::Unhealthy(_) => Some(Sample::Fail),
            ProbeOutcome::LocalFault(_) => None,
        }
    }
}

impl From<&ProbeError> for ProbeOutcome {
    fn from(err: &ProbeError) -> Self {
        if err.is_local() {
            ProbeOutcome::LocalFault(err.to_string())
        } else {
            ProbeOutcome::Unhealthy(err.to_string())
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Healthy => f.write_str("healthy"),
            ProbeOutcome::Unhealthy(reason) => write!(f, "unhealthy: {}", reason),
            ProbeOutcome::LocalFault(reason) => write!(f, "local fault: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Probe {
    pub token: String,
    pub issued: DateTime<Utc>,
}

impl Probe {
    pub fn new() -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            issued: Utc::now(),
        }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait before fetch number `attempt` (zero-based).
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Runs health checks against relay nodes.
pub struct Prober<M: MailClient> {
    mail: Arc<M>,
    rig: SharedRig,
    to: String,
    reply_to: String,
    poll: PollConfig,
    dedicated_mailbox: bool,
}

impl<M: MailClient> Prober<M> {
    pub fn new(mail: Arc<M>, rig: SharedRig, cfg: &MailConfig, poll: PollConfig) -> Self {
        Self {
            mail,
            rig,
            to: cfg.rx_aux_call.clone(),
            reply_to: cfg.sender.clone(),
            poll,
            dedicated_mailbox: cfg.dedicated_mailbox,
        }
    }

    /// Probe `node` once and classify the result.
    pub async fn check_health(&self, node: &Node) -> ProbeOutcome {
        match self.probe(node).await {
            Ok(()) => {
                tracing::info!("Node {} ({}) is relaying", node.name, node.peer);
                ProbeOutcome::Healthy
            }
            Err(e) if e.is_local() => {
                tracing::error!("Local fault while checking {} ({}): {}", node.name, node.peer, e);
                ProbeOutcome::from(&e)
            }
            Err(e) => {
                tracing::warn!("Check of {} ({}) failed: {}", node.name, node.peer, e);
                ProbeOutcome::from(&e)
            }
        }
    }

    async fn probe(&self, node: &Node) -> Result<(), ProbeError> {
        self.prepare_outbox()?;

        let probe = match self.send_probe(node).await {
            Ok(probe) => probe,
            Err(e) => {
                tracing::error!("Failed to transmit probe to {}", node.name);
                if let Err(clear) = self.mail.clear_outbox() {
                    tracing::error!("Could not clear outbox: {}", clear);
                }
                return Err(e);
            }
        };

        self.poll_for_probe(&probe).await
    }

    /// A dedicated mailbox is swept; a shared one must already be empty.
    fn prepare_outbox(&self) -> Result<(), ProbeError> {
        if self.dedicated_mailbox {
            self.mail.clear_outbox()?;
            return Ok(());
        }
        match self.mail.outbox_len()? {
            0 => Ok(()),
            count => Err(MailError::MailboxNotEmpty { count }.into()),
        }
    }

    /// Queue a probe, tune to the node and push it over RF.
    pub async fn send_probe(&self, node: &Node) -> Result<Probe, ProbeError> {
        let probe = Probe::new();

        tracing::info!("Composing {} to {} at {}", probe.token, node.name, probe.issued);
        self.mail
            .compose(&Outgoing {
                subject: probe.token.clone(),
                to: self.to.clone(),
                reply_to: self.reply_to.clone(),
                body: format!(
                    "Canary message sent to {} on {} at {}",
                    node.name,
                    node.describe_tuning(),
                    probe.issued.to_rfc3339()
                ),
            })
            .await?;

        tracing::info!("Composed. Tuning to {}", node.describe_tuning());
        let rig = self.rig.clone();
        let target = node.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = rig.lock().map_err(|_| RadioError::Poisoned)?;
            tune(&mut **guard, &target)
        })
        .await
        .map_err(|e| ProbeError::Join(e.to_string()))??;

        self.mail.send_over_rf(&node.peer).await?;

        let stuck = self.mail.outbox_len()?;
        if stuck > 0 {
            return Err(MailError::MailboxNotEmpty { count: stuck }.into());
        }

        tracing::info!("Sent {} via {}", probe.token, node.peer);
        Ok(probe)
    }

    /// Fetch with exponential backoff until the probe shows up.
    pub async fn poll_for_probe(&self, probe: &Probe) -> Result<(), ProbeError> {
        let base = Duration::from_secs(self.poll.retry_interval_seconds);

        for attempt in 0..self.poll.retries {
            let wait = backoff(base, attempt);
            tracing::info!(
                "Try {} to fetch probe {}. Sleeping {:?} first",
                attempt + 1,
                probe.token,
                wait
            );
            tokio::time::sleep(wait).await;

            if let Err(e) = self.mail.fetch().await {
                tracing::warn!("Fetch failed: {}", e);
                continue;
            }

            if self.mail.inbound_subjects()?.contains(&probe.token) {
                tracing::info!("Probe {} found", probe.token);
                return Ok(());
            }
            tracing::debug!("Probe {} not found yet", probe.token);
        }

        tracing::warn!("Giving up on probe {}", probe.token);
        Err(ProbeError::Unreachable {
            token: probe.token.clone(),
            attempts: self.poll.retries,
        })
    }
}
