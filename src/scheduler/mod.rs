//! Scheduler module for running canary passes.
//!
//! Nodes share one radio and one mailbox, so a pass probes them strictly
//! one after another. Passes repeat until the configured count is reached,
//! or forever in daemon mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;

use crate::config::{CanaryConfig, Node};
use crate::health::{CanaryState, PassResult, RunMode, Transition};
use crate::mail::MailClient;
use crate::probe::Prober;

/// Alerts go to their own target so they can be routed separately.
pub const ALERT_TARGET: &str = "relay_canary::alert";

/// The main scheduler that orchestrates canary passes.
pub struct Scheduler<M: MailClient> {
    prober: Prober<M>,
    mail: Arc<M>,
    state: CanaryState,
    nodes: Vec<Node>,
    /// None runs until the process is stopped.
    max_passes: Option<u32>,
    next_pass_delay: Duration,
    pre_pass_hook: Option<PathBuf>,
    post_pass_hook: Option<PathBuf>,
}

impl<M: MailClient> Scheduler<M> {
    pub fn new(
        cfg: &CanaryConfig,
        prober: Prober<M>,
        mail: Arc<M>,
        state: CanaryState,
        max_passes: Option<u32>,
    ) -> Self {
        Self {
            prober,
            mail,
            state,
            nodes: cfg.nodes.clone(),
            max_passes,
            next_pass_delay: Duration::from_secs(cfg.next_pass_delay),
            pre_pass_hook: cfg.pre_pass_hook.clone(),
            post_pass_hook: cfg.post_pass_hook.clone(),
        }
    }

    /// Run passes until the pass budget is spent.
    pub async fn run(&self) {
        match self.max_passes {
            Some(n) => tracing::info!("Starting canary: {} pass(es) over {} node(s)", n, self.nodes.len()),
            None => tracing::info!("Starting canary daemon over {} node(s)", self.nodes.len()),
        }

        let mut pass: u32 = 0;
        while self.max_passes.map_or(true, |max| pass < max) {
            if pass > 0 {
                self.sleep_between_passes(pass).await;
            }
            pass += 1;
            self.run_pass(pass).await;
        }

        self.state.set_mode(RunMode::Finished).await;
        tracing::info!("Canary finished after {} pass(es)", pass);
    }

    async fn sleep_between_passes(&self, pass: u32) {
        let delay = self.next_pass_delay;
        tracing::info!("Pass {} done. Sleeping {}s before the next", pass, delay.as_secs());
        self.state.begin_sleep(delay.as_secs()).await;
        tokio::time::sleep(delay).await;
    }

    /// Probe every node once, publish the results and tidy the mailbox.
    pub async fn run_pass(&self, pass: u32) -> Vec<Transition> {
        tracing::info!("Beginning pass {}", pass);
        self.state.begin_pass(pass).await;

        if let Some(hook) = &self.pre_pass_hook {
            run_hook("pre-pass", hook, pass).await;
        }

        let mut results = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            self.state.probing(&node.name).await;
            let outcome = self.prober.check_health(node).await;
            results.push(PassResult {
                node: node.name.clone(),
                outcome,
                at: Utc::now(),
            });
        }

        let transitions = self.state.complete_pass(&results).await;
        report(&transitions);

        if let Err(e) = self.mail.clear_inbox() {
            tracing::error!("Failed to clear inbox: {}", e);
        }
        if let Err(e) = self.mail.clear_sent() {
            tracing::error!("Failed to clear sent folder: {}", e);
        }

        if let Some(hook) = &self.post_pass_hook {
            run_hook("post-pass", hook, pass).await;
        }

        transitions
    }
}

fn report(transitions: &[Transition]) {
    for t in transitions {
        tracing::warn!(
            target: ALERT_TARGET,
            node = %t.node,
            peer = %t.peer,
            from = %t.from,
            to = %t.to,
            "Node {} ({}) changed from {} to {}",
            t.node,
            t.peer,
            t.from,
            t.to
        );
    }
}

/// Hooks are best effort: failures are logged and the pass carries on.
async fn run_hook(kind: &str, hook: &Path, pass: u32) {
    tracing::info!("Running {} hook {}", kind, hook.display());
    let status = Command::new(hook)
        .env("CANARY_PASS", pass.to_string())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::error!("{} hook {} exited with {}", kind, hook.display(), status),
        Err(e) => tracing::error!("Could not run {} hook {}: {}", kind, hook.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, PollConfig};
    use crate::health::{HealthState, Sample};
    use crate::mail::FakeMail;
    use crate::probe::ProbeOutcome;
    use crate::radio::{share, FakeRig};

    const CONFIG: &str = r#"{
        "pat_call": "N0CALL",
        "rx_aux_call": "N0CALL-1",
        "mailbox_base_path": "/tmp/mailbox",
        "rig_port": "/dev/ttyUSB0",
        "rig_port_speed": 19200,
        "rig_model": "TAIT",
        "health_window_size": 2,
        "history_size": 4,
        "unhealthy_threshold": 2,
        "fetch_retry_interval_seconds": 0,
        "fetch_retries_count": 2,
        "next_pass_delay": 0,
        "nodes": [
            { "name": "Hilltop", "frequency": 440.35, "peer": "K7HIL-10" },
            { "name": "Ridge", "frequency": 145.05, "peer": "K7RDG-10", "channel": 4 }
        ]
    }"#;

    struct Harness {
        scheduler: Scheduler<FakeMail>,
        mail: Arc<FakeMail>,
        rig: FakeRig,
        state: CanaryState,
    }

    fn harness(cfg: CanaryConfig, max_passes: Option<u32>) -> Harness {
        let mail = Arc::new(FakeMail::new());
        let rig = FakeRig::new();
        let state = CanaryState::new(&cfg.nodes, cfg.health, max_passes);
        let prober = Prober::new(mail.clone(), share(Box::new(rig.clone())), &cfg.mail, cfg.poll);
        let scheduler = Scheduler::new(&cfg, prober, mail.clone(), state.clone(), max_passes);
        Harness {
            scheduler,
            mail,
            rig,
            state,
        }
    }

    fn config() -> CanaryConfig {
        CanaryConfig::from_json(CONFIG).unwrap()
    }

    #[test]
    fn test_fixture_config() {
        let cfg = config();
        assert_eq!(
            cfg.health,
            HealthConfig {
                window_size: 2,
                history_size: 4,
                unhealthy_threshold: 2
            }
        );
        assert_eq!(
            cfg.poll,
            PollConfig {
                retry_interval_seconds: 0,
                retries: 2
            }
        );
    }

    #[tokio::test]
    async fn test_passes_in_order() {
        let h = harness(config(), Some(3));
        h.mail.take_down("K7RDG-10");

        h.scheduler.run().await;

        let snap = h.state.snapshot().await;
        assert_eq!(snap.schedule.mode, RunMode::Finished);
        assert_eq!(snap.schedule.pass, 3);
        assert_eq!(snap.nodes[0].state, HealthState::Healthy);
        assert_eq!(snap.nodes[0].history, vec![Sample::Pass; 3]);
        assert_eq!(snap.nodes[1].state, HealthState::Unhealthy);
        assert_eq!(snap.nodes[1].history_glyphs, "---");

        assert_eq!(
            h.mail.sends(),
            vec!["K7HIL-10", "K7RDG-10", "K7HIL-10", "K7RDG-10", "K7HIL-10", "K7RDG-10"]
        );
        assert_eq!(h.rig.tuned()[..2], ["440350000 Hz".to_string(), "channel 4".to_string()]);
        assert_eq!(h.mail.inbox_len(), 0);
        assert_eq!(h.mail.sent_len(), 0);
    }

    #[tokio::test]
    async fn test_zero_passes_sends_nothing() {
        let h = harness(config(), Some(0));

        h.scheduler.run().await;

        assert!(h.mail.sends().is_empty());
        assert!(h.mail.composed().is_empty());
        assert!(h.rig.tuned().is_empty());
        let snap = h.state.snapshot().await;
        assert_eq!(snap.schedule.mode, RunMode::Finished);
        assert_eq!(snap.schedule.pass, 0);
    }

    #[tokio::test]
    async fn test_transitions_reported_once() {
        let h = harness(config(), None);

        let first = h.scheduler.run_pass(1).await;
        assert!(first.is_empty());
        let second = h.scheduler.run_pass(2).await;
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|t| t.to == HealthState::Healthy));

        h.mail.take_down("K7HIL-10");
        assert!(h.scheduler.run_pass(3).await.is_empty());
        let fourth = h.scheduler.run_pass(4).await;
        assert_eq!(
            fourth,
            vec![Transition {
                node: "Hilltop".to_string(),
                peer: "K7HIL-10".to_string(),
                from: HealthState::Healthy,
                to: HealthState::Unhealthy,
            }]
        );
        assert!(h.scheduler.run_pass(5).await.is_empty());
    }

    #[tokio::test]
    async fn test_local_fault_skips_history() {
        let h = harness(config(), Some(1));
        h.rig.fail_everything();

        h.scheduler.run().await;

        let snap = h.state.snapshot().await;
        for node in &snap.nodes {
            assert!(node.history.is_empty());
            assert!(matches!(node.last_outcome, Some(ProbeOutcome::LocalFault(_))));
            assert_eq!(node.state, HealthState::Pending);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hooks_see_pass_number() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let log = tmp.path().join("hooks.log");
        let hook = |name: &str, exit: i32| {
            let path = tmp.path().join(name);
            fs::write(
                &path,
                format!("#!/bin/sh\necho \"{} $CANARY_PASS\" >> {}\nexit {}\n", name, log.display(), exit),
            )
            .unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        let mut cfg = config();
        cfg.pre_pass_hook = Some(hook("pre", 0));
        // A failing hook must not stop the run
        cfg.post_pass_hook = Some(hook("post", 1));
        let h = harness(cfg, Some(2));

        h.scheduler.run().await;

        let lines = fs::read_to_string(&log).unwrap();
        assert_eq!(lines, "pre 1\npost 1\npre 2\npost 2\n");
        assert_eq!(h.state.snapshot().await.schedule.pass, 2);
    }

    #[tokio::test]
    async fn test_missing_hook_is_not_fatal() {
        let mut cfg = config();
        cfg.pre_pass_hook = Some(PathBuf::from("/nonexistent/hook"));
        let h = harness(cfg, Some(1));

        h.scheduler.run().await;
        assert_eq!(h.mail.sends().len(), 2);
    }
}
