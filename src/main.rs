//! Relay Canary - end-to-end health monitor for RF mail relay nodes.
//!
//! Each pass sends a tagged message through every configured node over RF,
//! then watches for it to come back over the internet. Nodes that stop
//! relaying are flagged once enough probes in the health window fail.

mod config;
mod health;
mod mail;
mod probe;
mod radio;
mod scheduler;
mod web;

use config::CanaryConfig;
use health::CanaryState;
use mail::PatClient;
use probe::Prober;
use radio::Rig;
use scheduler::Scheduler;
use web::Server;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pause between commands during the radio test.
const RADIO_TEST_COMMAND_GAP: Duration = Duration::from_millis(100);

/// Probe RF mail relay nodes end to end and report their health.
#[derive(Debug, Parser)]
#[command(name = "relay-canary", version, long_about = None)]
struct Args {
    /// JSON configuration file.
    config: PathBuf,

    /// Only test these nodes (by name or peer call).
    nodes: Vec<String>,

    /// Run passes until stopped.
    #[arg(short, long)]
    daemon: bool,

    /// Number of passes to run when not a daemon.
    #[arg(short, long, default_value_t = 10)]
    count: u32,

    /// Seconds between passes, overriding the config file.
    #[arg(long)]
    next_pass_delay: Option<u64>,

    /// List the configured nodes and exit.
    #[arg(short, long)]
    list: bool,

    /// Stress the radio control channel instead of probing nodes.
    #[arg(long)]
    radio_test: bool,

    /// Do not serve the status pages.
    #[arg(long)]
    no_web: bool,

    /// More logging (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(format!("relay_canary={}", level).parse()?))
        .init();

    // Load configuration
    let mut cfg = CanaryConfig::load(&args.config)?;
    cfg.override_next_pass_delay(args.next_pass_delay);
    cfg.retain_nodes(&args.nodes);

    if args.list {
        for node in &cfg.nodes {
            println!("{:<20} {:<12} {}", node.name, node.peer, node.describe_tuning());
        }
        return Ok(());
    }
    if cfg.nodes.is_empty() {
        return Err("no nodes selected to test".into());
    }

    tracing::info!("Using {} node(s) from {}", cfg.nodes.len(), args.config.display());
    let rig = radio::build_rig(&cfg.rig)?;
    tracing::info!("Radio backend: {}", rig.backend());

    if args.radio_test {
        return radio_test(rig, cfg, args.count).await;
    }

    let max_passes = (!args.daemon).then_some(args.count);
    let cfg = Arc::new(cfg);
    let state = CanaryState::new(&cfg.nodes, cfg.health, max_passes);

    if !args.no_web {
        let server = Server::new(cfg.clone(), state.clone());
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                tracing::error!("Web server stopped: {}", e);
            }
        });
    }

    let mail = Arc::new(PatClient::new(&cfg.mail));
    let prober = Prober::new(mail.clone(), radio::share(rig), &cfg.mail, cfg.poll);
    let scheduler = Scheduler::new(&cfg, prober, mail, state, max_passes);
    scheduler.run().await;

    Ok(())
}

/// Tune through every node `passes` times, then report what the driver
/// had to retry.
async fn radio_test(
    mut rig: Box<dyn Rig>,
    cfg: CanaryConfig,
    passes: u32,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let between_passes = Duration::from_secs(cfg.next_pass_delay);
    let report = tokio::task::spawn_blocking(move || {
        radio::exercise(
            rig.as_mut(),
            &cfg.nodes,
            passes,
            RADIO_TEST_COMMAND_GAP,
            between_passes,
        )
    })
    .await?;

    println!(
        "Radio test complete: {} command(s), {} failure(s), {} retries from {} pass(es)",
        report.commands, report.failures, report.retries, report.passes
    );
    Ok(())
}
