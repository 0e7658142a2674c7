use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

mod actions;
mod app;

use actions::Action;
use agent_sentinel::monitor::StatusSnapshot;
use agent_sentinel::{ComponentManager, MonitorConfig, TmuxClient};
use app::App;

#[derive(Parser, Debug)]
#[command(name = "agent-sentinel")]
#[command(about = "Watches AI coding agents in tmux and reports to their project manager")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between monitoring cycles
    #[arg(short, long)]
    interval: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Where to write the status snapshot
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the latest status snapshot and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = MonitorConfig::load(args.config.as_deref())?;
    if let Some(secs) = args.interval {
        config.cycle_interval_secs = secs;
    }
    config.validate()?;

    let snapshot_path = args.snapshot.clone().or_else(|| {
        if config.snapshot.enabled {
            config.snapshot_path()
        } else {
            None
        }
    });

    if args.status {
        let path = snapshot_path.context("No status snapshot location configured")?;
        let max_age = Duration::from_secs(config.snapshot.max_age_secs);
        let snapshot = StatusSnapshot::load_fresh(&path, max_age)
            .await
            .with_context(|| format!("No fresh status at {}; is the monitor running?", path.display()))?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let client = TmuxClient::new();
    if !client.is_server_running().await {
        warn!("No tmux server is running");
    }

    let interval = config.cycle_interval();
    let mut manager = ComponentManager::new(Arc::new(client), config);
    manager.initialize().await?;
    info!(
        strategy = manager.strategy_name(),
        interval_secs = interval.as_secs(),
        "Monitoring started"
    );

    let mut app = App::new(manager, snapshot_path);

    if args.once {
        app.handle_action(Action::Tick).await?;
        app.handle_action(Action::Shutdown).await?;
        return Ok(());
    }

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Spawn shutdown listener
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = signal_tx.send(Action::Shutdown);
            }
            Err(e) => {
                let _ = signal_tx.send(Action::Error(format!("Signal handler: {}", e)));
            }
        }
    });

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Main event loop
    loop {
        let action = tokio::select! {
            _ = ticker.tick() => Action::Tick,
            Some(action) = rx.recv() => action,
        };

        if app.handle_action(action).await? {
            break;
        }
    }

    drop(tx);
    Ok(())
}
