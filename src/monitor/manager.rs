//! Lifecycle owner for the monitoring components.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::cycle::MonitorContext;
use super::relay::MessageRelay;
use super::snapshot::StatusSnapshot;
use super::stats::PerformanceStats;
use super::strategy::{self, MonitoringStrategy};
use super::types::{MonitorCycleResult, MonitorStatus};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::tmux::TerminalInterface;

/// Where the manager is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Initializing => "initializing",
            ManagerState::Running => "running",
            ManagerState::Stopping => "stopping",
            ManagerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns every component and runs cycles through the configured strategy.
///
/// Cycles take `&mut self`, so two can never overlap.
pub struct ComponentManager {
    state: ManagerState,
    ctx: MonitorContext,
    strategy: Box<dyn MonitoringStrategy>,
}

impl ComponentManager {
    pub fn new(terminal: Arc<dyn TerminalInterface>, config: MonitorConfig) -> Self {
        let strategy = strategy::for_kind(config.strategy);
        Self {
            state: ManagerState::Uninitialized,
            ctx: MonitorContext::new(terminal, config),
            strategy,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn MessageRelay>) -> Self {
        self.ctx.notifications.set_relay(relay);
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn MonitoringStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Bring components up in dependency order. The first failure aborts
    /// startup and leaves the manager stopped.
    pub async fn initialize(&mut self) -> Result<(), MonitorError> {
        self.state = ManagerState::Initializing;
        info!(strategy = self.strategy.name(), "Initializing monitor");

        if let Err(e) = self.ctx.config.validate() {
            self.state = ManagerState::Stopped;
            return Err(e);
        }

        let agents = match self.ctx.agent_monitor.initialize().await {
            Ok(agents) => agents,
            Err(e) => return Err(self.fail("agent monitor", &e)),
        };

        if let Err(e) = self.ctx.notifications.initialize().await {
            return Err(self.fail("notification manager", &e));
        }

        if !self.ctx.state_tracker.initialize() {
            return Err(self.fail(
                "state tracker",
                &anyhow::anyhow!("tracker refused to start"),
            ));
        }

        self.ctx.running = true;
        self.ctx.started_at = Instant::now();
        self.state = ManagerState::Running;
        info!(agents, "Monitor running");
        Ok(())
    }

    fn fail(&mut self, component: &'static str, err: &anyhow::Error) -> MonitorError {
        warn!(component, error = %err, "Initialization failed");
        self.state = ManagerState::Stopped;
        MonitorError::init(component, err)
    }

    /// Run one cycle. Never fails; when the manager isn't running the result
    /// carries a single `NotRunning` error.
    pub async fn execute_monitoring_cycle(&mut self) -> MonitorCycleResult {
        if self.state != ManagerState::Running {
            return MonitorCycleResult {
                errors: vec![MonitorError::NotRunning(self.state).to_string()],
                ..Default::default()
            };
        }

        self.strategy.execute(&mut self.ctx).await;
        self.ctx.last_result.clone().unwrap_or_default()
    }

    pub fn get_status(&self) -> MonitorStatus {
        self.ctx.status()
    }

    pub fn performance_stats(&self) -> &PerformanceStats {
        &self.ctx.stats
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    /// Deliver whatever is still queued, then stop.
    pub async fn stop(&mut self) {
        if matches!(self.state, ManagerState::Stopped | ManagerState::Uninitialized) {
            self.state = ManagerState::Stopped;
            return;
        }

        self.state = ManagerState::Stopping;
        let pending = self.ctx.notifications.pending_count();
        if pending > 0 {
            let sent = self.ctx.notifications.send_queued().await;
            info!(pending, sent, "Flushed alerts before shutdown");
        }
        self.ctx.running = false;
        self.state = ManagerState::Stopped;
        info!(cycles = self.ctx.stats.cycles_completed, "Monitor stopped");
    }

    /// Shut an agent down and forget everything tracked about it
    pub async fn terminate_agent(&mut self, target: &str) -> Result<()> {
        self.ctx.agent_monitor.terminate_agent(target).await?;
        self.ctx.state_tracker.reset_agent_state(target);
        self.ctx.verdicts.remove(target);
        Ok(())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::capture(&self.ctx, self.state.as_str())
    }
}
