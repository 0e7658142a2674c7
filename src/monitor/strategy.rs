//! Swappable per-cycle algorithms.

use async_trait::async_trait;
use std::time::Instant;

use super::cycle::MonitorContext;
use super::types::{AgentInfo, IdleType, MonitorCycleResult, MonitorStatus};
use crate::config::StrategyKind;

/// A full monitoring pass over a context
#[async_trait]
pub trait MonitoringStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one cycle. Must not fail: problems go into the cycle's error list,
    /// available afterwards as `ctx.last_result`.
    async fn execute(&self, ctx: &mut MonitorContext) -> MonitorStatus;
}

/// Build the strategy selected in config
pub fn for_kind(kind: StrategyKind) -> Box<dyn MonitoringStrategy> {
    match kind {
        StrategyKind::Polling => Box::new(PollingStrategy),
        StrategyKind::SupervisorFirst => Box::new(SupervisorFirstStrategy),
    }
}

/// Agents in discovery order, then team idle, then supervisors
pub struct PollingStrategy;

#[async_trait]
impl MonitoringStrategy for PollingStrategy {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn execute(&self, ctx: &mut MonitorContext) -> MonitorStatus {
        let started = Instant::now();
        let mut result = MonitorCycleResult::default();

        let discovery = ctx.discover(&mut result).await;
        for agent in &discovery.agents {
            ctx.process_agent(agent, &mut result).await;
        }

        let sessions = ctx.active_sessions();
        ctx.evaluate_team_idle(&sessions);
        ctx.check_supervisors(&sessions, &mut result).await;
        ctx.flush(&mut result).await;

        ctx.finish(result, started)
    }
}

/// Supervisors first, then agents that needed attention last cycle.
///
/// A dead PM blocks every recovery, so its alert goes out even when agent
/// sampling runs long.
pub struct SupervisorFirstStrategy;

impl SupervisorFirstStrategy {
    /// Erroring agents first, fresh next, everything else in discovery order
    fn order(ctx: &MonitorContext, agents: &[AgentInfo]) -> Vec<AgentInfo> {
        let rank = |agent: &AgentInfo| match ctx.verdicts.get(&agent.target) {
            Some(v) if v.agent_error() => 0,
            Some(v) if v.idle_type == IdleType::Fresh => 1,
            _ => 2,
        };
        let mut ordered = agents.to_vec();
        ordered.sort_by_key(|agent| rank(agent));
        ordered
    }
}

#[async_trait]
impl MonitoringStrategy for SupervisorFirstStrategy {
    fn name(&self) -> &'static str {
        "supervisor_first"
    }

    async fn execute(&self, ctx: &mut MonitorContext) -> MonitorStatus {
        let started = Instant::now();
        let mut result = MonitorCycleResult::default();

        let discovery = ctx.discover(&mut result).await;
        let sessions = ctx.active_sessions();
        ctx.check_supervisors(&sessions, &mut result).await;

        for agent in Self::order(ctx, &discovery.agents) {
            ctx.process_agent(&agent, &mut result).await;
        }

        ctx.evaluate_team_idle(&sessions);
        ctx.flush(&mut result).await;

        ctx.finish(result, started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::types::{AgentRole, AgentStatus, IdleAnalysis};
    use crate::tmux::mock::MockTerminal;
    use crate::tmux::ErrorKind;
    use std::sync::Arc;

    fn agent(target: &str) -> AgentInfo {
        AgentInfo {
            target: target.to_string(),
            session: "s".to_string(),
            window: 0,
            name: target.to_string(),
            role: AgentRole::Developer,
            status: AgentStatus::Unknown,
        }
    }

    #[test]
    fn test_for_kind() {
        assert_eq!(for_kind(StrategyKind::Polling).name(), "polling");
        assert_eq!(for_kind(StrategyKind::SupervisorFirst).name(), "supervisor_first");
    }

    #[test]
    fn test_supervisor_first_orders_by_last_verdict() {
        let terminal = Arc::new(MockTerminal::new());
        let mut ctx = MonitorContext::new(terminal, MonitorConfig::for_tests());

        let mut erroring = IdleAnalysis::failed("x");
        erroring.error_kind = Some(ErrorKind::RateLimit);
        let mut fresh = IdleAnalysis::failed("x");
        fresh.error_detected = false;
        fresh.error_kind = None;
        fresh.idle_type = IdleType::Fresh;

        ctx.verdicts.insert("s:3".to_string(), erroring);
        ctx.verdicts.insert("s:2".to_string(), fresh);

        let agents = vec![agent("s:1"), agent("s:2"), agent("s:3"), agent("s:4")];
        let ordered: Vec<String> = SupervisorFirstStrategy::order(&ctx, &agents)
            .into_iter()
            .map(|a| a.target)
            .collect();
        assert_eq!(ordered, vec!["s:3", "s:2", "s:1", "s:4"]);
    }
}
