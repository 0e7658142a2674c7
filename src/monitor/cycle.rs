//! One monitoring pass: discover, analyze, track, decide, notify.
//!
//! `MonitorContext` owns every component and exposes the cycle as a set of
//! steps. Strategies decide the order in which the steps and agents run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::agent_monitor::{AgentMonitor, Discovery};
use super::crash::CrashDetector;
use super::notifications::NotificationManager;
use super::state_tracker::StateTracker;
use super::stats::PerformanceStats;
use super::types::{
    AgentInfo, AgentRole, AgentState, AgentStatus, IdleAnalysis, IdleType, MonitorCycleResult,
    MonitorStatus, NotificationEvent, NotificationType, META_IDLE_TYPE,
};
use crate::config::MonitorConfig;
use crate::tmux::{BoundedTerminal, ErrorKind, TerminalInterface};

/// Everything a strategy needs to run a cycle
pub struct MonitorContext {
    pub config: MonitorConfig,
    pub terminal: Arc<dyn TerminalInterface>,
    pub agent_monitor: AgentMonitor,
    pub state_tracker: StateTracker,
    pub notifications: NotificationManager,
    pub crash_detector: Arc<CrashDetector>,
    /// Session name to the targets seen in it
    pub sessions: BTreeMap<String, BTreeSet<String>>,
    /// Latest discovery, in discovery order
    pub agents: Vec<AgentInfo>,
    /// Latest verdict per target
    pub verdicts: HashMap<String, IdleAnalysis>,
    /// Whether each session's supervisor passed its last check
    pub supervisor_health: BTreeMap<String, bool>,
    pub stats: PerformanceStats,
    pub last_result: Option<MonitorCycleResult>,
    pub running: bool,
    pub started_at: Instant,
}

impl MonitorContext {
    pub fn new(terminal: Arc<dyn TerminalInterface>, config: MonitorConfig) -> Self {
        let terminal: Arc<dyn TerminalInterface> =
            Arc::new(BoundedTerminal::new(terminal, config.call_timeout()));
        let crash_detector = Arc::new(CrashDetector::new(
            terminal.clone(),
            config.capture_lines,
            config.crash_silence(),
        ));
        let agent_monitor = AgentMonitor::new(
            terminal.clone(),
            crash_detector.clone(),
            config.sampling.clone(),
            config.capture_lines,
        );
        let notifications = NotificationManager::new(terminal.clone(), config.cooldown())
            .with_escalation_target(config.escalation_target.clone())
            .with_submit_enter(config.notifications.submit_with_enter);

        Self {
            config,
            terminal,
            agent_monitor,
            state_tracker: StateTracker::new(),
            notifications,
            crash_detector,
            sessions: BTreeMap::new(),
            agents: Vec::new(),
            verdicts: HashMap::new(),
            supervisor_health: BTreeMap::new(),
            stats: PerformanceStats::new(),
            last_result: None,
            running: false,
            started_at: Instant::now(),
        }
    }

    /// Discover agents, register them, and note agents that went missing.
    pub async fn discover(&mut self, result: &mut MonitorCycleResult) -> Discovery {
        let discovery = self.agent_monitor.discover_detailed().await;
        result.agents_discovered = discovery.agents.len();
        result.errors.extend(discovery.errors.iter().cloned());

        for agent in &discovery.agents {
            self.sessions
                .entry(agent.session.clone())
                .or_default()
                .insert(agent.target.clone());
        }

        self.track_missing(&discovery);

        let current: HashSet<&str> = discovery.agents.iter().map(|a| a.target.as_str()).collect();
        self.verdicts.retain(|target, _| current.contains(target.as_str()));
        self.agents = discovery.agents.clone();
        discovery
    }

    /// Sessions with at least one agent in the latest discovery
    pub fn active_sessions(&self) -> BTreeSet<String> {
        self.agents.iter().map(|a| a.session.clone()).collect()
    }

    fn track_missing(&mut self, discovery: &Discovery) {
        if !discovery.sessions_listed {
            debug!("Session list unavailable, skipping missing-agent tracking");
            return;
        }
        let discovered: HashSet<&str> = discovery.agents.iter().map(|a| a.target.as_str()).collect();
        let tracked: Vec<(String, String)> = self
            .state_tracker
            .tracked_agents()
            .map(|s| (s.target.clone(), s.session.clone()))
            .collect();
        let grace = self.config.missing_grace();

        for (target, session) in tracked {
            if discovered.contains(target.as_str()) {
                self.state_tracker.clear_missing(&target);
                continue;
            }
            // A session we couldn't enumerate says nothing about its agents
            if discovery.failed_sessions.contains(&session) {
                continue;
            }

            self.state_tracker.mark_missing(&target);
            let missing_for = self.state_tracker.missing_duration(&target).unwrap_or_default();
            if missing_for < grace {
                continue;
            }

            warn!(agent = %target, missing_secs = missing_for.as_secs(), "Agent missing, forgetting it");
            self.notifications.queue(NotificationEvent::new(
                NotificationType::AgentMissing,
                &target,
                format!("{} has not been seen for {}s", target, missing_for.as_secs()),
            ));
            self.state_tracker.reset_agent_state(&target);
            if let Some(targets) = self.sessions.get_mut(&session) {
                targets.remove(&target);
                if targets.is_empty() {
                    self.sessions.remove(&session);
                }
            }
        }
    }

    /// Analyze, track and handle one agent. Never fails; problems are
    /// recorded in `result.errors`.
    pub async fn process_agent(&mut self, agent: &AgentInfo, result: &mut MonitorCycleResult) {
        let idle_for = self.tracked_idle(&agent.target);
        let mut analysis = self.agent_monitor.analyze_content(agent, idle_for).await;
        result.agents_analyzed += 1;

        if analysis.analysis_failed() {
            self.state_tracker.record_error(&agent.target);
            let detail = analysis.error_detail.clone().unwrap_or_default();
            result.errors.push(format!("{}: {}", agent.target, detail));
            self.set_verdict(&agent.target, analysis);
            return;
        }

        let state = self.state_tracker.update_state(&agent.target, &analysis.content);
        if analysis.is_idle
            && analysis.idle_type == IdleType::NewlyIdle
            && state.consecutive_no_change > 1
        {
            analysis.idle_type = IdleType::ContinuouslyIdle;
        }

        if analysis.is_idle {
            result.idle_agents += 1;
        } else {
            self.state_tracker.reset_submission_tracking(&agent.target);
        }

        // Handling priority: Error > Idle > Fresh
        if analysis.agent_error() {
            self.handle_error(agent, &analysis, &state).await;
        } else if analysis.is_idle && analysis.idle_type != IdleType::Fresh {
            self.handle_idle(agent, &analysis);
        } else if analysis.idle_type == IdleType::Fresh {
            self.handle_fresh(agent);
        }

        self.set_verdict(&agent.target, analysis);
    }

    /// Store the latest verdict and the status it implies
    fn set_verdict(&mut self, target: &str, analysis: IdleAnalysis) {
        self.verdicts.insert(target.to_string(), analysis);
        let status = self.agent_status(target);
        if let Some(info) = self.agents.iter_mut().find(|a| a.target == target) {
            info.status = status;
        }
    }

    /// Idle duration for targets the tracker currently sees as idle
    fn tracked_idle(&self, target: &str) -> Option<Duration> {
        self.state_tracker
            .is_idle(target)
            .then(|| self.state_tracker.idle_duration(target))
    }

    async fn handle_error(&mut self, agent: &AgentInfo, analysis: &IdleAnalysis, state: &AgentState) {
        self.state_tracker.record_error(&agent.target);
        // The supervisor check owns the PM's health
        if agent.role.is_supervisor() {
            return;
        }

        let kind = analysis.error_kind.unwrap_or(ErrorKind::Crash);
        let detail = analysis.error_detail.clone().unwrap_or_else(|| kind.to_string());

        if kind == ErrorKind::Crash {
            error!(agent = %agent.target, reason = %detail, "Agent crashed");
            self.notifications.queue(
                NotificationEvent::new(
                    NotificationType::Crash,
                    &agent.target,
                    format!("{} ({}) crashed: {}", agent.name, agent.target, detail),
                )
                .with_metadata(META_IDLE_TYPE, analysis.idle_type.as_str())
                .with_metadata("reason", detail),
            );
            return;
        }

        let attempts = state.submission_attempts;
        let max_attempts = self.config.tracking.max_submission_attempts;
        if kind.is_retryable() && attempts < max_attempts {
            let due = state
                .last_submission
                .map(|at| at.elapsed() >= self.config.retry_interval())
                .unwrap_or(true);
            if due {
                self.retry(agent, kind).await;
            }
            return;
        }

        warn!(agent = %agent.target, kind = %kind, attempts, "Agent needs recovery");
        let message = if kind.is_retryable() {
            format!(
                "{} ({}) still failing with {} after {} retries",
                agent.name, agent.target, kind, attempts
            )
        } else {
            format!("{} ({}) stopped: {}", agent.name, agent.target, detail)
        };
        self.notifications.queue(
            NotificationEvent::new(NotificationType::RecoveryNeeded, &agent.target, message)
                .with_metadata(META_IDLE_TYPE, analysis.idle_type.as_str())
                .with_metadata("error_kind", kind.as_str()),
        );
    }

    /// Press Enter to resubmit after a transient API error. Counted even
    /// when the keypress fails so a broken pane can't be retried forever.
    async fn retry(&mut self, agent: &AgentInfo, kind: ErrorKind) {
        let attempt = self.state_tracker.track_submission_attempt(&agent.target);
        info!(agent = %agent.target, kind = %kind, attempt, "Retrying after API error");
        if let Err(e) = self.terminal.send_keys(&agent.target, "Enter").await {
            warn!(agent = %agent.target, error = %e, "Retry keypress failed");
        }
    }

    fn handle_idle(&mut self, agent: &AgentInfo, analysis: &IdleAnalysis) {
        if agent.role.is_supervisor() {
            return;
        }
        let idle_for = self.state_tracker.idle_duration(&agent.target);
        let message = match analysis.idle_type {
            IdleType::ContinuouslyIdle => format!(
                "{} ({}) has been idle for {}m",
                agent.name,
                agent.target,
                idle_for.as_secs() / 60
            ),
            _ => format!("{} ({}) is idle", agent.name, agent.target),
        };
        self.notifications.queue(
            NotificationEvent::new(NotificationType::Idle, &agent.target, message)
                .with_metadata(META_IDLE_TYPE, analysis.idle_type.as_str()),
        );
    }

    fn handle_fresh(&mut self, agent: &AgentInfo) {
        if agent.role.is_supervisor() {
            return;
        }
        self.notifications.queue(
            NotificationEvent::new(
                NotificationType::Fresh,
                &agent.target,
                format!(
                    "{} ({}) is fresh and waiting for its first task",
                    agent.name, agent.target
                ),
            )
            .with_metadata(META_IDLE_TYPE, IdleType::Fresh.as_str()),
        );
    }

    /// Re-evaluate team idleness for each session
    pub fn evaluate_team_idle(&mut self, sessions: &BTreeSet<String>) {
        let escalate_after = self.config.team_idle_escalation();

        for session in sessions {
            if !self.state_tracker.all_idle_in_session(session) {
                self.state_tracker.clear_team_idle(session);
                continue;
            }

            if self.state_tracker.set_team_idle(session) {
                info!(session = %session, "Whole team idle");
                self.notifications.queue(NotificationEvent::for_session(
                    NotificationType::TeamIdle,
                    session,
                    format!("Every agent in {} is idle", session),
                ));
                continue;
            }

            let idle_for = self.state_tracker.team_idle_duration(session);
            if idle_for >= escalate_after {
                warn!(session = %session, idle_secs = idle_for.as_secs(), "Team idle too long, escalating");
                self.notifications.queue(NotificationEvent::for_session(
                    NotificationType::SupervisorEscalation,
                    session,
                    format!(
                        "Team in {} has been idle for {}m with no new work assigned",
                        session,
                        idle_for.as_secs() / 60
                    ),
                ));
            }
        }
    }

    /// Check every session's supervisor, independent of agent sampling
    pub async fn check_supervisors(
        &mut self,
        sessions: &BTreeSet<String>,
        result: &mut MonitorCycleResult,
    ) {
        for session in sessions {
            // Orchestrator sessions don't run a PM
            let orchestrator_only = self
                .agents
                .iter()
                .filter(|a| &a.session == session)
                .all(|a| a.role == AgentRole::Orchestrator);
            if orchestrator_only {
                continue;
            }

            let tracker = &self.state_tracker;
            let checked = self
                .crash_detector
                .detect_pm_crash(session, |target| {
                    tracker.is_idle(target).then(|| tracker.idle_duration(target))
                })
                .await;
            let health = match checked {
                Ok(health) => health,
                Err(e) => {
                    warn!(session = %session, error = %e, "Supervisor check failed");
                    result
                        .errors
                        .push(format!("supervisor check for {}: {:#}", session, e));
                    continue;
                }
            };

            self.supervisor_health.insert(session.clone(), !health.crashed);
            self.notifications
                .set_supervisor_health(session, !health.crashed);
            if !health.crashed {
                continue;
            }

            let reason = health.reason.unwrap_or_else(|| "unknown".to_string());
            error!(session = %session, reason = %reason, "Supervisor down");
            let event = match &health.supervisor_target {
                Some(target) => NotificationEvent::new(
                    NotificationType::RecoveryNeeded,
                    target,
                    format!("Supervisor {} in {} needs recovery: {}", target, session, reason),
                ),
                None => NotificationEvent::for_session(
                    NotificationType::RecoveryNeeded,
                    session,
                    format!("Session {} has no supervisor: {}", session, reason),
                ),
            };
            self.notifications.queue(event.with_metadata("supervisor", "true"));
        }
    }

    pub async fn flush(&mut self, result: &mut MonitorCycleResult) {
        result.notifications_sent = self.notifications.send_queued().await;
    }

    /// Record timing and produce the status for this cycle
    pub fn finish(&mut self, mut result: MonitorCycleResult, started: Instant) -> MonitorStatus {
        result.duration = started.elapsed();
        self.stats.record(result.duration, result.errors.len());

        if result.duration > self.config.cycle_budget() {
            warn!(
                duration_ms = result.duration.as_millis() as u64,
                budget_ms = self.config.cycle_budget_ms,
                "Monitoring cycle over budget"
            );
        }
        debug!(
            discovered = result.agents_discovered,
            analyzed = result.agents_analyzed,
            idle = result.idle_agents,
            sent = result.notifications_sent,
            errors = result.errors.len(),
            "Cycle complete"
        );

        self.last_result = Some(result);
        self.status()
    }

    pub fn status(&self) -> MonitorStatus {
        let idle_agents = self
            .agents
            .iter()
            .filter(|a| self.verdicts.get(&a.target).map(|v| v.is_idle).unwrap_or(false))
            .count();
        let active_agents = self
            .agents
            .iter()
            .filter(|a| self.verdicts.get(&a.target).map(|v| !v.is_idle).unwrap_or(false))
            .count();

        MonitorStatus {
            running: self.running,
            active_agents,
            idle_agents,
            last_cycle_duration: self.stats.last(),
            uptime: self.started_at.elapsed(),
            cycles_completed: self.stats.cycles_completed,
            total_errors: self.stats.total_errors,
        }
    }

    /// Coarse status of an agent from its latest verdict
    pub fn agent_status(&self, target: &str) -> AgentStatus {
        match self.verdicts.get(target) {
            None => AgentStatus::Unknown,
            Some(v) if v.analysis_failed() => AgentStatus::Unknown,
            Some(v) if v.error_kind == Some(ErrorKind::Crash) => AgentStatus::Crashed,
            Some(v) if v.agent_error() => AgentStatus::Erroring,
            Some(v) if v.is_idle => AgentStatus::Idle,
            Some(_) => AgentStatus::Active,
        }
    }

    /// How long an agent has been idle according to the tracker
    pub fn idle_for(&self, target: &str) -> Duration {
        self.state_tracker.idle_duration(target)
    }
}
