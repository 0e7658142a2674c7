use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use super::relay::RelayPriority;
use crate::tmux::{split_target, ErrorKind};

/// Role of an agent, inferred from its window name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// The session's supervisor; receives the reports
    ProjectManager,
    Developer,
    Tester,
    DevOps,
    Reviewer,
    Researcher,
    Orchestrator,
    /// Looks like an agent but has no recognised role
    Generic,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::ProjectManager => "pm",
            AgentRole::Developer => "developer",
            AgentRole::Tester => "tester",
            AgentRole::DevOps => "devops",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Researcher => "researcher",
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Generic => "agent",
        }
    }

    pub fn is_supervisor(&self) -> bool {
        matches!(self, AgentRole::ProjectManager)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Output is changing
    Active,
    /// Output has stopped changing
    Idle,
    /// Agent is showing an API error
    Erroring,
    /// Agent process is gone or crashed
    Crashed,
    /// Not analyzed yet, or analysis failed
    #[default]
    Unknown,
}

/// An agent found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// `session:window`
    pub target: String,
    pub session: String,
    pub window: u32,
    /// Window name
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
}

/// Idle subtype reported by content analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdleType {
    #[default]
    Unknown,
    /// First cycle without output changes
    NewlyIdle,
    /// Idle for more than one cycle
    ContinuouslyIdle,
    /// Spawned and still showing its greeting
    Fresh,
    /// Compacting its context; counts as busy
    Compacting,
    /// Showing a crash or API error
    Erroring,
}

impl IdleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdleType::Unknown => "unknown",
            IdleType::NewlyIdle => "newly_idle",
            IdleType::ContinuouslyIdle => "continuously_idle",
            IdleType::Fresh => "fresh",
            IdleType::Compacting => "compacting",
            IdleType::Erroring => "erroring",
        }
    }
}

impl fmt::Display for IdleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-cycle verdict for one agent
#[derive(Debug, Clone, PartialEq)]
pub struct IdleAnalysis {
    pub is_idle: bool,
    pub idle_type: IdleType,
    pub confidence: f32,
    pub content_hash: String,
    /// Last sample taken; empty when capture failed
    pub content: String,
    pub error_detected: bool,
    pub error_kind: Option<ErrorKind>,
    /// Human readable detail, e.g. the crash reason
    pub error_detail: Option<String>,
}

impl IdleAnalysis {
    /// Verdict when content could not be captured or inspected
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            is_idle: true,
            idle_type: IdleType::Unknown,
            confidence: 0.0,
            content_hash: String::new(),
            content: String::new(),
            error_detected: true,
            error_kind: Some(ErrorKind::AnalysisFailed),
            error_detail: Some(detail.into()),
        }
    }

    pub fn analysis_failed(&self) -> bool {
        self.error_kind == Some(ErrorKind::AnalysisFailed)
    }

    /// Crash or API error, but not an analysis failure
    pub fn agent_error(&self) -> bool {
        self.error_detected && !self.analysis_failed()
    }
}

/// Mutable tracking record for one agent
#[derive(Debug, Clone)]
pub struct AgentState {
    pub target: String,
    pub session: String,
    pub last_content: String,
    pub content_hash: String,
    pub last_activity: Instant,
    pub consecutive_no_change: u32,
    /// True until the first content change after the baseline
    pub is_fresh: bool,
    pub submission_attempts: u32,
    pub last_submission: Option<Instant>,
    pub error_count: u32,
}

impl AgentState {
    pub fn new(target: &str, content: String, content_hash: String) -> Self {
        let session = split_target(target)
            .map(|(session, _)| session.to_string())
            .unwrap_or_else(|| target.to_string());
        Self {
            target: target.to_string(),
            session,
            last_content: content,
            content_hash,
            last_activity: Instant::now(),
            consecutive_no_change: 0,
            is_fresh: true,
            submission_attempts: 0,
            last_submission: None,
            error_count: 0,
        }
    }
}

/// Report section, in delivery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportSection {
    Crash,
    RecoveryNeeded,
    Fresh,
    Idle,
    Missing,
    Other,
}

impl ReportSection {
    pub fn heading(&self) -> &'static str {
        match self {
            ReportSection::Crash => "CRASHED AGENTS",
            ReportSection::RecoveryNeeded => "RECOVERY NEEDED",
            ReportSection::Fresh => "FRESH AGENTS (awaiting first task)",
            ReportSection::Idle => "IDLE AGENTS",
            ReportSection::Missing => "MISSING AGENTS",
            ReportSection::Other => "TEAM STATUS",
        }
    }
}

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Crash,
    Idle,
    Fresh,
    TeamIdle,
    RecoveryNeeded,
    SupervisorEscalation,
    AgentMissing,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Crash => "crash",
            NotificationType::Idle => "idle",
            NotificationType::Fresh => "fresh",
            NotificationType::TeamIdle => "team_idle",
            NotificationType::RecoveryNeeded => "recovery_needed",
            NotificationType::SupervisorEscalation => "supervisor_escalation",
            NotificationType::AgentMissing => "agent_missing",
        }
    }

    pub fn section(&self) -> ReportSection {
        match self {
            NotificationType::Crash => ReportSection::Crash,
            NotificationType::RecoveryNeeded | NotificationType::SupervisorEscalation => {
                ReportSection::RecoveryNeeded
            }
            NotificationType::Fresh => ReportSection::Fresh,
            NotificationType::Idle => ReportSection::Idle,
            NotificationType::AgentMissing => ReportSection::Missing,
            NotificationType::TeamIdle => ReportSection::Other,
        }
    }

    pub fn priority(&self) -> RelayPriority {
        match self {
            NotificationType::Crash => RelayPriority::Critical,
            NotificationType::RecoveryNeeded | NotificationType::SupervisorEscalation => {
                RelayPriority::High
            }
            NotificationType::Fresh
            | NotificationType::TeamIdle
            | NotificationType::AgentMissing => RelayPriority::Normal,
            NotificationType::Idle => RelayPriority::Low,
        }
    }

    /// Alerts routed to the escalation target when one is configured
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            NotificationType::RecoveryNeeded | NotificationType::SupervisorEscalation
        )
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata key carrying the idle subtype of an event
pub const META_IDLE_TYPE: &str = "idle_type";

/// One alert waiting for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationType,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub session: String,
    pub metadata: BTreeMap<String, String>,
}

impl NotificationEvent {
    pub fn new(kind: NotificationType, target: &str, message: impl Into<String>) -> Self {
        let session = split_target(target)
            .map(|(session, _)| session.to_string())
            .unwrap_or_else(|| target.to_string());
        Self {
            kind,
            target: target.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
            session,
            metadata: BTreeMap::new(),
        }
    }

    /// Event about a whole session rather than one window
    pub fn for_session(kind: NotificationType, session: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            target: session.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
            session: session.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn idle_type(&self) -> Option<&str> {
        self.metadata.get(META_IDLE_TYPE).map(String::as_str)
    }
}

/// Outcome of one monitoring cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorCycleResult {
    pub agents_discovered: usize,
    pub agents_analyzed: usize,
    pub idle_agents: usize,
    pub notifications_sent: usize,
    pub duration: Duration,
    pub errors: Vec<String>,
}

impl MonitorCycleResult {
    /// No errors were recorded. Idle or crashed agents are not errors.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Point-in-time status of the monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorStatus {
    pub running: bool,
    pub active_agents: usize,
    pub idle_agents: usize,
    pub last_cycle_duration: Option<Duration>,
    pub uptime: Duration,
    pub cycles_completed: u64,
    pub total_errors: u64,
}
