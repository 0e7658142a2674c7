//! Machine-readable status file written after each cycle.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use super::cycle::MonitorContext;
use super::types::{AgentRole, AgentStatus};

/// One agent as seen by the latest cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub target: String,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    /// No output change since the agent was first seen
    pub fresh: bool,
    pub idle_secs: u64,
    pub submission_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSnapshot {
    pub state: String,
    pub uptime_secs: u64,
    pub cycles_completed: u64,
    pub total_errors: u64,
    pub last_cycle_ms: Option<u64>,
    pub avg_cycle_ms: Option<u64>,
    pub p50_cycle_ms: Option<u64>,
    pub p95_cycle_ms: Option<u64>,
    pub max_cycle_ms: Option<u64>,
    pub relay_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub erroring: usize,
    pub crashed: usize,
    pub unknown: usize,
}

/// Full status file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub agents: Vec<AgentSnapshot>,
    /// Session to whether its supervisor passed the last check
    pub supervisors: BTreeMap<String, bool>,
    pub daemon: DaemonSnapshot,
    pub summary: SnapshotSummary,
    pub last_updated: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn capture(ctx: &MonitorContext, state: &str) -> Self {
        let mut summary = SnapshotSummary::default();
        let agents: Vec<AgentSnapshot> = ctx
            .agents
            .iter()
            .map(|agent| {
                let status = agent.status;
                match status {
                    AgentStatus::Active => summary.active += 1,
                    AgentStatus::Idle => summary.idle += 1,
                    AgentStatus::Erroring => summary.erroring += 1,
                    AgentStatus::Crashed => summary.crashed += 1,
                    AgentStatus::Unknown => summary.unknown += 1,
                }
                AgentSnapshot {
                    target: agent.target.clone(),
                    name: agent.name.clone(),
                    role: agent.role,
                    status,
                    fresh: ctx
                        .state_tracker
                        .get_agent_state(&agent.target)
                        .map(|s| s.is_fresh)
                        .unwrap_or(false),
                    idle_secs: ctx.idle_for(&agent.target).as_secs(),
                    submission_attempts: ctx.state_tracker.get_submission_attempts(&agent.target),
                }
            })
            .collect();
        summary.total = agents.len();

        let millis = |d: Duration| d.as_millis() as u64;
        Self {
            agents,
            supervisors: ctx.supervisor_health.clone(),
            daemon: DaemonSnapshot {
                state: state.to_string(),
                uptime_secs: ctx.started_at.elapsed().as_secs(),
                cycles_completed: ctx.stats.cycles_completed,
                total_errors: ctx.stats.total_errors,
                last_cycle_ms: ctx.stats.last().map(millis),
                avg_cycle_ms: ctx.stats.average().map(millis),
                p50_cycle_ms: ctx.stats.percentile(50.0).map(millis),
                p95_cycle_ms: ctx.stats.percentile(95.0).map(millis),
                max_cycle_ms: ctx.stats.max().map(millis),
                relay_active: ctx.notifications.relay_active(),
            },
            summary,
            last_updated: Utc::now(),
        }
    }

    /// Write to `path` via a temp file and rename, so readers never see a
    /// partial file.
    pub async fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Read a snapshot, ignoring it when missing, unreadable or older than `max_age`
    pub async fn load_fresh(path: &Path, max_age: Duration) -> Option<Self> {
        let raw = fs::read(path).await.ok()?;
        let snapshot: StatusSnapshot = serde_json::from_slice(&raw).ok()?;
        let age = Utc::now().signed_duration_since(snapshot.last_updated);
        let max_age = chrono::Duration::from_std(max_age).ok()?;
        (age <= max_age).then_some(snapshot)
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        chrono::Duration::from_std(max_age)
            .map(|max| Utc::now().signed_duration_since(self.last_updated) > max)
            .unwrap_or(true)
    }
}
