//! Per-agent and per-session state, owned by the monitor's single worker.

use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::types::AgentState;

/// Content fingerprint used for change detection
pub fn fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{:x}", digest)
}

/// The system of record for agent and team state.
///
/// Every map is keyed by target (or session for team idle). Nothing is
/// forgotten implicitly; `reset_agent_state` is the only way to drop an agent.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: HashMap<String, AgentState>,
    /// Targets currently idle, with the time they went idle
    idle_since: HashMap<String, Instant>,
    /// Targets absent from discovery, with the time they disappeared
    missing_since: HashMap<String, Instant>,
    /// Sessions whose whole team is idle
    team_idle_since: HashMap<String, Instant>,
    /// Last raw capture per target
    content_cache: HashMap<String, String>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self) -> bool {
        info!(tracked = self.states.len(), "State tracker initialized");
        true
    }

    /// Record a new observation of `target`.
    ///
    /// The first observation is the baseline and never idle. After that an
    /// unchanged fingerprint bumps the no-change counter and the agent enters
    /// the idle set on its first unchanged observation; any change clears it.
    pub fn update_state(&mut self, target: &str, content: &str) -> AgentState {
        let hash = fingerprint(content);
        let now = Instant::now();
        self.content_cache
            .insert(target.to_string(), content.to_string());

        let state = match self.states.entry(target.to_string()) {
            Entry::Vacant(slot) => {
                let state = AgentState::new(target, content.to_string(), hash);
                slot.insert(state.clone());
                debug!(agent = %target, "Tracking new agent");
                return state;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if state.content_hash != hash {
            state.content_hash = hash;
            state.last_content = content.to_string();
            state.last_activity = now;
            state.consecutive_no_change = 0;
            state.is_fresh = false;
            self.idle_since.remove(target);
        } else {
            state.consecutive_no_change += 1;
            if state.consecutive_no_change == 1 {
                self.idle_since.insert(target.to_string(), now);
            }
        }

        state.clone()
    }

    pub fn get_agent_state(&self, target: &str) -> Option<&AgentState> {
        self.states.get(target)
    }

    pub fn tracked_agents(&self) -> impl Iterator<Item = &AgentState> {
        self.states.values()
    }

    pub fn is_idle(&self, target: &str) -> bool {
        self.idle_since.contains_key(target)
    }

    /// How long `target` has been idle, zero when it isn't
    pub fn idle_duration(&self, target: &str) -> Duration {
        self.idle_since
            .get(target)
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    pub fn all_idle_agents(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.idle_since.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// Count of an error observed for `target`
    pub fn record_error(&mut self, target: &str) -> u32 {
        match self.states.get_mut(target) {
            Some(state) => {
                state.error_count += 1;
                state.error_count
            }
            None => 0,
        }
    }

    pub fn track_submission_attempt(&mut self, target: &str) -> u32 {
        match self.states.get_mut(target) {
            Some(state) => {
                state.submission_attempts += 1;
                state.last_submission = Some(Instant::now());
                state.submission_attempts
            }
            None => 0,
        }
    }

    pub fn get_submission_attempts(&self, target: &str) -> u32 {
        self.states
            .get(target)
            .map(|s| s.submission_attempts)
            .unwrap_or(0)
    }

    pub fn last_submission_attempt(&self, target: &str) -> Option<Instant> {
        self.states.get(target).and_then(|s| s.last_submission)
    }

    pub fn reset_submission_tracking(&mut self, target: &str) {
        if let Some(state) = self.states.get_mut(target) {
            state.submission_attempts = 0;
            state.last_submission = None;
        }
    }

    /// Mark the session's team idle. Re-marking keeps the original timestamp.
    /// Returns true when the session was not idle before.
    pub fn set_team_idle(&mut self, session: &str) -> bool {
        if self.team_idle_since.contains_key(session) {
            return false;
        }
        self.team_idle_since
            .insert(session.to_string(), Instant::now());
        true
    }

    pub fn clear_team_idle(&mut self, session: &str) {
        self.team_idle_since.remove(session);
    }

    pub fn is_team_idle(&self, session: &str) -> bool {
        self.team_idle_since.contains_key(session)
    }

    pub fn team_idle_duration(&self, session: &str) -> Duration {
        self.team_idle_since
            .get(session)
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    /// Whether every tracked agent in `session` is idle. False when none are tracked.
    pub fn all_idle_in_session(&self, session: &str) -> bool {
        let mut agents = self.states.values().filter(|s| s.session == session).peekable();
        agents.peek().is_some() && agents.all(|s| self.is_idle(&s.target))
    }

    /// Note that `target` was not found. Keeps the first-seen-missing time.
    pub fn mark_missing(&mut self, target: &str) {
        self.missing_since
            .entry(target.to_string())
            .or_insert_with(Instant::now);
    }

    pub fn clear_missing(&mut self, target: &str) {
        self.missing_since.remove(target);
    }

    pub fn missing_duration(&self, target: &str) -> Option<Duration> {
        self.missing_since.get(target).map(Instant::elapsed)
    }

    pub fn missing_agents(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.missing_since.keys().cloned().collect();
        targets.sort();
        targets
    }

    pub fn last_content(&self, target: &str) -> Option<&str> {
        self.content_cache.get(target).map(String::as_str)
    }

    /// Forget everything about `target`
    pub fn reset_agent_state(&mut self, target: &str) {
        self.states.remove(target);
        self.idle_since.remove(target);
        self.missing_since.remove(target);
        self.content_cache.remove(target);
        debug!(agent = %target, "Agent state reset");
    }

    #[cfg(test)]
    pub(crate) fn backdate_idle(&mut self, target: &str, by: Duration) {
        if let Some(since) = self.idle_since.get_mut(target) {
            if let Some(earlier) = since.checked_sub(by) {
                *since = earlier;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_missing(&mut self, target: &str, by: Duration) {
        if let Some(since) = self.missing_since.get_mut(target) {
            if let Some(earlier) = since.checked_sub(by) {
                *since = earlier;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_team_idle(&mut self, session: &str, by: Duration) {
        if let Some(since) = self.team_idle_since.get_mut(session) {
            if let Some(earlier) = since.checked_sub(by) {
                *since = earlier;
            }
        }
    }
}
