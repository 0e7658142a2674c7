//! Alert queueing, throttling and consolidated delivery to supervisors.

use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::agent_monitor::{find_orchestrator, find_supervisor};
use super::relay::{MessageRelay, RelayPriority};
use super::types::{IdleType, NotificationEvent, NotificationType, ReportSection};
use crate::tmux::{make_target, TerminalInterface};

/// Idle subtypes that are never worth an alert, whatever the cooldown says
const EXCLUDED_IDLE_TYPES: &[IdleType] = &[IdleType::Compacting];

/// Queues alerts and delivers one consolidated report per supervisor
pub struct NotificationManager {
    terminal: Arc<dyn TerminalInterface>,
    relay: Option<Arc<dyn MessageRelay>>,
    /// Set on the first relay failure; never cleared
    relay_disabled: bool,
    cooldown: Duration,
    submit_with_enter: bool,
    escalation_target: Option<String>,
    /// Sessions whose supervisor failed its last health check
    down_supervisors: HashSet<String>,
    pending: Vec<NotificationEvent>,
    last_queued: HashMap<(NotificationType, String), Instant>,
}

impl NotificationManager {
    pub fn new(terminal: Arc<dyn TerminalInterface>, cooldown: Duration) -> Self {
        Self {
            terminal,
            relay: None,
            relay_disabled: false,
            cooldown,
            submit_with_enter: true,
            escalation_target: None,
            down_supervisors: HashSet::new(),
            pending: Vec::new(),
            last_queued: HashMap::new(),
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn MessageRelay>) -> Self {
        self.set_relay(relay);
        self
    }

    pub fn set_relay(&mut self, relay: Arc<dyn MessageRelay>) {
        self.relay = Some(relay);
        self.relay_disabled = false;
    }

    pub fn with_escalation_target(mut self, target: Option<String>) -> Self {
        self.escalation_target = target;
        self
    }

    pub fn with_submit_enter(mut self, submit: bool) -> Self {
        self.submit_with_enter = submit;
        self
    }

    /// Record a supervisor health check. Reports for a session with a down
    /// supervisor go to the orchestrator instead of the supervisor's pane.
    pub fn set_supervisor_health(&mut self, session: &str, healthy: bool) {
        if healthy {
            self.down_supervisors.remove(session);
        } else {
            self.down_supervisors.insert(session.to_string());
        }
    }

    /// Probe the relay, if any. An unhealthy relay is dropped, not fatal.
    pub async fn initialize(&mut self) -> Result<()> {
        if let Some(relay) = self.relay.clone() {
            match relay.status().await {
                Ok(status) if status.is_healthy() => {
                    info!(
                        avg_delivery_ms = status.avg_delivery_ms,
                        queue_size = status.queue_size,
                        "Relay available"
                    );
                }
                Ok(status) => self.disable_relay(&format!("relay reports {}", status.status)),
                Err(e) => self.disable_relay(&format!("{:#}", e)),
            }
        }
        info!(cooldown_secs = self.cooldown.as_secs(), "Notification manager initialized");
        Ok(())
    }

    /// Queue an alert unless it's excluded or throttled. Returns whether it was queued.
    pub fn queue(&mut self, event: NotificationEvent) -> bool {
        self.queue_at(event, Instant::now())
    }

    fn queue_at(&mut self, event: NotificationEvent, now: Instant) -> bool {
        if let Some(idle_type) = event.idle_type() {
            if EXCLUDED_IDLE_TYPES.iter().any(|t| t.as_str() == idle_type) {
                debug!(agent = %event.target, idle_type, "Alert excluded");
                return false;
            }
        }

        let key = (event.kind, event.target.clone());
        if let Some(last) = self.last_queued.get(&key) {
            if now.saturating_duration_since(*last) < self.cooldown {
                debug!(agent = %event.target, kind = %event.kind, "Alert throttled");
                return false;
            }
        }

        self.last_queued.insert(key, now);
        self.pending.push(event);
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> &[NotificationEvent] {
        &self.pending
    }

    pub fn relay_active(&self) -> bool {
        self.relay.is_some() && !self.relay_disabled
    }

    /// Deliver everything queued. Returns the number of reports sent, one
    /// per supervisor that had something to hear about.
    pub async fn send_queued(&mut self) -> usize {
        let events = std::mem::take(&mut self.pending);
        if events.is_empty() {
            return 0;
        }

        let mut supervisors: HashMap<String, Option<String>> = HashMap::new();
        let mut orchestrator: Option<Option<String>> = None;
        let mut grouped: BTreeMap<String, Vec<NotificationEvent>> = BTreeMap::new();

        for event in events {
            let Some(destination) = self
                .resolve_destination(&event, &mut supervisors, &mut orchestrator)
                .await
            else {
                warn!(
                    agent = %event.target,
                    kind = %event.kind,
                    "No supervisor to notify, dropping alert"
                );
                continue;
            };
            if destination == event.target {
                warn!(agent = %event.target, kind = %event.kind, "Alert is about its own recipient, dropping");
                continue;
            }
            grouped.entry(destination).or_default().push(event);
        }

        let mut sent = 0;
        for (destination, events) in grouped {
            let report = render_report(&events);
            let priority = events
                .iter()
                .map(|e| e.kind.priority())
                .max()
                .unwrap_or(RelayPriority::Normal);

            match self.deliver(&destination, &report, priority).await {
                Ok(()) => {
                    info!(destination = %destination, alerts = events.len(), "Report delivered");
                    sent += 1;
                }
                Err(e) => {
                    error!(destination = %destination, error = %e, "Report delivery failed");
                }
            }
        }

        self.prune_throttle(Instant::now());
        sent
    }

    /// Escalation target for escalations, else the session's supervisor.
    /// Falls back to an orchestrator window when no usable supervisor exists.
    async fn resolve_destination(
        &self,
        event: &NotificationEvent,
        supervisors: &mut HashMap<String, Option<String>>,
        orchestrator: &mut Option<Option<String>>,
    ) -> Option<String> {
        if event.kind.escalates() {
            if let Some(target) = &self.escalation_target {
                return Some(target.clone());
            }
        }

        let supervisor = self
            .session_supervisor(&event.session, supervisors)
            .await
            .filter(|pm| *pm != event.target);
        if supervisor.is_some() {
            return supervisor;
        }

        if orchestrator.is_none() {
            let found = match find_orchestrator(self.terminal.as_ref()).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "Orchestrator lookup failed");
                    None
                }
            };
            *orchestrator = Some(found);
        }
        orchestrator.clone().flatten()
    }

    async fn session_supervisor(
        &self,
        session: &str,
        supervisors: &mut HashMap<String, Option<String>>,
    ) -> Option<String> {
        if self.down_supervisors.contains(session) {
            debug!(session, "Supervisor is down, not delivering to it");
            return None;
        }
        if let Some(cached) = supervisors.get(session) {
            return cached.clone();
        }

        let resolved = match find_supervisor(self.terminal.as_ref(), session).await {
            Ok(window) => window.map(|w| make_target(session, w.index)),
            Err(e) => {
                warn!(session, error = %e, "Supervisor lookup failed");
                None
            }
        };
        supervisors.insert(session.to_string(), resolved.clone());
        resolved
    }

    async fn deliver(&mut self, destination: &str, report: &str, priority: RelayPriority) -> Result<()> {
        if let Some(relay) = self.relay.clone().filter(|_| !self.relay_disabled) {
            let tags = vec!["monitor".to_string(), priority.as_str().to_string()];
            match relay.publish(destination, report, priority, &tags).await {
                Ok(receipt) if receipt.queued => return Ok(()),
                Ok(_) => self.disable_relay("relay refused the message"),
                Err(e) => self.disable_relay(&format!("{:#}", e)),
            }
        }

        self.terminal.send_text(destination, report).await?;
        if self.submit_with_enter {
            self.terminal.send_keys(destination, "Enter").await?;
        }
        Ok(())
    }

    fn disable_relay(&mut self, reason: &str) {
        if !self.relay_disabled {
            warn!(reason, "Relay unavailable, using direct delivery from now on");
        }
        self.relay_disabled = true;
    }

    /// Throttle entries older than the cooldown can't suppress anything
    fn prune_throttle(&mut self, now: Instant) {
        let cooldown = self.cooldown;
        self.last_queued
            .retain(|_, at| now.saturating_duration_since(*at) < cooldown);
    }
}

/// Render one report with sections in priority order
pub fn render_report(events: &[NotificationEvent]) -> String {
    let mut sections: BTreeMap<ReportSection, Vec<&str>> = BTreeMap::new();
    for event in events {
        sections
            .entry(event.kind.section())
            .or_default()
            .push(event.message.as_str());
    }

    let mut report = format!(
        "[MONITOR] Agent status report {}\n",
        Utc::now().format("%H:%M:%S UTC")
    );
    for (section, messages) in sections {
        report.push_str(&format!("\n== {} ==\n", section.heading()));
        for message in messages {
            report.push_str(&format!("- {}\n", message));
        }
    }
    report
}
