use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use super::agent_monitor::find_supervisor;
use super::types::AgentInfo;
use crate::tmux::{make_target, ContentSignals, TerminalInterface};

/// Crash classification for one agent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrashVerdict {
    pub crashed: bool,
    pub reason: Option<String>,
}

impl CrashVerdict {
    fn crashed(reason: impl Into<String>) -> Self {
        Self {
            crashed: true,
            reason: Some(reason.into()),
        }
    }
}

/// Health of a session's supervisor window
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PmHealth {
    pub crashed: bool,
    /// `None` when the session has no supervisor window at all
    pub supervisor_target: Option<String>,
    pub reason: Option<String>,
}

/// Decides whether an agent has crashed from its recent output
pub struct CrashDetector {
    terminal: Arc<dyn TerminalInterface>,
    capture_lines: usize,
    /// Silence after an error banner that counts as a crash
    silence_threshold: Duration,
}

impl CrashDetector {
    pub fn new(
        terminal: Arc<dyn TerminalInterface>,
        capture_lines: usize,
        silence_threshold: Duration,
    ) -> Self {
        Self {
            terminal,
            capture_lines,
            silence_threshold,
        }
    }

    /// Classify `content` captured from `agent`.
    ///
    /// Signatures win over everything else. An agent that dropped back to a
    /// bare shell prompt has exited. An error banner only counts once the
    /// agent has been silent for the configured threshold.
    pub fn detect_crash(
        &self,
        agent: &AgentInfo,
        content: &str,
        idle_duration: Option<Duration>,
    ) -> CrashVerdict {
        if let Some(reason) = ContentSignals::crash_signature(content) {
            return CrashVerdict::crashed(reason);
        }

        let agent_ui = ContentSignals::has_agent_ui(content);

        if !agent_ui && ContentSignals::ends_at_shell_prompt(content) {
            return CrashVerdict::crashed(format!("{} exited to a shell prompt", agent.name));
        }

        if let Some(idle) = idle_duration {
            if !agent_ui && idle >= self.silence_threshold && ContentSignals::has_error_banner(content)
            {
                return CrashVerdict::crashed(format!(
                    "error banner followed by {}s of silence",
                    idle.as_secs()
                ));
            }
        }

        CrashVerdict::default()
    }

    /// Locate the supervisor window of `session` and check it on its own.
    ///
    /// `idle_for` reports how long a target has been idle, so a supervisor
    /// stuck behind an old error banner is caught too.
    pub async fn detect_pm_crash<F>(&self, session: &str, idle_for: F) -> Result<PmHealth>
    where
        F: Fn(&str) -> Option<Duration> + Send,
    {
        let Some(window) = find_supervisor(self.terminal.as_ref(), session).await? else {
            return Ok(PmHealth {
                crashed: true,
                supervisor_target: None,
                reason: Some(format!("no supervisor window in session {}", session)),
            });
        };

        let target = make_target(session, window.index);
        let content = self
            .terminal
            .capture_pane(&target, self.capture_lines)
            .await
            .with_context(|| format!("Failed to capture supervisor pane {}", target))?;

        let agent = AgentInfo {
            target: target.clone(),
            session: session.to_string(),
            window: window.index,
            name: window.name,
            role: super::types::AgentRole::ProjectManager,
            status: Default::default(),
        };
        let verdict = self.detect_crash(&agent, &content, idle_for(&target));

        Ok(PmHealth {
            crashed: verdict.crashed,
            supervisor_target: Some(target),
            reason: verdict.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::{AgentRole, AgentStatus};
    use crate::tmux::mock::MockTerminal;

    fn agent(name: &str) -> AgentInfo {
        AgentInfo {
            target: "s:1".to_string(),
            session: "s".to_string(),
            window: 1,
            name: name.to_string(),
            role: AgentRole::Developer,
            status: AgentStatus::Unknown,
        }
    }

    fn detector(terminal: Arc<MockTerminal>) -> CrashDetector {
        CrashDetector::new(terminal, 50, Duration::from_secs(120))
    }

    #[test]
    fn test_traceback_is_crash() {
        let detector = detector(Arc::new(MockTerminal::new()));
        let content = "running\nTraceback (most recent call last):\n  File \"a.py\", line 1";
        let verdict = detector.detect_crash(&agent("Claude-dev"), content, None);
        assert!(verdict.crashed);
        assert_eq!(verdict.reason.as_deref(), Some("python traceback"));
    }

    #[test]
    fn test_bare_shell_is_crash() {
        let detector = detector(Arc::new(MockTerminal::new()));
        let verdict = detector.detect_crash(&agent("Claude-dev"), "Goodbye!\nme@box:~/proj$ ", None);
        assert!(verdict.crashed);
        assert!(verdict.reason.unwrap().contains("shell prompt"));
    }

    #[test]
    fn test_agent_ui_is_not_crash() {
        let detector = detector(Arc::new(MockTerminal::new()));
        let content = "╭──────────╮\n│ > \n╰──────────╯\n  ? for shortcuts";
        let verdict = detector.detect_crash(&agent("Claude-dev"), content, None);
        assert!(!verdict.crashed);
    }

    #[test]
    fn test_error_banner_needs_silence() {
        let detector = detector(Arc::new(MockTerminal::new()));
        let content = "Error: connection reset\n";

        let verdict = detector.detect_crash(&agent("dev"), content, Some(Duration::from_secs(10)));
        assert!(!verdict.crashed);

        let verdict = detector.detect_crash(&agent("dev"), content, Some(Duration::from_secs(300)));
        assert!(verdict.crashed);
        assert!(verdict.reason.unwrap().contains("300s"));
    }

    #[tokio::test]
    async fn test_pm_crash_when_supervisor_missing() {
        let terminal = Arc::new(MockTerminal::new());
        terminal.add_window("s", 1, "Claude-dev");

        let health = detector(terminal).detect_pm_crash("s", |_| None).await.unwrap();
        assert!(health.crashed);
        assert!(health.supervisor_target.is_none());
    }

    #[tokio::test]
    async fn test_pm_healthy_and_crashed() {
        let terminal = Arc::new(MockTerminal::new());
        let pm = terminal.add_window("s", 0, "Project-Manager");
        terminal.set_content(&pm, "│ > reviewing\n? for shortcuts");

        let detector = detector(terminal.clone());
        let health = detector.detect_pm_crash("s", |_| None).await.unwrap();
        assert!(!health.crashed);
        assert_eq!(health.supervisor_target.as_deref(), Some("s:0"));

        terminal.set_content(&pm, "thread 'main' panicked at src/lib.rs:1:1");
        let health = detector.detect_pm_crash("s", |_| None).await.unwrap();
        assert!(health.crashed);
        assert_eq!(health.reason.as_deref(), Some("panic"));
    }

    #[tokio::test]
    async fn test_pm_stuck_on_error_banner() {
        let terminal = Arc::new(MockTerminal::new());
        let pm = terminal.add_window("s", 0, "pm");
        terminal.set_content(&pm, "Error: lost connection to server");

        let detector = detector(terminal);
        let health = detector.detect_pm_crash("s", |_| None).await.unwrap();
        assert!(!health.crashed);

        let health = detector
            .detect_pm_crash("s", |t| (t == "s:0").then(|| Duration::from_secs(600)))
            .await
            .unwrap();
        assert!(health.crashed);
    }

    #[tokio::test]
    async fn test_pm_check_propagates_tmux_errors() {
        let terminal = Arc::new(MockTerminal::new());
        terminal.add_window("s", 0, "pm");
        terminal.fail_session("s");
        assert!(detector(terminal).detect_pm_crash("s", |_| None).await.is_err());
    }
}
