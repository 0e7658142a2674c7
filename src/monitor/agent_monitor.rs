//! Agent discovery and content-based activity classification.

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::crash::CrashDetector;
use super::state_tracker::fingerprint;
use super::types::{AgentInfo, AgentRole, AgentStatus, IdleAnalysis, IdleType};
use crate::config::SamplingConfig;
use crate::tmux::{make_target, split_target, ContentSignals, ErrorKind, TerminalInterface, WindowInfo};

/// Confidence when activity or a known signature was observed directly
const CONFIDENCE_OBSERVED: f32 = 0.9;
/// Confidence when idleness is inferred from unchanged content
const CONFIDENCE_INFERRED: f32 = 0.8;

/// Classify a window by name. `None` means it isn't an agent.
///
/// Only the name is used so an agent that crashed back to a shell is still
/// tracked and can be recovered.
pub fn classify_window(name: &str) -> Option<AgentRole> {
    let tokens: Vec<String> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();

    ROLE_KEYWORDS
        .iter()
        .find(|(_, words)| tokens.iter().any(|t| words.contains(&t.as_str())))
        .map(|(role, _)| *role)
}

/// Window name keywords per role, checked in order
const ROLE_KEYWORDS: &[(AgentRole, &[&str])] = &[
    (AgentRole::ProjectManager, &["pm", "manager"]),
    (AgentRole::Orchestrator, &["orchestrator"]),
    (AgentRole::DevOps, &["devops", "sysadmin", "ops", "infra"]),
    (AgentRole::Tester, &["qa", "tester"]),
    (AgentRole::Reviewer, &["reviewer", "review"]),
    (AgentRole::Researcher, &["researcher", "research"]),
    (
        AgentRole::Developer,
        &["dev", "developer", "engineer", "frontend", "backend", "fullstack"],
    ),
    (AgentRole::Generic, &["claude", "agent", "codex", "gemini", "aider"]),
];

/// Find the supervisor window of `session` by naming convention.
pub async fn find_supervisor(
    terminal: &dyn TerminalInterface,
    session: &str,
) -> Result<Option<WindowInfo>> {
    let windows = terminal
        .list_windows(session)
        .await
        .with_context(|| format!("Failed to list windows of {}", session))?;
    Ok(windows
        .into_iter()
        .find(|w| classify_window(&w.name) == Some(AgentRole::ProjectManager)))
}

/// Find the first orchestrator window across all sessions.
pub async fn find_orchestrator(terminal: &dyn TerminalInterface) -> Result<Option<String>> {
    let sessions = terminal
        .list_sessions()
        .await
        .context("Failed to list tmux sessions")?;
    for session in sessions {
        let windows = match terminal.list_windows(&session.name).await {
            Ok(windows) => windows,
            Err(e) => {
                debug!(session = %session.name, error = %e, "Skipping session in orchestrator lookup");
                continue;
            }
        };
        if let Some(window) = windows
            .into_iter()
            .find(|w| classify_window(&w.name) == Some(AgentRole::Orchestrator))
        {
            return Ok(Some(make_target(&session.name, window.index)));
        }
    }
    Ok(None)
}

/// Number of bytes that differ between two captures
fn changed_bytes(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let differing = a.iter().zip(b).filter(|(x, y)| x != y).count();
    differing + a.len().abs_diff(b.len())
}

/// Result of a discovery pass, including per-session failures
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub agents: Vec<AgentInfo>,
    pub errors: Vec<String>,
    /// Sessions whose windows could not be listed
    pub failed_sessions: HashSet<String>,
    /// False when the session list itself couldn't be read. Such a pass
    /// says nothing about which agents exist.
    pub sessions_listed: bool,
}

/// Discovers agent windows and classifies their activity
pub struct AgentMonitor {
    terminal: Arc<dyn TerminalInterface>,
    crash_detector: Arc<CrashDetector>,
    sampling: SamplingConfig,
    capture_lines: usize,
    cache: Option<(Instant, Vec<AgentInfo>)>,
}

impl AgentMonitor {
    pub fn new(
        terminal: Arc<dyn TerminalInterface>,
        crash_detector: Arc<CrashDetector>,
        sampling: SamplingConfig,
        capture_lines: usize,
    ) -> Self {
        Self {
            terminal,
            crash_detector,
            sampling,
            capture_lines,
            cache: None,
        }
    }

    /// Run a first discovery. Unlike later passes, failure here is an error.
    pub async fn initialize(&mut self) -> Result<usize> {
        self.cache = None;
        self.terminal
            .list_sessions()
            .await
            .context("Failed to list tmux sessions")?;

        let discovery = self.discover_detailed().await;
        if let Some(first) = discovery.errors.first() {
            warn!(errors = discovery.errors.len(), first = %first, "Initial discovery incomplete");
        }
        info!(agents = discovery.agents.len(), "Agent monitor initialized");
        Ok(discovery.agents.len())
    }

    /// Discover agents, logging and swallowing failures.
    pub async fn discover(&mut self) -> Vec<AgentInfo> {
        self.discover_detailed().await.agents
    }

    /// Discover agents and report which sessions could not be enumerated.
    pub async fn discover_detailed(&mut self) -> Discovery {
        let ttl = Duration::from_secs(self.sampling.discovery_cache_ttl_secs);
        if let Some((at, agents)) = &self.cache {
            if at.elapsed() < ttl {
                debug!(agents = agents.len(), "Using cached discovery");
                return Discovery {
                    agents: agents.clone(),
                    sessions_listed: true,
                    ..Default::default()
                };
            }
        }

        let mut discovery = Discovery::default();

        let sessions = match self.terminal.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Failed to list sessions");
                discovery.errors.push(format!("listing sessions: {:#}", e));
                return discovery;
            }
        };
        discovery.sessions_listed = true;

        for session in sessions {
            let windows = match self.terminal.list_windows(&session.name).await {
                Ok(windows) => windows,
                Err(e) => {
                    warn!(session = %session.name, error = %e, "Failed to list windows");
                    discovery
                        .errors
                        .push(format!("listing windows of {}: {:#}", session.name, e));
                    discovery.failed_sessions.insert(session.name);
                    continue;
                }
            };

            for window in windows {
                let Some(role) = classify_window(&window.name) else {
                    continue;
                };
                discovery.agents.push(AgentInfo {
                    target: make_target(&session.name, window.index),
                    session: session.name.clone(),
                    window: window.index,
                    name: window.name,
                    role,
                    status: AgentStatus::Unknown,
                });
            }
        }

        debug!(agents = discovery.agents.len(), "Discovery complete");
        if discovery.errors.is_empty() {
            self.cache = Some((Instant::now(), discovery.agents.clone()));
        }
        discovery
    }

    pub fn invalidate_cache(&mut self) {
        self.cache = None;
    }

    /// Whether `target` names an agent window
    pub async fn is_agent_window(&self, target: &str) -> bool {
        let Some((session, index)) = split_target(target) else {
            return false;
        };
        match self.terminal.list_windows(session).await {
            Ok(windows) => windows
                .iter()
                .find(|w| w.index == index)
                .map(|w| classify_window(&w.name).is_some())
                .unwrap_or(false),
            Err(e) => {
                debug!(agent = %target, error = %e, "Window lookup failed");
                false
            }
        }
    }

    /// Sample the agent's pane and classify its activity. Never fails; a
    /// capture problem yields an `AnalysisFailed` verdict with zero confidence.
    ///
    /// `idle_for` is how long the tracker has seen the agent idle, if at all.
    /// It lets a stale error banner count as a crash.
    pub async fn analyze_content(
        &self,
        agent: &AgentInfo,
        idle_for: Option<Duration>,
    ) -> IdleAnalysis {
        match self.sample(&agent.target).await {
            Ok(samples) => self.classify(agent, samples, idle_for),
            Err(e) => {
                warn!(agent = %agent.target, error = %e, "Content analysis failed");
                IdleAnalysis::failed(format!("analysis failed: {:#}", e))
            }
        }
    }

    async fn sample(&self, target: &str) -> Result<Vec<String>> {
        let count = self.sampling.sample_count.max(1);
        let mut samples = Vec::with_capacity(count);

        for i in 0..count {
            if i > 0 {
                pause(Duration::from_millis(self.sampling.sample_interval_ms)).await;
            }
            samples.push(self.terminal.capture_pane(target, self.capture_lines).await?);
            pause(Duration::from_millis(self.sampling.capture_delay_ms)).await;
        }

        Ok(samples)
    }

    fn classify(
        &self,
        agent: &AgentInfo,
        samples: Vec<String>,
        idle_for: Option<Duration>,
    ) -> IdleAnalysis {
        let active = samples.windows(2).any(|pair| {
            changed_bytes(&pair[0], &pair[1]) > self.sampling.significant_change_bytes
        });
        let content = samples.into_iter().last().unwrap_or_default();

        let mut analysis = IdleAnalysis {
            is_idle: true,
            idle_type: IdleType::NewlyIdle,
            confidence: CONFIDENCE_INFERRED,
            content_hash: fingerprint(&content),
            content: String::new(),
            error_detected: false,
            error_kind: None,
            error_detail: None,
        };

        if active {
            analysis.is_idle = false;
            analysis.idle_type = IdleType::Unknown;
            analysis.confidence = CONFIDENCE_OBSERVED;
        } else {
            // Priority order: Crash > Compacting > API error > Fresh > Idle
            let crash = self.crash_detector.detect_crash(agent, &content, idle_for);
            if crash.crashed {
                analysis.idle_type = IdleType::Erroring;
                analysis.confidence = CONFIDENCE_OBSERVED;
                analysis.error_detected = true;
                analysis.error_kind = Some(ErrorKind::Crash);
                analysis.error_detail = crash.reason;
            } else if ContentSignals::is_compacting(&content) {
                analysis.is_idle = false;
                analysis.idle_type = IdleType::Compacting;
                analysis.confidence = CONFIDENCE_OBSERVED;
            } else if let Some(kind) = ContentSignals::api_error(&content) {
                analysis.idle_type = IdleType::Erroring;
                analysis.confidence = CONFIDENCE_OBSERVED;
                analysis.error_detected = true;
                analysis.error_kind = Some(kind);
                analysis.error_detail = Some(format!("API error: {}", kind));
            } else if ContentSignals::is_fresh(&content) {
                analysis.idle_type = IdleType::Fresh;
                analysis.confidence = CONFIDENCE_OBSERVED;
            }
        }

        analysis.content = content;
        analysis
    }

    /// Ask an agent to exit, then remove its window.
    pub async fn terminate_agent(&mut self, target: &str) -> Result<()> {
        let (session, _) =
            split_target(target).ok_or_else(|| anyhow!("invalid target: {}", target))?;
        let delay = Duration::from_millis(self.sampling.capture_delay_ms);

        if !self.terminal.has_session(session).await {
            anyhow::bail!("session {} does not exist", session);
        }

        self.terminal.send_keys(target, "C-c").await?;
        pause(delay).await;
        self.terminal.send_text(target, "/exit").await?;
        self.terminal.send_keys(target, "Enter").await?;
        pause(delay).await;
        self.terminal
            .kill_window(target)
            .await
            .with_context(|| format!("Failed to kill window {}", target))?;

        self.invalidate_cache();
        info!(agent = %target, "Agent terminated");
        Ok(())
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::mock::MockTerminal;

    fn monitor(terminal: Arc<MockTerminal>) -> AgentMonitor {
        let sampling = SamplingConfig {
            capture_delay_ms: 0,
            sample_interval_ms: 0,
            discovery_cache_ttl_secs: 0,
            ..Default::default()
        };
        let detector = Arc::new(CrashDetector::new(
            terminal.clone(),
            50,
            Duration::from_secs(120),
        ));
        AgentMonitor::new(terminal, detector, sampling, 50)
    }

    fn info(target: &str, name: &str) -> AgentInfo {
        let (session, window) = split_target(target).unwrap();
        AgentInfo {
            target: target.to_string(),
            session: session.to_string(),
            window,
            name: name.to_string(),
            role: classify_window(name).unwrap_or(AgentRole::Generic),
            status: AgentStatus::Unknown,
        }
    }

    #[test]
    fn test_classify_window() {
        assert_eq!(classify_window("PM"), Some(AgentRole::ProjectManager));
        assert_eq!(classify_window("Project-Manager"), Some(AgentRole::ProjectManager));
        assert_eq!(classify_window("Claude-backend"), Some(AgentRole::Developer));
        assert_eq!(classify_window("QA-Engineer"), Some(AgentRole::Tester));
        assert_eq!(classify_window("devops"), Some(AgentRole::DevOps));
        assert_eq!(classify_window("Claude-Agent"), Some(AgentRole::Generic));
        assert_eq!(classify_window("Orchestrator"), Some(AgentRole::Orchestrator));
        assert_eq!(classify_window("shell"), None);
        assert_eq!(classify_window("dev-server-logs"), Some(AgentRole::Developer));
        assert_eq!(classify_window("logs"), None);
    }

    #[test]
    fn test_changed_bytes() {
        assert_eq!(changed_bytes("abc", "abc"), 0);
        assert_eq!(changed_bytes("abc", "abd"), 1);
        assert_eq!(changed_bytes("abc", "abcdef"), 3);
    }

    #[tokio::test]
    async fn test_discover_filters_non_agents() {
        let terminal = Arc::new(MockTerminal::new());
        terminal.add_window("proj", 0, "PM");
        terminal.add_window("proj", 1, "Claude-frontend");
        terminal.add_window("proj", 2, "shell");

        let mut monitor = monitor(terminal);
        let agents = monitor.discover().await;
        let targets: Vec<_> = agents.iter().map(|a| a.target.as_str()).collect();
        assert_eq!(targets, vec!["proj:0", "proj:1"]);
        assert_eq!(agents[0].role, AgentRole::ProjectManager);
    }

    #[tokio::test]
    async fn test_discover_reports_failed_sessions() {
        let terminal = Arc::new(MockTerminal::new());
        terminal.add_window("good", 1, "Claude-dev");
        terminal.add_window("bad", 1, "Claude-dev");
        terminal.fail_session("bad");

        let mut monitor = monitor(terminal);
        let discovery = monitor.discover_detailed().await;
        assert_eq!(discovery.agents.len(), 1);
        assert_eq!(discovery.errors.len(), 1);
        assert!(discovery.failed_sessions.contains("bad"));
        assert!(discovery.sessions_listed);
    }

    #[tokio::test]
    async fn test_unlisted_sessions_are_flagged() {
        let terminal = Arc::new(MockTerminal::new());
        terminal.add_window("proj", 1, "Claude-dev");
        terminal.stop_server();

        let mut monitor = monitor(terminal);
        let discovery = monitor.discover_detailed().await;
        assert!(!discovery.sessions_listed);
        assert!(discovery.agents.is_empty());
        assert_eq!(discovery.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_cache() {
        let terminal = Arc::new(MockTerminal::new());
        terminal.add_window("proj", 1, "Claude-dev");

        let mut monitor = monitor(terminal.clone());
        monitor.sampling.discovery_cache_ttl_secs = 60;
        assert_eq!(monitor.discover().await.len(), 1);

        terminal.add_window("proj", 2, "Claude-qa");
        assert_eq!(monitor.discover().await.len(), 1);

        monitor.invalidate_cache();
        assert_eq!(monitor.discover().await.len(), 2);
    }

    #[tokio::test]
    async fn test_is_agent_window_uses_name_only() {
        let terminal = Arc::new(MockTerminal::new());
        let dev = terminal.add_window("proj", 1, "Claude-dev");
        terminal.set_content(&dev, "me@box:~$ ");
        terminal.add_window("proj", 2, "shell");

        let monitor = monitor(terminal);
        assert!(monitor.is_agent_window("proj:1").await);
        assert!(!monitor.is_agent_window("proj:2").await);
        assert!(!monitor.is_agent_window("proj:9").await);
        assert!(!monitor.is_agent_window("nonsense").await);
    }

    #[tokio::test]
    async fn test_static_content_is_newly_idle() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");
        terminal.script(&t, &["X", "X", "X"]);

        let analysis = monitor(terminal.clone()).analyze_content(&info(&t, "Claude-dev"), None).await;
        assert!(analysis.is_idle);
        assert_eq!(analysis.idle_type, IdleType::NewlyIdle);
        assert_eq!(analysis.confidence, CONFIDENCE_INFERRED);
        assert!(!analysis.error_detected);
        assert_eq!(analysis.content, "X");
        assert_eq!(terminal.capture_calls(), 3);
    }

    #[tokio::test]
    async fn test_changing_content_is_active() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");
        terminal.script(
            &t,
            &[
                "Reading src/lib.rs",
                "Reading src/lib.rs\nEditing src/main.rs with a long change",
                "Reading src/lib.rs\nEditing src/main.rs with a long change\nRunning tests",
            ],
        );

        let analysis = monitor(terminal).analyze_content(&info(&t, "Claude-dev"), None).await;
        assert!(!analysis.is_idle);
        assert_eq!(analysis.confidence, CONFIDENCE_OBSERVED);
    }

    #[tokio::test]
    async fn test_small_churn_is_not_activity() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");
        terminal.script(&t, &["Waiting 12:00:01", "Waiting 12:00:02", "Waiting 12:00:03"]);

        let analysis = monitor(terminal).analyze_content(&info(&t, "Claude-dev"), None).await;
        assert!(analysis.is_idle);
    }

    #[tokio::test]
    async fn test_crash_overrides_fresh() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");
        terminal.set_content(
            &t,
            "Welcome to Claude Code\nTraceback (most recent call last):\n  boom",
        );

        let analysis = monitor(terminal).analyze_content(&info(&t, "Claude-dev"), None).await;
        assert_eq!(analysis.idle_type, IdleType::Erroring);
        assert_eq!(analysis.error_kind, Some(ErrorKind::Crash));
        assert!(analysis.agent_error());
    }

    #[tokio::test]
    async fn test_compacting_is_not_idle() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");
        terminal.set_content(&t, "│ > \n✻ Compacting conversation…");

        let analysis = monitor(terminal).analyze_content(&info(&t, "Claude-dev"), None).await;
        assert!(!analysis.is_idle);
        assert_eq!(analysis.idle_type, IdleType::Compacting);
    }

    #[tokio::test]
    async fn test_api_error_and_fresh() {
        let terminal = Arc::new(MockTerminal::new());
        let err = terminal.add_window("s", 1, "Claude-dev");
        let fresh = terminal.add_window("s", 2, "Claude-qa");
        terminal.set_content(&err, "│ > \n  ⎿ API Error: 529 overloaded");
        terminal.set_content(&fresh, "✻ Welcome to Claude Code!\n/help for help\n│ > ");

        let monitor = monitor(terminal);
        let analysis = monitor.analyze_content(&info(&err, "Claude-dev"), None).await;
        assert_eq!(analysis.idle_type, IdleType::Erroring);
        assert_eq!(analysis.error_kind, Some(ErrorKind::ServerError));

        let analysis = monitor.analyze_content(&info(&fresh, "Claude-qa"), None).await;
        assert!(analysis.is_idle);
        assert_eq!(analysis.idle_type, IdleType::Fresh);
    }

    #[tokio::test]
    async fn test_silent_error_banner_is_crash() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");
        terminal.set_content(&t, "Error: connection reset by peer");

        let monitor = monitor(terminal);
        let agent = info(&t, "Claude-dev");

        let analysis = monitor.analyze_content(&agent, Some(Duration::from_secs(30))).await;
        assert!(!analysis.agent_error());

        let analysis = monitor.analyze_content(&agent, Some(Duration::from_secs(300))).await;
        assert_eq!(analysis.error_kind, Some(ErrorKind::Crash));
        assert!(analysis.error_detail.unwrap().contains("silence"));
    }

    #[tokio::test]
    async fn test_capture_failure_degrades() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");
        terminal.fail_capture(&t);

        let analysis = monitor(terminal).analyze_content(&info(&t, "Claude-dev"), None).await;
        assert!(analysis.is_idle);
        assert_eq!(analysis.idle_type, IdleType::Unknown);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.error_kind, Some(ErrorKind::AnalysisFailed));
    }

    #[tokio::test]
    async fn test_terminate_agent() {
        let terminal = Arc::new(MockTerminal::new());
        let t = terminal.add_window("s", 1, "Claude-dev");

        let mut monitor = monitor(terminal.clone());
        monitor.terminate_agent(&t).await.unwrap();

        assert_eq!(terminal.sent_keys()[0], (t.clone(), "C-c".to_string()));
        assert_eq!(terminal.sent_text()[0], (t.clone(), "/exit".to_string()));
        assert_eq!(terminal.killed_windows(), vec![t]);

        assert!(monitor.terminate_agent("gone:1").await.is_err());
    }
}
