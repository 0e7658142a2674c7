//! Scripted in-memory terminal used by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::{make_target, SessionInfo, TerminalInterface, WindowInfo};

#[derive(Default)]
struct MockInner {
    server_down: bool,
    sessions: Vec<String>,
    windows: HashMap<String, Vec<WindowInfo>>,
    /// Queued captures per target; the last one repeats once the queue drains
    captures: HashMap<String, VecDeque<String>>,
    failing_sessions: HashSet<String>,
    failing_captures: HashSet<String>,
    failing_sends: HashSet<String>,
    /// Sessions and targets whose calls never complete
    hung: HashSet<String>,
    sent_text: Vec<(String, String)>,
    sent_keys: Vec<(String, String)>,
    killed_windows: Vec<String>,
    capture_calls: usize,
}

/// In-memory `TerminalInterface` with scripted pane content.
#[derive(Default)]
pub struct MockTerminal {
    inner: Mutex<MockInner>,
}

impl MockTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a window, creating its session if needed. Returns the target.
    pub fn add_window(&self, session: &str, index: u32, name: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.iter().any(|s| s == session) {
            inner.sessions.push(session.to_string());
        }
        inner
            .windows
            .entry(session.to_string())
            .or_default()
            .push(WindowInfo::new(index, name));
        make_target(session, index)
    }

    pub fn remove_window(&self, session: &str, index: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(windows) = inner.windows.get_mut(session) {
            windows.retain(|w| w.index != index);
        }
    }

    /// Queue captures returned in order for `target`
    pub fn script(&self, target: &str, captures: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.captures.entry(target.to_string()).or_default();
        queue.extend(captures.iter().map(|c| c.to_string()));
    }

    /// Replace whatever is queued for `target` with a single static capture
    pub fn set_content(&self, target: &str, content: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .captures
            .insert(target.to_string(), VecDeque::from([content.to_string()]));
    }

    /// Make `list_sessions` fail as if no tmux server were running
    pub fn stop_server(&self) {
        self.inner.lock().unwrap().server_down = true;
    }

    pub fn fail_session(&self, session: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_sessions.insert(session.to_string());
    }

    pub fn fail_capture(&self, target: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_captures.insert(target.to_string());
    }

    /// Make calls for a session or target block forever
    pub fn hang(&self, session_or_target: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.hung.insert(session_or_target.to_string());
    }

    pub fn fail_send(&self, target: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_sends.insert(target.to_string());
    }

    pub fn sent_text(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().sent_text.clone()
    }

    pub fn sent_keys(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().sent_keys.clone()
    }

    pub fn killed_windows(&self) -> Vec<String> {
        self.inner.lock().unwrap().killed_windows.clone()
    }

    pub fn capture_calls(&self) -> usize {
        self.inner.lock().unwrap().capture_calls
    }
}

#[async_trait]
impl TerminalInterface for MockTerminal {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let inner = self.inner.lock().unwrap();
        if inner.server_down {
            return Err(anyhow!("no server running on /tmp/tmux-1000/default"));
        }
        Ok(inner
            .sessions
            .iter()
            .map(|name| SessionInfo {
                name: name.clone(),
                windows: inner.windows.get(name).map(Vec::len).unwrap_or(0),
                attached: false,
            })
            .collect())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.failing_sessions.contains(session) {
                return Err(anyhow!("can't find session: {}", session));
            }
            if !inner.hung.contains(session) {
                return Ok(inner.windows.get(session).cloned().unwrap_or_default());
            }
        }
        std::future::pending::<Result<Vec<WindowInfo>>>().await
    }

    async fn capture_pane(&self, target: &str, _lines: usize) -> Result<String> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.capture_calls += 1;
            if inner.failing_captures.contains(target) {
                return Err(anyhow!("can't find pane: {}", target));
            }
            if !inner.hung.contains(target) {
                let queue = inner
                    .captures
                    .get_mut(target)
                    .ok_or_else(|| anyhow!("can't find pane: {}", target))?;
                let content = if queue.len() > 1 {
                    queue.pop_front().unwrap_or_default()
                } else {
                    queue.front().cloned().unwrap_or_default()
                };
                return Ok(content);
            }
        }
        std::future::pending::<Result<String>>().await
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_sends.contains(target) {
            return Err(anyhow!("can't find pane: {}", target));
        }
        inner.sent_text.push((target.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_keys(&self, target: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_sends.contains(target) {
            return Err(anyhow!("can't find pane: {}", target));
        }
        inner.sent_keys.push((target.to_string(), key.to_string()));
        Ok(())
    }

    async fn kill_window(&self, target: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.killed_windows.push(target.to_string());
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.retain(|s| s != session);
        inner.windows.remove(session);
        Ok(())
    }

    async fn has_session(&self, name: &str) -> bool {
        self.inner.lock().unwrap().sessions.iter().any(|s| s == name)
    }
}
