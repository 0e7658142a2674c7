mod bounded;
mod client;
mod heuristics;
#[cfg(test)]
pub mod mock;

pub use bounded::BoundedTerminal;
pub use client::TmuxClient;
pub use heuristics::{ContentSignals, ErrorKind};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Represents a tmux session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session name
    pub name: String,
    /// Number of windows in the session
    pub windows: usize,
    /// Whether a client is attached
    pub attached: bool,
}

impl SessionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            windows: 0,
            attached: false,
        }
    }
}

/// Represents a window inside a tmux session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    /// Window index within its session
    pub index: u32,
    /// Window name
    pub name: String,
}

impl WindowInfo {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// Build the `session:window` target string used by tmux.
pub fn make_target(session: &str, window: u32) -> String {
    format!("{}:{}", session, window)
}

/// Split a `session:window` target into its parts.
pub fn split_target(target: &str) -> Option<(&str, u32)> {
    let (session, window) = target.rsplit_once(':')?;
    let window = window.split('.').next()?.parse().ok()?;
    Some((session, window))
}

/// The operations the monitor needs from the terminal multiplexer.
///
/// `TmuxClient` is the production implementation; tests script a mock.
#[async_trait]
pub trait TerminalInterface: Send + Sync {
    /// List all sessions
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>>;

    /// List the windows of one session
    async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>>;

    /// Capture the most recent `lines` lines of visible output
    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String>;

    /// Type literal text into a pane (no trailing Enter)
    async fn send_text(&self, target: &str, text: &str) -> Result<()>;

    /// Send a named key such as `Enter` or `C-c`
    async fn send_keys(&self, target: &str, key: &str) -> Result<()>;

    /// Kill one window
    async fn kill_window(&self, target: &str) -> Result<()>;

    /// Kill a whole session
    async fn kill_session(&self, session: &str) -> Result<()>;

    /// Check whether a session exists
    async fn has_session(&self, name: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_round_trip() {
        assert_eq!(make_target("proj", 3), "proj:3");
        assert_eq!(split_target("proj:3"), Some(("proj", 3)));
        assert_eq!(split_target("my:proj:0.1"), Some(("my:proj", 0)));
        assert_eq!(split_target("proj"), None);
        assert_eq!(split_target("proj:abc"), None);
    }
}
