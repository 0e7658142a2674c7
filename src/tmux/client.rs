use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use super::{SessionInfo, TerminalInterface, WindowInfo};

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    /// Use a specific tmux binary
    pub fn with_path(tmux_path: impl Into<String>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
        }
    }

    /// A tmux command that is killed if its future is dropped, e.g. on timeout
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.tmux_path);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Check if tmux server is running
    pub async fn is_server_running(&self) -> bool {
        self.command()
            .arg("list-sessions")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run tmux with `args` and return stdout, failing on a non-zero exit.
    async fn run(&self, args: &[&str], what: &str) -> Result<String> {
        let output = self.command()
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute tmux {}", what))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux {} failed: {}", what, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_session_line(line: &str) -> Option<SessionInfo> {
        // Format: session_name|session_windows|session_attached
        let parts: Vec<&str> = line.rsplitn(3, '|').collect();
        if parts.len() < 3 {
            return None;
        }

        Some(SessionInfo {
            name: parts[2].to_string(),
            windows: parts[1].parse().unwrap_or(0),
            attached: parts[0].parse::<u32>().map(|n| n > 0).unwrap_or(false),
        })
    }

    fn parse_window_line(line: &str) -> Option<WindowInfo> {
        // Format: window_index|window_name
        let (index, name) = line.split_once('|')?;
        Some(WindowInfo {
            index: index.trim().parse().ok()?,
            name: name.to_string(),
        })
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TerminalInterface for TmuxClient {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let output = self.command()
            .args([
                "list-sessions",
                "-F",
                "#{session_name}|#{session_windows}|#{session_attached}",
            ])
            .output()
            .await
            .context("Failed to execute tmux list-sessions")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("no sessions") {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-sessions failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(Self::parse_session_line).collect())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>> {
        let stdout = self
            .run(
                &[
                    "list-windows",
                    "-t",
                    session,
                    "-F",
                    "#{window_index}|#{window_name}",
                ],
                "list-windows",
            )
            .await?;

        Ok(stdout.lines().filter_map(Self::parse_window_line).collect())
    }

    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String> {
        let start = format!("-{}", lines);
        self.run(
            &["capture-pane", "-p", "-t", target, "-S", &start],
            "capture-pane",
        )
        .await
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        // -l sends the text literally so key names inside messages are not interpreted
        self.run(&["send-keys", "-t", target, "-l", text], "send-keys")
            .await?;
        Ok(())
    }

    async fn send_keys(&self, target: &str, key: &str) -> Result<()> {
        self.run(&["send-keys", "-t", target, key], "send-keys")
            .await?;
        Ok(())
    }

    async fn kill_window(&self, target: &str) -> Result<()> {
        self.run(&["kill-window", "-t", target], "kill-window")
            .await?;
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<()> {
        self.run(&["kill-session", "-t", session], "kill-session")
            .await?;
        Ok(())
    }

    async fn has_session(&self, name: &str) -> bool {
        self.command()
            .args(["has-session", "-t", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_line() {
        let session = TmuxClient::parse_session_line("team-alpha|4|1").unwrap();
        assert_eq!(session.name, "team-alpha");
        assert_eq!(session.windows, 4);
        assert!(session.attached);

        // Session names may themselves contain the separator
        let session = TmuxClient::parse_session_line("odd|name|2|0").unwrap();
        assert_eq!(session.name, "odd|name");
        assert!(!session.attached);

        assert!(TmuxClient::parse_session_line("garbage").is_none());
    }

    #[test]
    fn test_parse_window_line() {
        let window = TmuxClient::parse_window_line("2|Claude-backend").unwrap();
        assert_eq!(window, WindowInfo::new(2, "Claude-backend"));
        assert!(TmuxClient::parse_window_line("x|shell").is_none());
        assert!(TmuxClient::parse_window_line("no separator").is_none());
    }
}
