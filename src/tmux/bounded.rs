//! Time limit on every terminal call.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{SessionInfo, TerminalInterface, WindowInfo};

/// Wraps a terminal so no single call can stall the monitor.
///
/// A call that runs past the limit fails like any other tmux error. With
/// `TmuxClient` the dropped future also kills the tmux child.
pub struct BoundedTerminal {
    inner: Arc<dyn TerminalInterface>,
    limit: Duration,
}

impl BoundedTerminal {
    pub fn new(inner: Arc<dyn TerminalInterface>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T: Send>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    call = what,
                    limit_ms = self.limit.as_millis() as u64,
                    "tmux call timed out"
                );
                Err(anyhow!("tmux {} timed out after {:?}", what, self.limit))
            }
        }
    }
}

#[async_trait]
impl TerminalInterface for BoundedTerminal {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        self.bounded("list-sessions", self.inner.list_sessions()).await
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>> {
        self.bounded("list-windows", self.inner.list_windows(session))
            .await
    }

    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String> {
        self.bounded("capture-pane", self.inner.capture_pane(target, lines))
            .await
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        self.bounded("send-keys", self.inner.send_text(target, text))
            .await
    }

    async fn send_keys(&self, target: &str, key: &str) -> Result<()> {
        self.bounded("send-keys", self.inner.send_keys(target, key))
            .await
    }

    async fn kill_window(&self, target: &str) -> Result<()> {
        self.bounded("kill-window", self.inner.kill_window(target))
            .await
    }

    async fn kill_session(&self, session: &str) -> Result<()> {
        self.bounded("kill-session", self.inner.kill_session(session))
            .await
    }

    async fn has_session(&self, name: &str) -> bool {
        tokio::time::timeout(self.limit, self.inner.has_session(name))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::mock::MockTerminal;

    #[tokio::test]
    async fn test_hung_calls_fail_after_limit() {
        let mock = Arc::new(MockTerminal::new());
        let target = mock.add_window("s", 0, "pm");
        mock.set_content(&target, "ok");
        mock.hang("s");
        mock.hang(&target);

        let terminal = BoundedTerminal::new(mock, Duration::from_millis(50));
        let started = std::time::Instant::now();

        let err = terminal.capture_pane(&target, 50).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(terminal.list_windows("s").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_prompt_calls_pass_through() {
        let mock = Arc::new(MockTerminal::new());
        let target = mock.add_window("s", 0, "pm");
        mock.set_content(&target, "ok");

        let terminal = BoundedTerminal::new(mock.clone(), Duration::from_millis(500));
        assert_eq!(terminal.capture_pane(&target, 50).await.unwrap(), "ok");
        assert_eq!(terminal.list_sessions().await.unwrap().len(), 1);
        assert!(terminal.has_session("s").await);
        terminal.send_keys(&target, "Enter").await.unwrap();
        assert_eq!(mock.sent_keys(), vec![(target, "Enter".to_string())]);
    }
}
