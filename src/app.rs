use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::actions::Action;
use agent_sentinel::monitor::MonitorCycleResult;
use agent_sentinel::ComponentManager;

/// Daemon state: the monitor plus where its status goes
pub struct App {
    manager: ComponentManager,
    /// Status snapshot location; `None` disables the snapshot
    snapshot_path: Option<PathBuf>,
    /// Last snapshot write failed; suppresses repeat warnings
    snapshot_failing: bool,
}

impl App {
    pub fn new(manager: ComponentManager, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            manager,
            snapshot_path,
            snapshot_failing: false,
        }
    }

    pub fn manager(&self) -> &ComponentManager {
        &self.manager
    }

    /// Handle an action and return whether to quit
    pub async fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::Tick => {
                self.run_cycle().await;
                self.write_snapshot().await;
                Ok(false)
            }
            Action::Error(msg) => {
                warn!(error = %msg, "Background task failed");
                Ok(false)
            }
            Action::Shutdown => {
                info!("Shutting down");
                self.manager.stop().await;
                self.write_snapshot().await;
                Ok(true)
            }
        }
    }

    async fn run_cycle(&mut self) -> MonitorCycleResult {
        let result = self.manager.execute_monitoring_cycle().await;
        if result.success() {
            info!(
                agents = result.agents_discovered,
                idle = result.idle_agents,
                sent = result.notifications_sent,
                duration_ms = result.duration.as_millis() as u64,
                "Cycle complete"
            );
        } else {
            warn!(
                agents = result.agents_discovered,
                errors = result.errors.len(),
                first = %result.errors[0],
                "Cycle completed with errors"
            );
        }
        result
    }

    async fn write_snapshot(&mut self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };

        match self.manager.snapshot().write_atomic(path).await {
            Ok(()) => {
                if self.snapshot_failing {
                    info!(path = %path.display(), "Status snapshot writable again");
                }
                self.snapshot_failing = false;
            }
            Err(e) => {
                if !self.snapshot_failing {
                    warn!(path = %path.display(), error = %e, "Failed to write status snapshot");
                }
                self.snapshot_failing = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_sentinel::monitor::StatusSnapshot;
    use agent_sentinel::{ManagerState, MonitorConfig, TmuxClient};
    use std::sync::Arc;
    use std::time::Duration;

    fn idle_app(snapshot_path: Option<PathBuf>) -> App {
        let client = TmuxClient::with_path("/nonexistent/tmux");
        let manager = ComponentManager::new(Arc::new(client), MonitorConfig::default());
        App::new(manager, snapshot_path)
    }

    #[tokio::test]
    async fn test_tick_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut app = idle_app(Some(path.clone()));

        assert!(!app.handle_action(Action::Tick).await.unwrap());

        let snapshot = StatusSnapshot::load_fresh(&path, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(snapshot.daemon.state, "uninitialized");
    }

    #[tokio::test]
    async fn test_errors_do_not_quit() {
        let mut app = idle_app(None);
        let quit = app
            .handle_action(Action::Error("signal handler gone".to_string()))
            .await
            .unwrap();
        assert!(!quit);
    }

    #[tokio::test]
    async fn test_shutdown_stops_manager() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut app = idle_app(Some(path.clone()));

        assert!(app.handle_action(Action::Shutdown).await.unwrap());
        assert_eq!(app.manager().state(), ManagerState::Stopped);

        let snapshot = StatusSnapshot::load_fresh(&path, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(snapshot.daemon.state, "stopped");
    }
}
