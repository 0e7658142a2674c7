use thiserror::Error;

use crate::monitor::ManagerState;

/// Typed failures surfaced by the monitor to its callers.
///
/// Transient tmux failures never show up here; they degrade a verdict or
/// land in a cycle's error list instead.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{component} failed to initialize: {reason}")]
    Initialization {
        component: &'static str,
        reason: String,
    },

    #[error("monitor is not running (state: {0})")]
    NotRunning(ManagerState),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MonitorError {
    pub fn init(component: &'static str, err: &anyhow::Error) -> Self {
        MonitorError::Initialization {
            component,
            reason: format!("{:#}", err),
        }
    }
}
