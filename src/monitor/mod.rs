//! The monitoring engine: discovery, analysis, tracking and alerting.

pub mod agent_monitor;
pub mod crash;
pub mod cycle;
pub mod manager;
pub mod notifications;
pub mod relay;
pub mod snapshot;
pub mod state_tracker;
pub mod stats;
pub mod strategy;
pub mod types;

pub use agent_monitor::{classify_window, AgentMonitor};
pub use crash::CrashDetector;
pub use manager::{ComponentManager, ManagerState};
pub use notifications::NotificationManager;
pub use relay::{MessageRelay, RelayPriority};
pub use snapshot::StatusSnapshot;
pub use state_tracker::StateTracker;
pub use strategy::MonitoringStrategy;
pub use types::{
    AgentInfo, AgentRole, AgentStatus, IdleAnalysis, IdleType, MonitorCycleResult, MonitorStatus,
    NotificationEvent, NotificationType,
};
