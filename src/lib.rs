pub mod config;
pub mod error;
pub mod monitor;
pub mod tmux;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use monitor::{ComponentManager, ManagerState};
pub use tmux::{TerminalInterface, TmuxClient};
