//! Optional low-latency delivery path.
//!
//! A relay accepts a report and hands it to the target pane faster than a
//! round trip through `tmux send-keys` would. It is strictly best effort: the
//! notification manager falls back to direct delivery the first time a relay
//! call fails and never tries the relay again.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery priority understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl RelayPriority {
    /// Latency the relay promises for this priority
    pub fn latency_budget(&self) -> Duration {
        match self {
            RelayPriority::Critical => Duration::from_millis(50),
            RelayPriority::High => Duration::from_millis(75),
            RelayPriority::Normal => Duration::from_millis(100),
            RelayPriority::Low => Duration::from_millis(500),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayPriority::Low => "low",
            RelayPriority::Normal => "normal",
            RelayPriority::High => "high",
            RelayPriority::Critical => "critical",
        }
    }
}

/// Acknowledgement from `publish`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub queued: bool,
}

/// Health report from the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStatus {
    pub status: String,
    pub avg_delivery_ms: f64,
    pub queue_size: usize,
}

impl RelayStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy" | "running")
    }
}

#[async_trait]
pub trait MessageRelay: Send + Sync {
    async fn publish(
        &self,
        target: &str,
        message: &str,
        priority: RelayPriority,
        tags: &[String],
    ) -> Result<PublishReceipt>;

    async fn status(&self) -> Result<RelayStatus>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_budgets() {
        assert_eq!(RelayPriority::Critical.latency_budget(), Duration::from_millis(50));
        assert_eq!(RelayPriority::High.latency_budget(), Duration::from_millis(75));
        assert_eq!(RelayPriority::Normal.latency_budget(), Duration::from_millis(100));
        assert_eq!(RelayPriority::Low.latency_budget(), Duration::from_millis(500));
        assert!(RelayPriority::Critical > RelayPriority::Low);
    }
}
