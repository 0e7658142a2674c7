use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept for percentile reporting
pub const HISTORY_CAPACITY: usize = 100;

/// Rolling cycle timing and cumulative counters
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    history: VecDeque<Duration>,
    capacity: usize,
    pub cycles_completed: u64,
    pub total_errors: u64,
}

impl PerformanceStats {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            cycles_completed: 0,
            total_errors: 0,
        }
    }

    pub fn record(&mut self, duration: Duration, errors: usize) {
        self.history.push_back(duration);
        if self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.cycles_completed += 1;
        self.total_errors += errors as u64;
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last(&self) -> Option<Duration> {
        self.history.back().copied()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.history.is_empty() {
            return None;
        }
        let total: Duration = self.history.iter().sum();
        Some(total / self.history.len() as u32)
    }

    pub fn max(&self) -> Option<Duration> {
        self.history.iter().max().copied()
    }

    /// Nearest-rank percentile, `p` in 0..=100
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.history.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.history.iter().copied().collect();
        sorted.sort();
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self::new()
    }
}
