//! Status views: queue composition and processor counters.

use serde::{Deserialize, Serialize};

use crate::domain::Priority;

/// Queued rows per priority band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
    pub critical: usize,
}

impl QueueCounts {
    pub fn add(&mut self, priority: Priority, n: usize) {
        match priority {
            Priority::Low => self.low += n,
            Priority::Normal => self.normal += n,
            Priority::High => self.high += n,
            Priority::Critical => self.critical += n,
        }
    }

    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.normal + self.high + self.critical
    }
}

/// What happened during one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Executor invocations.
    pub processed: u64,
    pub succeeded: u64,
    /// Kept in the queue with an incremented retry count.
    pub retried: u64,
    /// Dropped because the retry budget ran out.
    pub exhausted: u64,
    /// Dropped because the executor classified the failure as permanent.
    pub failed: u64,
    /// Removed by the expiry sweep at the start of the cycle.
    pub expired: u64,
}

impl DrainReport {
    /// Requests removed without being delivered.
    pub fn dropped(&self) -> u64 {
        self.exhausted + self.failed + self.expired
    }
}

/// Cumulative counters over the lifetime of a processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub totals: DrainReport,
}
