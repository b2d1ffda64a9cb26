use crate::config::Target;
use crate::metrics::MetricGroup;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Where a polling task is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Due,
    Running,
    /// Retired after a persistent error; never scheduled again
    Failed,
}

/// Recurring unit of work: one metric group on one target
#[derive(Debug, Clone)]
pub struct PollingTask {
    pub id: String,
    pub target: Arc<Target>,
    pub group: MetricGroup,
    pub interval: Duration,
    pub next_due: Instant,
}

impl PollingTask {
    pub fn new(target: Arc<Target>, group: MetricGroup, first_due: Instant) -> Self {
        Self {
            id: format!("{}/{}", target.host, group),
            interval: target.interval(),
            target,
            group,
            next_due: first_due,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Move `next_due` to the first slot after `now` on the fixed grid
    /// `first_due + k * interval`. Returns how many slots were skipped
    /// on the way (0 when the task fired on time).
    pub fn advance(&mut self, now: Instant) -> u32 {
        let mut skipped = 0;
        self.next_due += self.interval;
        while self.next_due <= now {
            self.next_due += self.interval;
            skipped += 1;
        }
        skipped
    }
}
