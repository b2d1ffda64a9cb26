use super::{MetricKind, Sample};
use std::collections::{HashMap, VecDeque};

/// Samples kept per (target, kind). Derivation only ever looks at the last
/// two; the rest feed trend output.
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HistoryKey {
    target: String,
    kind: MetricKind,
}

impl HistoryKey {
    fn new(target: &str, kind: &MetricKind) -> Self {
        Self {
            target: target.to_string(),
            kind: kind.clone(),
        }
    }
}

/// Bounded, insertion-ordered sample rings keyed by (target, kind)
#[derive(Debug, Clone)]
pub struct SampleHistory {
    rings: HashMap<HistoryKey, VecDeque<Sample>>,
    capacity: usize,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rings: HashMap::new(),
            capacity: capacity.max(2),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest one when the ring is full
    pub fn record(&mut self, sample: Sample) {
        let capacity = self.capacity;
        let ring = self
            .rings
            .entry(HistoryKey::new(&sample.target, &sample.kind))
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if ring.len() == capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// `(prior, latest)`; either is `None` when fewer samples exist
    pub fn last_two(&self, target: &str, kind: &MetricKind) -> (Option<&Sample>, Option<&Sample>) {
        match self.rings.get(&HistoryKey::new(target, kind)) {
            Some(ring) => {
                let mut newest = ring.iter().rev();
                let latest = newest.next();
                let prior = newest.next();
                (prior, latest)
            }
            None => (None, None),
        }
    }

    /// Most recent samples, at most `n`, oldest first
    pub fn latest_n(&self, target: &str, kind: &MetricKind, n: usize) -> Vec<&Sample> {
        match self.rings.get(&HistoryKey::new(target, kind)) {
            Some(ring) => ring.iter().skip(ring.len().saturating_sub(n)).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, target: &str, kind: &MetricKind) -> usize {
        self.rings
            .get(&HistoryKey::new(target, kind))
            .map_or(0, VecDeque::len)
    }
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RawValue;
    use chrono::Utc;
    use tokio::time::Instant;

    fn sample(target: &str, kind: MetricKind, value: i64) -> Sample {
        Sample {
            timestamp: Utc::now(),
            observed_at: Instant::now(),
            target: target.to_string(),
            kind,
            raw: RawValue::Integer(value),
        }
    }

    fn values(samples: &[&Sample]) -> Vec<i64> {
        samples.iter().filter_map(|s| s.raw.as_i64()).collect()
    }

    #[test]
    fn test_last_two_signals_absence() {
        let mut history = SampleHistory::new();
        assert_eq!(history.last_two("10.0.0.1", &MetricKind::Uptime), (None, None));

        history.record(sample("10.0.0.1", MetricKind::Uptime, 1));
        let (prior, latest) = history.last_two("10.0.0.1", &MetricKind::Uptime);
        assert!(prior.is_none());
        assert_eq!(latest.and_then(|s| s.raw.as_i64()), Some(1));

        history.record(sample("10.0.0.1", MetricKind::Uptime, 2));
        let (prior, latest) = history.last_two("10.0.0.1", &MetricKind::Uptime);
        assert_eq!(prior.and_then(|s| s.raw.as_i64()), Some(1));
        assert_eq!(latest.and_then(|s| s.raw.as_i64()), Some(2));
    }

    #[test]
    fn test_eviction_keeps_newest_ten() {
        let mut history = SampleHistory::new();
        for v in 1..=12 {
            history.record(sample("10.0.0.1", MetricKind::InOctets, v));
            assert!(history.len("10.0.0.1", &MetricKind::InOctets) <= HISTORY_CAPACITY);
        }

        let all = history.latest_n("10.0.0.1", &MetricKind::InOctets, 100);
        assert_eq!(values(&all), (3..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_capacity_holds_after_many_inserts() {
        let mut history = SampleHistory::new();
        for v in 0..1000 {
            history.record(sample("10.0.0.1", MetricKind::IpInReceives, v));
        }
        assert_eq!(
            history.len("10.0.0.1", &MetricKind::IpInReceives),
            HISTORY_CAPACITY
        );
    }

    #[test]
    fn test_latest_n_is_chronological() {
        let mut history = SampleHistory::new();
        for v in [10, 20, 30, 40] {
            history.record(sample("10.0.0.1", MetricKind::Uptime, v));
        }
        let last = history.latest_n("10.0.0.1", &MetricKind::Uptime, 2);
        assert_eq!(values(&last), vec![30, 40]);
        assert!(history.latest_n("10.0.0.9", &MetricKind::Uptime, 2).is_empty());
    }

    #[test]
    fn test_keys_are_disjoint() {
        let mut history = SampleHistory::new();
        history.record(sample("10.0.0.1", MetricKind::Uptime, 1));
        history.record(sample("10.0.0.2", MetricKind::Uptime, 2));
        history.record(sample("10.0.0.1", MetricKind::InOctets, 3));

        assert_eq!(history.len("10.0.0.1", &MetricKind::Uptime), 1);
        assert_eq!(history.len("10.0.0.2", &MetricKind::Uptime), 1);
        assert_eq!(history.len("10.0.0.1", &MetricKind::InOctets), 1);
    }
}
