use super::Sink;
use crate::metrics::DerivedMetric;

/// Echoes every report as a log line: `timestamp => target => oid => value`
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn report(&mut self, metric: &DerivedMetric) -> anyhow::Result<()> {
        if metric.value.is_gap() {
            tracing::warn!(
                "{} => {} => {} => {}",
                metric.timestamp.format("%Y-%m-%d %H:%M:%S"),
                metric.target,
                metric.oid,
                metric.value
            );
        } else {
            tracing::info!(
                "{} => {} => {} => {}",
                metric.timestamp.format("%Y-%m-%d %H:%M:%S"),
                metric.target,
                metric.oid,
                metric.value
            );
        }
        Ok(())
    }
}
