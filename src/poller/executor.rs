use crate::config::Target;
use crate::metrics::{
    derive, DeriveContext, DeriveError, DerivedMetric, DerivedValue, MetricGroup, MetricKind,
    MetricSpec, RawValue, Sample, SampleHistory,
};
use crate::sink::SinkHandle;
use crate::snmp::{QueryClient, SnmpError, SnmpResult, SnmpValue};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// How one polling cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// At least one query timed out; the task stays scheduled
    TimedOut,
    /// A query failed for a non-transient reason
    Failed { error: SnmpError, retire: bool },
}

/// Runs the fetch -> record -> derive -> report sequence for one task.
///
/// Each runner owns the sample history of its own (target, kind) pairs, so
/// no two runners ever touch the same history.
pub struct TaskRunner {
    target: Arc<Target>,
    group: MetricGroup,
    client: Arc<dyn QueryClient>,
    sink: SinkHandle,
    history: SampleHistory,
    query_timeout: Duration,
    failure_threshold: u32,
    consecutive_failures: u32,
}

impl TaskRunner {
    pub fn new(
        target: Arc<Target>,
        group: MetricGroup,
        client: Arc<dyn QueryClient>,
        sink: SinkHandle,
        query_timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            target,
            group,
            client,
            sink,
            history: SampleHistory::new(),
            query_timeout,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    /// Poll every metric of the group once, in order
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let specs = self.group.specs();
        let mut ctx = DeriveContext::new(self.target.interval_secs);
        let mut timed_out = false;

        debug!(
            "Polling {} on {} (community: {})",
            self.group,
            self.target.host,
            self.target.community.redacted()
        );

        for spec in &specs {
            let oid = spec.oid();

            match self.fetch(spec, &oid).await {
                Ok(raw) => {
                    if spec.kind == MetricKind::IfSpeed {
                        ctx.if_speed = raw.as_i64().and_then(|v| u64::try_from(v).ok());
                    }
                    let value = self.record_and_derive(&spec.kind, raw.clone(), &ctx);
                    self.report(spec, &oid, Some(raw), value);
                }
                Err(e) if e.is_transient() => {
                    warn!("Timed out polling {} on {}", oid, self.target.host);
                    timed_out = true;
                    self.report(spec, &oid, None, DerivedValue::Timeout);
                }
                Err(e) => {
                    self.report(spec, &oid, None, DerivedValue::Error(e.to_string()));
                    return self.persistent_failure(e);
                }
            }
        }

        if timed_out {
            CycleOutcome::TimedOut
        } else {
            self.consecutive_failures = 0;
            CycleOutcome::Completed
        }
    }

    async fn fetch(&self, spec: &MetricSpec, oid: &str) -> SnmpResult<RawValue> {
        let value = match timeout(self.query_timeout, self.client.fetch(&self.target, oid)).await {
            Ok(result) => result?,
            Err(_) => return Err(SnmpError::Timeout),
        };
        to_raw(&spec.kind, oid, value)
    }

    fn record_and_derive(&mut self, kind: &MetricKind, raw: RawValue, ctx: &DeriveContext) -> DerivedValue {
        let host = self.target.host.as_str();
        self.history.record(Sample {
            timestamp: Utc::now(),
            observed_at: Instant::now(),
            target: host.to_string(),
            kind: kind.clone(),
            raw,
        });

        let (prior, latest) = self.history.last_two(host, kind);
        let Some(latest) = latest else {
            return DerivedValue::Error("sample missing from history".to_string());
        };

        let value = match derive(kind, prior, latest, ctx) {
            Ok(value) => value,
            Err(DeriveError::UnmappedStatus(code)) => {
                warn!("{} reported unmapped {} code {}", host, kind, code);
                DerivedValue::UnknownStatus(code)
            }
            Err(e) => DerivedValue::Error(e.to_string()),
        };

        let trend: Vec<String> = self
            .history
            .latest_n(host, kind, self.history.capacity())
            .iter()
            .map(|s| s.raw.to_string())
            .collect();
        debug!("{} {} trend: [{}]", host, kind, trend.join(", "));

        value
    }

    fn report(&self, spec: &MetricSpec, oid: &str, raw: Option<RawValue>, value: DerivedValue) {
        self.sink.report(DerivedMetric {
            timestamp: Utc::now(),
            target: self.target.host.clone(),
            kind: spec.kind.clone(),
            oid: oid.to_string(),
            raw,
            value,
        });
    }

    fn persistent_failure(&mut self, error: SnmpError) -> CycleOutcome {
        self.consecutive_failures += 1;
        let retire = self.consecutive_failures >= self.failure_threshold;

        if retire {
            warn!(
                "Polling {} on {} failed {} time(s) in a row, retiring task: {}",
                self.group, self.target.host, self.consecutive_failures, error
            );
        } else {
            info!(
                "Polling {} on {} failed ({} of {} before retiring): {}",
                self.group,
                self.target.host,
                self.consecutive_failures,
                self.failure_threshold,
                error
            );
        }

        CycleOutcome::Failed { error, retire }
    }
}

/// Convert an SNMP value into the raw value a kind expects
fn to_raw(kind: &MetricKind, oid: &str, value: SnmpValue) -> SnmpResult<RawValue> {
    if kind.expects_integer() {
        return value
            .as_i64()
            .map(RawValue::Integer)
            .ok_or_else(|| SnmpError::UnexpectedType {
                oid: oid.to_string(),
                found: value.type_name().to_string(),
            });
    }

    Ok(match value {
        SnmpValue::String(s) | SnmpValue::Oid(s) | SnmpValue::IpAddress(s) => RawValue::Text(s),
        other => match other.as_i64() {
            Some(v) => RawValue::Integer(v),
            None => RawValue::Text(other.to_string()),
        },
    })
}
