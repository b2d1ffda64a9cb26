use super::{DerivedValue, InterfaceStatus, MetricKind, Sample};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeriveError {
    #[error("unmapped interface status code {0}")]
    UnmappedStatus(i64),
    #[error("{0} sample is not numeric")]
    NotNumeric(MetricKind),
}

/// Per-cycle inputs that are not part of the samples themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeriveContext {
    /// Configured polling interval of the task
    pub interval_secs: u64,
    /// ifSpeed (bits/s) fetched in the same cycle, when the group has one
    pub if_speed: Option<u64>,
}

impl DeriveContext {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs,
            if_speed: None,
        }
    }
}

/// Turn the newest sample (plus its predecessor, if any) into the value
/// reported downstream.
///
/// Counter kinds never go negative: a missing predecessor or a counter that
/// went backwards (wrap, device reset) yields 0. The missing predecessor is
/// never treated as a zero-valued sample.
pub fn derive(
    kind: &MetricKind,
    prior: Option<&Sample>,
    latest: &Sample,
    ctx: &DeriveContext,
) -> Result<DerivedValue, DeriveError> {
    match kind {
        MetricKind::IfStatus | MetricKind::IfAdminStatus => {
            let code = numeric(kind, latest)?;
            InterfaceStatus::from_code(code)
                .map(DerivedValue::Status)
                .ok_or(DeriveError::UnmappedStatus(code))
        }
        MetricKind::InOctets => {
            let bits_per_sec = match counter_delta(kind, prior, latest)? {
                Some((delta, prior)) => {
                    (delta as f64) * 8.0 / window_secs(prior, latest, ctx.interval_secs)
                }
                None => 0.0,
            };
            let utilization_pct = ctx
                .if_speed
                .filter(|speed| *speed > 0)
                .map(|speed| bits_per_sec / speed as f64 * 100.0);

            Ok(DerivedValue::Bandwidth {
                bits_per_sec,
                utilization_pct,
            })
        }
        MetricKind::IpInReceives => {
            let delta = counter_delta(kind, prior, latest)?.map_or(0, |(delta, _)| delta);
            Ok(DerivedValue::Integer(delta))
        }
        MetricKind::Uptime | MetricKind::IfSpeed | MetricKind::SystemInfo | MetricKind::Oid(_) => {
            Ok(latest.raw.clone().into())
        }
    }
}

fn numeric(kind: &MetricKind, sample: &Sample) -> Result<i64, DeriveError> {
    sample
        .raw
        .as_i64()
        .ok_or_else(|| DeriveError::NotNumeric(kind.clone()))
}

/// Non-negative `latest - prior`, or `None` without a usable predecessor
fn counter_delta<'a>(
    kind: &MetricKind,
    prior: Option<&'a Sample>,
    latest: &Sample,
) -> Result<Option<(i64, &'a Sample)>, DeriveError> {
    let Some(prior) = prior else {
        return Ok(None);
    };
    let latest_value = numeric(kind, latest)?;
    let prior_value = numeric(kind, prior)?;

    match latest_value.checked_sub(prior_value) {
        Some(delta) if delta >= 0 => Ok(Some((delta, prior))),
        _ => Ok(Some((0, prior))),
    }
}

/// Seconds the delta covers: the configured interval times the number of
/// whole intervals between the two samples, so a cycle lost to a timeout
/// widens the window instead of inflating the rate. Measured on the
/// monotonic clock; wall-clock steps do not affect it.
fn window_secs(prior: &Sample, latest: &Sample, interval_secs: u64) -> f64 {
    let interval = interval_secs.max(1) as f64;
    let elapsed = latest
        .observed_at
        .saturating_duration_since(prior.observed_at)
        .as_secs_f64();
    let cycles = (elapsed / interval).round().max(1.0);
    cycles * interval
}
