mod derive;
mod history;

pub use derive::{derive, DeriveContext, DeriveError};
pub use history::{SampleHistory, HISTORY_CAPACITY};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use thiserror::Error;

/// Wall-clock timestamp attached to samples and reports
pub type Timestamp = DateTime<Utc>;

const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";
const SYS_UPTIME_OID: &str = "1.3.6.1.2.1.1.3.0";
const IP_IN_RECEIVES_OID: &str = "1.3.6.1.2.1.4.3.0";
const IF_SPEED_BASE: &str = "1.3.6.1.2.1.2.2.1.5";
const IF_ADMIN_STATUS_BASE: &str = "1.3.6.1.2.1.2.2.1.7";
const IF_OPER_STATUS_BASE: &str = "1.3.6.1.2.1.2.2.1.8";
const IF_IN_OCTETS_BASE: &str = "1.3.6.1.2.1.2.2.1.10";

/// Category of queried value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Uptime,
    InOctets,
    IfSpeed,
    IpInReceives,
    /// Operational status (ifOperStatus)
    IfStatus,
    IfAdminStatus,
    /// sysDescr
    SystemInfo,
    /// Arbitrary OID polled as an opaque value
    Oid(String),
}

impl MetricKind {
    /// Kinds whose raw value must be numeric
    pub fn expects_integer(&self) -> bool {
        !matches!(self, Self::SystemInfo | Self::Oid(_))
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uptime => f.write_str("uptime"),
            Self::InOctets => f.write_str("in_octets"),
            Self::IfSpeed => f.write_str("if_speed"),
            Self::IpInReceives => f.write_str("ip_in_receives"),
            Self::IfStatus => f.write_str("if_oper_status"),
            Self::IfAdminStatus => f.write_str("if_admin_status"),
            Self::SystemInfo => f.write_str("sys_descr"),
            Self::Oid(oid) => write!(f, "oid:{}", oid),
        }
    }
}

/// What to query: a kind plus, for interface-scoped kinds, the ifIndex
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricSpec {
    pub kind: MetricKind,
    pub if_index: Option<u32>,
}

impl MetricSpec {
    pub fn scalar(kind: MetricKind) -> Self {
        Self {
            kind,
            if_index: None,
        }
    }

    pub fn interface(kind: MetricKind, if_index: u32) -> Self {
        Self {
            kind,
            if_index: Some(if_index),
        }
    }

    /// Full OID queried for this spec
    pub fn oid(&self) -> String {
        let index = self.if_index.unwrap_or(0);
        match &self.kind {
            MetricKind::Uptime => SYS_UPTIME_OID.to_string(),
            MetricKind::SystemInfo => SYS_DESCR_OID.to_string(),
            MetricKind::IpInReceives => IP_IN_RECEIVES_OID.to_string(),
            MetricKind::InOctets => format!("{}.{}", IF_IN_OCTETS_BASE, index),
            MetricKind::IfSpeed => format!("{}.{}", IF_SPEED_BASE, index),
            MetricKind::IfStatus => format!("{}.{}", IF_OPER_STATUS_BASE, index),
            MetricKind::IfAdminStatus => format!("{}.{}", IF_ADMIN_STATUS_BASE, index),
            MetricKind::Oid(oid) => oid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseMetricError {
    #[error("unknown metric '{0}'")]
    Unknown(String),
    #[error("metric '{0}' needs an interface index (e.g. '{0}:1')")]
    MissingIndex(String),
    #[error("invalid interface index in '{0}'")]
    InvalidIndex(String),
}

/// Set of metrics one polling task fetches per cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricGroup {
    Uptime,
    Bandwidth(u32),
    Delay,
    Status(u32),
    SystemInfo,
    Oid(String),
}

impl MetricGroup {
    /// Specs in fetch order. Bandwidth fetches the speed first so the octet
    /// rate can be normalized against it in the same cycle.
    pub fn specs(&self) -> Vec<MetricSpec> {
        match self {
            Self::Uptime => vec![MetricSpec::scalar(MetricKind::Uptime)],
            Self::Bandwidth(i) => vec![
                MetricSpec::interface(MetricKind::IfSpeed, *i),
                MetricSpec::interface(MetricKind::InOctets, *i),
            ],
            Self::Delay => vec![MetricSpec::scalar(MetricKind::IpInReceives)],
            Self::Status(i) => vec![
                MetricSpec::interface(MetricKind::IfAdminStatus, *i),
                MetricSpec::interface(MetricKind::IfStatus, *i),
            ],
            Self::SystemInfo => vec![MetricSpec::scalar(MetricKind::SystemInfo)],
            Self::Oid(oid) => vec![MetricSpec::scalar(MetricKind::Oid(oid.clone()))],
        }
    }
}

impl std::fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uptime => f.write_str("uptime"),
            Self::Bandwidth(i) => write!(f, "bandwidth:{}", i),
            Self::Delay => f.write_str("delay"),
            Self::Status(i) => write!(f, "status:{}", i),
            Self::SystemInfo => f.write_str("sysinfo"),
            Self::Oid(oid) => f.write_str(oid),
        }
    }
}

impl std::str::FromStr for MetricGroup {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ident = s.trim();
        let (name, index) = match ident.split_once(':') {
            Some((name, index)) => (name, Some(index)),
            None => (ident, None),
        };

        let parse_index = || -> Result<u32, ParseMetricError> {
            let raw = index.ok_or_else(|| ParseMetricError::MissingIndex(name.to_string()))?;
            raw.trim()
                .parse::<u32>()
                .map_err(|_| ParseMetricError::InvalidIndex(ident.to_string()))
        };

        match name.to_lowercase().as_str() {
            "uptime" => Ok(Self::Uptime),
            "bandwidth" => Ok(Self::Bandwidth(parse_index()?)),
            "delay" => Ok(Self::Delay),
            "status" => Ok(Self::Status(parse_index()?)),
            "sysinfo" => Ok(Self::SystemInfo),
            _ if is_numeric_oid(ident) => Ok(Self::Oid(ident.trim_start_matches('.').to_string())),
            _ => Err(ParseMetricError::Unknown(ident.to_string())),
        }
    }
}

fn is_numeric_oid(s: &str) -> bool {
    let s = s.trim_start_matches('.');
    s.contains('.')
        && s.split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Raw value as returned by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Integer(i64),
    Text(String),
}

impl RawValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One successful query result
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: Timestamp,
    /// Monotonic capture time; rate windows are measured on this clock
    pub observed_at: Instant,
    pub target: String,
    pub kind: MetricKind,
    pub raw: RawValue,
}

/// ifAdminStatus / ifOperStatus values we know how to name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceStatus {
    Up,
    Down,
    Testing,
}

impl InterfaceStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Up),
            2 => Some(Self::Down),
            3 => Some(Self::Testing),
            _ => None,
        }
    }
}

impl std::fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => f.write_str("Up"),
            Self::Down => f.write_str("Down"),
            Self::Testing => f.write_str("Testing"),
        }
    }
}

/// Value reported downstream
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedValue {
    Integer(i64),
    Text(String),
    Status(InterfaceStatus),
    Bandwidth {
        bits_per_sec: f64,
        utilization_pct: Option<f64>,
    },
    /// Status code outside the known set
    UnknownStatus(i64),
    /// Placeholder for a cycle whose query timed out
    Timeout,
    /// Query failed for a non-transient reason
    Error(String),
}

impl DerivedValue {
    /// True for entries that mark a gap rather than a measurement
    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Timeout | Self::Error(_))
    }
}

impl From<RawValue> for DerivedValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Integer(v) => Self::Integer(v),
            RawValue::Text(s) => Self::Text(s),
        }
    }
}

impl std::fmt::Display for DerivedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
            Self::Status(status) => write!(f, "{}", status),
            Self::Bandwidth {
                bits_per_sec,
                utilization_pct: Some(pct),
            } => write!(f, "{:.0} bps ({:.2}%)", bits_per_sec, pct),
            Self::Bandwidth { bits_per_sec, .. } => write!(f, "{:.0} bps", bits_per_sec),
            Self::UnknownStatus(code) => write!(f, "unknown({})", code),
            Self::Timeout => f.write_str("timeout"),
            Self::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// What sinks receive
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetric {
    pub timestamp: Timestamp,
    pub target: String,
    pub kind: MetricKind,
    pub oid: String,
    pub raw: Option<RawValue>,
    pub value: DerivedValue,
}
