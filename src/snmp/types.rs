use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnmpError {
    #[error("SNMP request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid OID: {0}")]
    InvalidOid(String),
    #[error("Timeout")]
    Timeout,
    #[error("Authentication failure")]
    AuthFailure,
    #[error("Network unreachable")]
    NetworkUnreachable,
    #[error("Unexpected value type for {oid}: {found}")]
    UnexpectedType { oid: String, found: String },
}

impl SnmpError {
    /// Only a missed reply is worth waiting out; everything else will keep failing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

pub type SnmpResult<T> = Result<T, SnmpError>;

/// SNMP protocol version a target speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2c => "2c",
        }
    }
}

impl std::str::FromStr for SnmpVersion {
    type Err = String;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        match version.trim().to_lowercase().as_str() {
            "1" | "v1" | "snmpv1" => Ok(Self::V1),
            "2c" | "v2c" | "snmpv2c" | "2" | "v2" => Ok(Self::V2c),
            "3" | "v3" | "snmpv3" => {
                Err("SNMPv3 needs user credentials; only community-based v1/v2c is supported".into())
            }
            _ => Err(format!(
                "Unsupported SNMP version: '{}'. Supported versions: 1, v1, 2c, v2c",
                version
            )),
        }
    }
}

impl std::fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SNMP value returned from a GET operation
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    String(String),
    Oid(String),
    Counter32(u32),
    Counter64(u64),
    Gauge32(u32),
    TimeTicks(u32),
    IpAddress(String),
}

impl SnmpValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Counter32(v) => Some(*v as i64),
            SnmpValue::Counter64(v) => i64::try_from(*v).ok(),
            SnmpValue::Gauge32(v) => Some(*v as i64),
            SnmpValue::TimeTicks(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SnmpValue::Integer(_) => "Integer",
            SnmpValue::String(_) => "OctetString",
            SnmpValue::Oid(_) => "ObjectIdentifier",
            SnmpValue::Counter32(_) => "Counter32",
            SnmpValue::Counter64(_) => "Counter64",
            SnmpValue::Gauge32(_) => "Gauge32",
            SnmpValue::TimeTicks(_) => "TimeTicks",
            SnmpValue::IpAddress(_) => "IpAddress",
        }
    }
}

impl std::fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnmpValue::String(s) | SnmpValue::Oid(s) | SnmpValue::IpAddress(s) => f.write_str(s),
            other => match other.as_i64() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "{:?}", other),
            },
        }
    }
}
