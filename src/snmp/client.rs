use super::types::{SnmpError, SnmpResult, SnmpValue, SnmpVersion};
use crate::config::Target;
use async_trait::async_trait;
use snmp2::{Oid, SyncSession};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on a single round trip inside the SNMP library itself.
/// The executor wraps every fetch in its own, usually shorter, timeout.
pub const SNMP_TIMEOUT_SECS: u64 = 10;

/// One get-by-OID round trip against one target.
///
/// Implementations must not retry: a failed call is reported as-is and the
/// scheduler decides what happens next.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn fetch(&self, target: &Target, oid: &str) -> SnmpResult<SnmpValue>;
}

/// Stateless SNMP client: every call opens and discards its own session
#[derive(Debug, Clone, Copy)]
pub struct SnmpClient {
    timeout: Duration,
}

impl SnmpClient {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(SNMP_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Perform an SNMP GET operation
    pub async fn get(
        &self,
        ip_address: &str,
        community: &str,
        version: SnmpVersion,
        port: u16,
        oid: &str,
    ) -> SnmpResult<SnmpValue> {
        let oid_parsed = parse_oid(oid)?;

        // Clone data for the blocking task
        let addr = format!("{}:{}", ip_address, port);
        let community = community.as_bytes().to_vec();
        let timeout = self.timeout;

        // Run SNMP operation in blocking thread pool
        tokio::task::spawn_blocking(move || {
            let mut session = open_session(&addr, &community, version, timeout)?;
            perform_get(&mut session, &oid_parsed)
        })
        .await
        .map_err(|e| SnmpError::RequestFailed(format!("Task join error: {}", e)))?
    }
}

impl Default for SnmpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryClient for SnmpClient {
    async fn fetch(&self, target: &Target, oid: &str) -> SnmpResult<SnmpValue> {
        self.get(
            &target.host,
            target.community.expose(),
            target.version,
            target.port,
            oid,
        )
        .await
    }
}

pub(crate) fn parse_oid(oid: &str) -> SnmpResult<Oid<'static>> {
    Oid::from_str(oid).map_err(|_| SnmpError::InvalidOid(oid.to_string()))
}

/// Create SNMPv1/v2c session
pub(crate) fn open_session(
    addr: &str,
    community: &[u8],
    version: SnmpVersion,
    timeout: Duration,
) -> SnmpResult<SyncSession> {
    let timeout = Some(timeout);
    let req_id = 1;

    match version {
        SnmpVersion::V1 => SyncSession::new_v1(addr, community, timeout, req_id),
        SnmpVersion::V2c => SyncSession::new_v2c(addr, community, timeout, req_id),
    }
    .map_err(|_| SnmpError::NetworkUnreachable)
}

/// Perform SNMP GET on an open session
pub(crate) fn perform_get(session: &mut SyncSession, oid: &Oid<'_>) -> SnmpResult<SnmpValue> {
    let mut response = session.get(oid).map_err(map_snmp_error)?;

    if response.error_status != 0 {
        return Err(SnmpError::RequestFailed(format!(
            "SNMP error status: {}",
            response.error_status
        )));
    }

    let (_, value) = response
        .varbinds
        .next()
        .ok_or_else(|| SnmpError::RequestFailed("No varbinds in response".into()))?;

    convert_value(value)
}

/// Convert snmp2 crate's Value to our SnmpValue
fn convert_value(value: snmp2::Value) -> SnmpResult<SnmpValue> {
    use snmp2::Value as V;

    match value {
        V::Integer(i) => Ok(SnmpValue::Integer(i)),
        V::OctetString(s) => Ok(SnmpValue::String(String::from_utf8_lossy(s).into_owned())),
        V::ObjectIdentifier(oid) => Ok(SnmpValue::Oid(oid.to_string())),
        V::Counter32(c) => Ok(SnmpValue::Counter32(c)),
        V::Counter64(c) => Ok(SnmpValue::Counter64(c)),
        V::Unsigned32(u) => Ok(SnmpValue::Gauge32(u)),
        V::Timeticks(t) => Ok(SnmpValue::TimeTicks(t)),
        V::IpAddress(ip) => Ok(SnmpValue::IpAddress(format!(
            "{}.{}.{}.{}",
            ip[0], ip[1], ip[2], ip[3]
        ))),
        _ => Err(SnmpError::RequestFailed(format!(
            "Unsupported SNMP value type: {:?}",
            value
        ))),
    }
}

/// Map snmp2 crate errors to our SnmpError
fn map_snmp_error(err: snmp2::Error) -> SnmpError {
    use snmp2::Error;

    match err {
        Error::Send => SnmpError::NetworkUnreachable,
        Error::Receive => SnmpError::Timeout,
        Error::CommunityMismatch => SnmpError::AuthFailure,
        _ => SnmpError::RequestFailed(format!("{:?}", err)),
    }
}
