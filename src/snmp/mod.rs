mod client;
mod session_pool;
mod types;

pub use client::{QueryClient, SnmpClient, SNMP_TIMEOUT_SECS};
pub use session_pool::PooledClient;
pub use types::{SnmpError, SnmpResult, SnmpValue, SnmpVersion};
