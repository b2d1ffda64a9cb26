pub mod config;
pub mod metrics;
pub mod poller;
pub mod secret;
pub mod sink;
pub mod snmp;
