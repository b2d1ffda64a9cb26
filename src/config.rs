use crate::metrics::{MetricGroup, ParseMetricError};
use crate::poller::PollingTask;
use crate::secret::SecretString;
use crate::snmp::SnmpVersion;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

const DEFAULT_SNMP_PORT: u16 = 161;

/// Longest accepted polling interval (one day)
pub const MAX_INTERVAL_SECS: u64 = 86_400;
/// Longest accepted query timeout or shutdown grace period (one hour)
pub const MAX_WAIT_SECS: u64 = 3_600;

/// Startup configuration failures; the process does not start on any of these
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no targets configured")]
    NoTargets,
    #[error("target #{0} has an empty host")]
    EmptyHost(usize),
    #[error("target {0}: interval_secs must be greater than zero")]
    ZeroInterval(String),
    #[error("target {host}: {reason}")]
    Version { host: String, reason: String },
    #[error("target {0}: no metrics to poll")]
    NoMetrics(String),
    #[error("target {host}: {source}")]
    Metric {
        host: String,
        #[source]
        source: ParseMetricError,
    },
    #[error("target {host}: metric '{metric}' listed twice")]
    DuplicateMetric { host: String, metric: String },
    #[error("target {0} is listed more than once")]
    DuplicateTarget(String),
    #[error("{0} must be greater than zero")]
    ZeroSetting(&'static str),
    #[error("{setting} is {value}, the maximum is {max}")]
    OutOfRange {
        setting: String,
        value: u64,
        max: u64,
    },
}

/// A monitored host. Immutable once loaded and shared by all its tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub community: SecretString,
    pub version: SnmpVersion,
    pub interval_secs: u64,
}

impl Target {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Target as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_community")]
    pub community: SecretString,
    #[serde(default = "default_version")]
    pub version: String,
    pub interval_secs: u64,
    pub metrics: Vec<String>,
}

/// A validated target plus the metric groups polled on it
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub target: Arc<Target>,
    pub groups: Vec<MetricGroup>,
}

/// Top-level poller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_log_path")]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub pooled_sessions: bool,
    pub targets: Vec<TargetConfig>,
}

fn default_port() -> u16 {
    DEFAULT_SNMP_PORT
}

fn default_community() -> SecretString {
    SecretString::new("public")
}

fn default_version() -> String {
    "2c".to_string()
}

fn default_query_timeout_secs() -> u64 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_sink_capacity() -> usize {
    1024
}

fn default_failure_threshold() -> u32 {
    1
}

fn default_log_path() -> Option<PathBuf> {
    Some(PathBuf::from("logs.csv"))
}

fn default_true() -> bool {
    true
}

impl PollerConfig {
    /// Load and validate a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        tracing::info!(
            "Loaded {} targets from {}",
            config.targets.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.resolve()?;
        Ok(config)
    }

    /// Configuration for a single target with default settings
    pub fn single(target: TargetConfig) -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            sink_capacity: default_sink_capacity(),
            failure_threshold: default_failure_threshold(),
            log_path: default_log_path(),
            console: true,
            pooled_sessions: false,
            targets: vec![target],
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Validate every target and materialize its metric groups
    pub fn resolve(&self) -> Result<Vec<PollTarget>, ConfigError> {
        if self.query_timeout_secs == 0 {
            return Err(ConfigError::ZeroSetting("query_timeout_secs"));
        }
        check_max("query_timeout_secs", self.query_timeout_secs, MAX_WAIT_SECS)?;
        check_max("shutdown_grace_secs", self.shutdown_grace_secs, MAX_WAIT_SECS)?;
        if self.sink_capacity == 0 {
            return Err(ConfigError::ZeroSetting("sink_capacity"));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroSetting("failure_threshold"));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut hosts = HashSet::new();
        let mut resolved = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter().enumerate() {
            let poll_target = target.resolve(index)?;
            if !hosts.insert(poll_target.target.host.clone()) {
                return Err(ConfigError::DuplicateTarget(poll_target.target.host.clone()));
            }
            resolved.push(poll_target);
        }
        Ok(resolved)
    }

    /// One polling task per target and metric group, all first due at `first_due`
    pub fn tasks(&self, first_due: Instant) -> Result<Vec<PollingTask>, ConfigError> {
        let tasks = self
            .resolve()?
            .into_iter()
            .flat_map(|PollTarget { target, groups }| {
                groups
                    .into_iter()
                    .map(move |group| PollingTask::new(Arc::clone(&target), group, first_due))
            })
            .collect();
        Ok(tasks)
    }
}

fn check_max(setting: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::OutOfRange {
            setting: setting.to_string(),
            value,
            max,
        });
    }
    Ok(())
}

impl TargetConfig {
    fn resolve(&self, index: usize) -> Result<PollTarget, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost(index));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval(host.to_string()));
        }
        check_max(
            &format!("target {}: interval_secs", host),
            self.interval_secs,
            MAX_INTERVAL_SECS,
        )?;

        let version = self
            .version
            .parse::<SnmpVersion>()
            .map_err(|reason| ConfigError::Version {
                host: host.to_string(),
                reason,
            })?;

        if self.metrics.is_empty() {
            return Err(ConfigError::NoMetrics(host.to_string()));
        }

        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(self.metrics.len());
        for ident in &self.metrics {
            let group = ident
                .parse::<MetricGroup>()
                .map_err(|source| ConfigError::Metric {
                    host: host.to_string(),
                    source,
                })?;
            if !seen.insert(group.clone()) {
                return Err(ConfigError::DuplicateMetric {
                    host: host.to_string(),
                    metric: group.to_string(),
                });
            }
            groups.push(group);
        }

        Ok(PollTarget {
            target: Arc::new(Target {
                host: host.to_string(),
                port: self.port,
                community: self.community.clone(),
                version,
                interval_secs: self.interval_secs,
            }),
            groups,
        })
    }
}
