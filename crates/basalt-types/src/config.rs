use crate::error::{BasaltError, Result};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Watch a single namespace instead of the whole cluster.
    pub watch_namespace: Option<String>,
    /// Image repository for mongod and mongos; `spec.version` is the tag.
    pub mongo_image: String,
    /// Image for the backup job; needs `mongodump`, `gzip` and the `aws` CLI.
    pub backup_image: String,
    pub probe_timeout: Duration,
    pub election_poll_interval: Duration,
    pub election_timeout: Duration,
    pub router_timeout: Duration,
    pub reconcile_timeout: Duration,
    pub resync_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            mongo_image: "mongo".to_string(),
            backup_image: "sadegh81/mongo-aws:latest".to_string(),
            probe_timeout: Duration::from_secs(3),
            election_poll_interval: Duration::from_secs(2),
            election_timeout: Duration::from_secs(30),
            router_timeout: Duration::from_secs(10),
            reconcile_timeout: Duration::from_secs(300),
            resync_interval: Duration::from_secs(300),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| BasaltError::Config(format!("{key}={raw:?}: {e}"))),
                None => Ok(default),
            }
        };

        let config = Self {
            watch_namespace: lookup("BASALT_WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            mongo_image: lookup("BASALT_MONGO_IMAGE").unwrap_or(defaults.mongo_image),
            backup_image: lookup("BASALT_BACKUP_IMAGE").unwrap_or(defaults.backup_image),
            probe_timeout: seconds("BASALT_PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
            election_poll_interval: seconds(
                "BASALT_ELECTION_POLL_SECS",
                defaults.election_poll_interval,
            )?,
            election_timeout: seconds("BASALT_ELECTION_TIMEOUT_SECS", defaults.election_timeout)?,
            router_timeout: seconds("BASALT_ROUTER_TIMEOUT_SECS", defaults.router_timeout)?,
            reconcile_timeout: seconds(
                "BASALT_RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout,
            )?,
            resync_interval: seconds("BASALT_RESYNC_SECS", defaults.resync_interval)?,
        };

        if config.election_poll_interval.is_zero() {
            return Err(BasaltError::Config(
                "BASALT_ELECTION_POLL_SECS must be greater than zero".to_string(),
            ));
        }

        info!(
            watch_namespace = ?config.watch_namespace,
            mongo_image = %config.mongo_image,
            election_timeout = ?config.election_timeout,
            "Loaded operator configuration"
        );

        Ok(config)
    }
}
