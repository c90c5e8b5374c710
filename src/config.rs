//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

/// The default path to which the detached run's stdout is sent.
pub const DEFAULT_STDOUT_SINK: &str = "/proc/1/fd/1";
/// The default path to which the detached run's stderr is sent.
pub const DEFAULT_STDERR_SINK: &str = "/proc/1/fd/2";
/// The name of the extension which must be active before any node management.
pub const CITUS_EXTENSION: &str = "citus";

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The role used for all database connections.
    #[serde(rename = "postgres_user", default = "defaults::postgres")]
    pub user: String,
    /// The password of `user`.
    ///
    /// Optional at parse time; its absence is reported by the preflight guard.
    #[serde(rename = "pgpassword", default)]
    pub password: Option<String>,
    /// The database holding the Citus catalog.
    #[serde(rename = "postgres_db", default = "defaults::postgres")]
    pub database: String,
    /// The host of the local coordinator.
    #[serde(rename = "pghost", default = "defaults::pghost")]
    pub coordinator_host: String,
    /// The port of the local coordinator.
    #[serde(rename = "pgport", default = "defaults::pgport")]
    pub coordinator_port: u16,
    /// Seconds to wait for any single connection attempt, with 0 meaning no limit.
    #[serde(rename = "pg_connect_timeout_sec", default = "defaults::connect_timeout_sec")]
    pub connect_timeout_sec: u64,

    /// The Kubernetes namespace of the worker statefulset.
    #[serde(rename = "pod_namespace", default = "defaults::namespace")]
    pub namespace: String,
    /// The name of the worker statefulset.
    #[serde(rename = "pg_worker_statefulset_name", default)]
    pub worker_statefulset: Option<String>,
    /// The expected number of worker replicas.
    #[serde(rename = "pg_worker_replicas", default, deserialize_with = "Config::parse_count")]
    pub worker_replicas: u32,
    /// The headless service governing the worker statefulset.
    ///
    /// Defaults to `{worker_statefulset}-headless`.
    #[serde(rename = "pg_worker_headless_service", default)]
    pub worker_headless_service: Option<String>,
    /// The port on which workers accept connections.
    #[serde(rename = "pg_worker_port", default = "defaults::pgport")]
    pub worker_port: u16,
    /// The cluster's DNS domain.
    #[serde(default = "defaults::cluster_domain")]
    pub cluster_domain: String,

    /// Seconds between coordinator readiness probes.
    #[serde(default = "defaults::coordinator_wait_interval_sec")]
    pub coordinator_wait_interval_sec: u64,
    /// Seconds to wait for a single worker to become reachable before skipping it.
    #[serde(default = "defaults::worker_wait_timeout_sec")]
    pub worker_wait_timeout_sec: u64,
    /// Seconds between worker readiness probes.
    #[serde(default = "defaults::worker_wait_interval_sec")]
    pub worker_wait_interval_sec: u64,
    /// The total number of `citus_add_node` attempts per worker.
    #[serde(default = "defaults::worker_register_attempts")]
    pub worker_register_attempts: u32,
    /// Seconds between `citus_add_node` attempts.
    #[serde(default = "defaults::worker_register_delay_sec")]
    pub worker_register_delay_sec: u64,
}

impl Config {
    /// Create a new config instance from the runtime environment.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build a config from the given environment variables.
    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Result<Self> {
        envy::from_iter(vars).context("error building config from env")
    }

    /// The per-connection timeout, if any.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_sec {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// The interval between coordinator readiness probes.
    pub fn coordinator_wait_interval(&self) -> Duration {
        Duration::from_secs(self.coordinator_wait_interval_sec)
    }

    /// The bound on a single worker's reachability wait.
    pub fn worker_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_wait_timeout_sec)
    }

    /// The interval between worker readiness probes.
    pub fn worker_wait_interval(&self) -> Duration {
        Duration::from_secs(self.worker_wait_interval_sec)
    }

    /// The delay between registration attempts.
    pub fn worker_register_delay(&self) -> Duration {
        Duration::from_secs(self.worker_register_delay_sec)
    }

    /// Parse a replica count, treating an empty value as zero.
    fn parse_count<'de, D: Deserializer<'de>>(val: D) -> Result<u32, D::Error> {
        let raw: String = Deserialize::deserialize(val)?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse()
            .map_err(|err| DeError::custom(format!("error parsing PG_WORKER_REPLICAS {:?}: {}", raw, err)))
    }

    /// A fully populated config with short timings, for use in tests.
    #[cfg(test)]
    pub fn new_test() -> Self {
        Self {
            user: "postgres".into(),
            password: Some("secret".into()),
            database: "postgres".into(),
            coordinator_host: "localhost".into(),
            coordinator_port: 5432,
            connect_timeout_sec: 1,
            namespace: "data".into(),
            worker_statefulset: Some("pg-worker".into()),
            worker_replicas: 3,
            worker_headless_service: None,
            worker_port: 5432,
            cluster_domain: "cluster.local".into(),
            coordinator_wait_interval_sec: 2,
            worker_wait_timeout_sec: 600,
            worker_wait_interval_sec: 3,
            worker_register_attempts: 10,
            worker_register_delay_sec: 3,
        }
    }
}

/// Config for the postStart wrapper.
///
/// Parsed separately from `Config` so that the wrapper never depends on the validity of the
/// registration config.
#[derive(Clone, Debug, Deserialize)]
pub struct HookConfig {
    /// Where the detached run's stdout is written.
    #[serde(rename = "registrar_stdout_sink", default = "defaults::stdout_sink")]
    pub stdout_sink: String,
    /// Where the detached run's stderr is written.
    #[serde(rename = "registrar_stderr_sink", default = "defaults::stderr_sink")]
    pub stderr_sink: String,
}

impl HookConfig {
    /// Build the hook config from the environment, falling back to defaults on any error.
    pub fn new() -> Self {
        envy::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "error parsing hook config, using defaults");
            Self::default()
        })
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            stdout_sink: defaults::stdout_sink(),
            stderr_sink: defaults::stderr_sink(),
        }
    }
}

mod defaults {
    pub fn postgres() -> String {
        "postgres".into()
    }
    pub fn pghost() -> String {
        "localhost".into()
    }
    pub fn pgport() -> u16 {
        5432
    }
    pub fn connect_timeout_sec() -> u64 {
        5
    }
    pub fn namespace() -> String {
        "default".into()
    }
    pub fn cluster_domain() -> String {
        "cluster.local".into()
    }
    pub fn coordinator_wait_interval_sec() -> u64 {
        2
    }
    pub fn worker_wait_timeout_sec() -> u64 {
        600
    }
    pub fn worker_wait_interval_sec() -> u64 {
        3
    }
    pub fn worker_register_attempts() -> u32 {
        10
    }
    pub fn worker_register_delay_sec() -> u64 {
        3
    }
    pub fn stdout_sink() -> String {
        super::DEFAULT_STDOUT_SINK.into()
    }
    pub fn stderr_sink() -> String {
        super::DEFAULT_STDERR_SINK.into()
    }
}
