//! Worker topology & endpoint naming.
//!
//! Worker endpoints are never discovered. Each replica of the worker statefulset has a stable
//! DNS name under the statefulset's headless service, so the full expected fleet is computed
//! directly from the replica count.

use std::fmt;

use crate::config::Config;

/// The expected shape of the worker fleet, derived once from config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterTopology {
    /// The number of worker replicas expected.
    pub worker_replicas: u32,
    /// The name of the worker statefulset.
    pub worker_statefulset: String,
    /// The namespace of the worker statefulset.
    pub namespace: String,
    /// The headless service governing the worker statefulset.
    pub headless_service: String,
    /// The cluster's DNS domain.
    pub cluster_domain: String,
    /// The port on which workers accept connections.
    pub worker_port: u16,
}

impl ClusterTopology {
    /// Build a topology for the given statefulset, taking all other values from config.
    pub fn new(config: &Config, worker_statefulset: String, worker_replicas: u32) -> Self {
        let headless_service = config
            .worker_headless_service
            .as_deref()
            .map(str::trim)
            .filter(|svc| !svc.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("{}-headless", worker_statefulset));
        Self {
            worker_replicas,
            worker_statefulset,
            namespace: config.namespace.clone(),
            headless_service,
            cluster_domain: config.cluster_domain.clone(),
            worker_port: config.worker_port,
        }
    }

    /// The DNS name of the worker replica with the given index.
    pub fn worker_host(&self, index: u32) -> String {
        format!(
            "{}-{}.{}.{}.svc.{}",
            self.worker_statefulset, index, self.headless_service, self.namespace, self.cluster_domain
        )
    }

    /// All expected worker endpoints, in index order.
    pub fn endpoints(&self) -> Vec<WorkerEndpoint> {
        (0..self.worker_replicas)
            .map(|index| WorkerEndpoint {
                index,
                host: self.worker_host(index),
                port: self.worker_port,
            })
            .collect()
    }
}

/// A single expected worker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerEndpoint {
    /// The statefulset ordinal of this worker.
    pub index: u32,
    /// The stable DNS name of this worker.
    pub host: String,
    /// The port on which this worker accepts connections.
    pub port: u16,
}

impl WorkerEndpoint {
    /// This worker's address as it would appear in the node catalog.
    pub fn addr(&self) -> NodeAddr {
        NodeAddr::new(self.host.clone(), self.port)
    }
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A node address as recorded in `pg_dist_node`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
