//! Test fixtures.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_postgres::error::SqlState;

use crate::catalog::{CatalogResult, ControlPlane};
use crate::config::Config;
use crate::error::CatalogError;
use crate::topology::{ClusterTopology, NodeAddr, WorkerEndpoint};

/// A control plane command as recorded by `FakeControlPlane`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Ping(NodeAddr),
    EnsureExtension,
    ListNodes,
    NodeExists(NodeAddr),
    Forget { on: NodeAddr, host: String },
    Add(NodeAddr),
}

#[derive(Default)]
struct FakeState {
    /// Hosts which answer pings and accept connections.
    reachable: HashSet<String>,
    /// The coordinator's `pg_dist_node`.
    catalog: BTreeSet<NodeAddr>,
    /// The `pg_dist_node` hostnames held by other metadata nodes, keyed by node host.
    remote_catalogs: HashMap<String, HashSet<String>>,
    /// Hosts for which `add_node` always fails with a unique violation.
    always_reject: HashSet<String>,
    /// Whether extension activation fails.
    extension_fails: bool,
    /// Whether listing the coordinator's catalog fails.
    list_fails: bool,
    /// Whether the per-worker existence check fails.
    exists_fails: bool,
    /// Every command issued, in order.
    calls: Vec<Call>,
}

/// An in-memory control plane modelling a coordinator's catalog and its metadata peers.
pub struct FakeControlPlane {
    coordinator: NodeAddr,
    state: Mutex<FakeState>,
}

impl FakeControlPlane {
    /// A fake with a reachable coordinator and an empty catalog.
    pub fn new() -> Arc<Self> {
        let coordinator = NodeAddr::new("localhost", 5432);
        let mut state = FakeState::default();
        state.reachable.insert(coordinator.host.clone());
        Arc::new(Self {
            coordinator,
            state: Mutex::new(state),
        })
    }

    /// A fake where every endpoint of the given fleet is reachable.
    pub fn with_fleet(endpoints: &[WorkerEndpoint]) -> Arc<Self> {
        let this = Self::new();
        for ep in endpoints {
            this.set_reachable(&ep.host, true);
        }
        this
    }

    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut state = self.state.lock().unwrap();
        if reachable {
            state.reachable.insert(host.to_string());
        } else {
            state.reachable.remove(host);
        }
    }

    /// Seed the coordinator's catalog with an entry.
    pub fn register(&self, node: NodeAddr) {
        self.state.lock().unwrap().catalog.insert(node);
    }

    /// Seed a stale entry for `host` in the catalog of the metadata node `on`.
    ///
    /// The node `on` is also made reachable and listed in the coordinator's catalog.
    pub fn seed_stale(&self, on: &NodeAddr, host: &str) {
        let mut state = self.state.lock().unwrap();
        state.reachable.insert(on.host.clone());
        state.catalog.insert(on.clone());
        state.remote_catalogs.entry(on.host.clone()).or_default().insert(host.to_string());
    }

    pub fn always_reject(&self, host: &str) {
        self.state.lock().unwrap().always_reject.insert(host.to_string());
    }

    pub fn fail_extension(&self) {
        self.state.lock().unwrap().extension_fails = true;
    }

    pub fn fail_list_nodes(&self) {
        self.state.lock().unwrap().list_fails = true;
    }

    pub fn fail_node_exists(&self) {
        self.state.lock().unwrap().exists_fails = true;
    }

    pub fn catalog(&self) -> BTreeSet<NodeAddr> {
        self.state.lock().unwrap().catalog.clone()
    }

    pub fn remote_catalog(&self, host: &str) -> HashSet<String> {
        self.state.lock().unwrap().remote_catalogs.get(host).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// All `add_node` commands issued so far.
    pub fn adds(&self) -> Vec<NodeAddr> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Add(node) => Some(node),
                _ => None,
            })
            .collect()
    }

    /// All `forget_node` commands issued so far, as `(on, host)` pairs.
    pub fn forgets(&self) -> Vec<(NodeAddr, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Forget { on, host } => Some((on, host)),
                _ => None,
            })
            .collect()
    }

    fn unreachable(node: &NodeAddr) -> CatalogError {
        CatalogError::Connect {
            addr: node.to_string(),
            message: "connection refused".into(),
        }
    }

    fn query_failed(&self, op: &'static str) -> CatalogError {
        CatalogError::Command {
            addr: self.coordinator.to_string(),
            op,
            code: Some(SqlState::QUERY_CANCELED),
            message: "canceling statement due to statement timeout".into(),
        }
    }

    fn unique_violation(&self) -> CatalogError {
        CatalogError::Command {
            addr: self.coordinator.to_string(),
            op: "add node",
            code: Some(SqlState::UNIQUE_VIOLATION),
            message: r#"duplicate key value violates unique constraint "pg_dist_node_nodename_nodeport_key""#.into(),
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn ping(&self, node: &NodeAddr) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Ping(node.clone()));
        if state.reachable.contains(&node.host) {
            Ok(())
        } else {
            Err(Self::unreachable(node))
        }
    }

    fn coordinator(&self) -> &NodeAddr {
        &self.coordinator
    }

    async fn ensure_extension(&self) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::EnsureExtension);
        if state.extension_fails {
            return Err(CatalogError::Command {
                addr: self.coordinator.to_string(),
                op: "create extension",
                code: Some(SqlState::UNDEFINED_FILE),
                message: r#"could not open extension control file "citus.control""#.into(),
            });
        }
        Ok(())
    }

    async fn list_nodes(&self) -> CatalogResult<Vec<NodeAddr>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListNodes);
        if state.list_fails {
            return Err(self.query_failed("list nodes"));
        }
        Ok(state.catalog.iter().cloned().collect())
    }

    async fn node_exists(&self, node: &NodeAddr) -> CatalogResult<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::NodeExists(node.clone()));
        if state.exists_fails {
            return Err(self.query_failed("node exists"));
        }
        Ok(state.catalog.contains(node))
    }

    async fn forget_node(&self, on: &NodeAddr, host: &str) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Forget {
            on: on.clone(),
            host: host.to_string(),
        });
        if !state.reachable.contains(&on.host) {
            return Err(Self::unreachable(on));
        }
        if let Some(remote) = state.remote_catalogs.get_mut(&on.host) {
            remote.remove(host);
        }
        Ok(())
    }

    async fn add_node(&self, node: &NodeAddr) -> CatalogResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Add(node.clone()));
        let stale_elsewhere = state.remote_catalogs.values().any(|hosts| hosts.contains(&node.host));
        if state.always_reject.contains(&node.host) || stale_elsewhere || state.catalog.contains(node) {
            return Err(self.unique_violation());
        }
        state.catalog.insert(node.clone());
        Ok(())
    }
}

/// A test config with the given replica count, plus the matching topology.
pub fn setup_topology(replicas: u32) -> (Arc<Config>, ClusterTopology) {
    let mut config = Config::new_test();
    config.worker_replicas = replicas;
    let topology = ClusterTopology::new(&config, "pg-worker".into(), replicas);
    (Arc::new(config), topology)
}
