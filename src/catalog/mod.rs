//! Citus control plane abstraction.
//!
//! Every interaction the registrar has with the database goes through the `ControlPlane`
//! trait. The production implementation speaks the Postgres wire protocol via
//! `tokio-postgres`; tests use an in-memory fake.

mod postgres;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::topology::NodeAddr;

pub use self::postgres::PgControlPlane;

/// Result type of all control plane commands.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// The database control plane as seen from a coordinator.
///
/// Commands without an explicit target run against the local coordinator's catalog. Each
/// command is treated as atomic and immediately visible.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Check that the given node accepts connections and answers queries.
    async fn ping(&self, node: &NodeAddr) -> CatalogResult<()>;

    /// The address of the local coordinator.
    fn coordinator(&self) -> &NodeAddr;

    /// Activate the Citus extension on the coordinator if it is not already active.
    async fn ensure_extension(&self) -> CatalogResult<()>;

    /// The distinct set of nodes registered in the coordinator's catalog.
    async fn list_nodes(&self) -> CatalogResult<Vec<NodeAddr>>;

    /// Check whether the coordinator's catalog has an entry for exactly this host and port.
    async fn node_exists(&self, node: &NodeAddr) -> CatalogResult<bool>;

    /// Remove every entry for `host` from the catalog held by `on`.
    async fn forget_node(&self, on: &NodeAddr, host: &str) -> CatalogResult<()>;

    /// Register the given node in the coordinator's catalog.
    async fn add_node(&self, node: &NodeAddr) -> CatalogResult<()>;
}
