//! `tokio-postgres` backed control plane.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};

use crate::catalog::{CatalogResult, ControlPlane};
use crate::config::{Config, CITUS_EXTENSION};
use crate::error::CatalogError;
use crate::topology::NodeAddr;

/// The application name reported to the server on every connection.
const APP_NAME: &str = "citus-registrar";

const SQL_LIST_NODES: &str = "SELECT DISTINCT nodename, nodeport FROM pg_dist_node ORDER BY nodename, nodeport";
const SQL_NODE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM pg_dist_node WHERE nodename = $1 AND nodeport = $2)";
const SQL_FORGET_NODE: &str = "DELETE FROM pg_dist_node WHERE nodename = $1";
const SQL_ADD_NODE: &str = "SELECT citus_add_node($1, $2)";

/// A control plane which opens a short-lived connection per command.
///
/// Commands are issued sequentially and infrequently, so connections are not pooled.
pub struct PgControlPlane {
    config: Arc<Config>,
    coordinator: NodeAddr,
}

impl PgControlPlane {
    /// Create a new instance targeting the coordinator named in config.
    pub fn new(config: Arc<Config>) -> Self {
        let coordinator = NodeAddr::new(config.coordinator_host.clone(), config.coordinator_port);
        Self { config, coordinator }
    }

    /// Open a connection to the given node, spawning its connection driver.
    async fn connect(&self, node: &NodeAddr) -> CatalogResult<Client> {
        let connect_err = |message: String| CatalogError::Connect {
            addr: node.to_string(),
            message,
        };

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .application_name(APP_NAME)
            .host(&node.host)
            .port(node.port)
            .user(&self.config.user)
            .dbname(&self.config.database);
        if let Some(timeout) = self.config.connect_timeout() {
            pg_config.connect_timeout(timeout);
        }
        if let Some(password) = self.config.password.as_deref() {
            pg_config.password(password);
        }

        let connecting = pg_config.connect(NoTls);
        let connected = match self.config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| connect_err(format!("timed out after {:?}", timeout)))?,
            None => connecting.await,
        };
        let (client, connection) = connected.map_err(|err| connect_err(err.to_string()))?;

        let node_label = node.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(error = %err, node = %node_label, "connection closed with error");
            }
        });
        Ok(client)
    }
}

#[async_trait]
impl ControlPlane for PgControlPlane {
    async fn ping(&self, node: &NodeAddr) -> CatalogResult<()> {
        let client = self.connect(node).await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|err| CatalogError::command(node, "ping", err))?;
        Ok(())
    }

    fn coordinator(&self) -> &NodeAddr {
        &self.coordinator
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn ensure_extension(&self) -> CatalogResult<()> {
        let client = self.connect(&self.coordinator).await?;
        // Identifiers cannot be bound as parameters; the extension name is a constant.
        let stmt = format!("CREATE EXTENSION IF NOT EXISTS {}", CITUS_EXTENSION);
        client
            .batch_execute(&stmt)
            .await
            .map_err(|err| CatalogError::command(&self.coordinator, "create extension", err))
    }

    async fn list_nodes(&self) -> CatalogResult<Vec<NodeAddr>> {
        let client = self.connect(&self.coordinator).await?;
        let rows = client
            .query(SQL_LIST_NODES, &[])
            .await
            .map_err(|err| CatalogError::command(&self.coordinator, "list nodes", err))?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let host: String = row.get(0);
            let port: i32 = row.get(1);
            match u16::try_from(port) {
                Ok(port) => nodes.push(NodeAddr::new(host, port)),
                Err(_) => tracing::warn!(%host, port, "ignoring catalog entry with out of range port"),
            }
        }
        Ok(nodes)
    }

    async fn node_exists(&self, node: &NodeAddr) -> CatalogResult<bool> {
        let client = self.connect(&self.coordinator).await?;
        let port = i32::from(node.port);
        let row = client
            .query_one(SQL_NODE_EXISTS, &[&node.host, &port])
            .await
            .map_err(|err| CatalogError::command(&self.coordinator, "node exists", err))?;
        Ok(row.get(0))
    }

    async fn forget_node(&self, on: &NodeAddr, host: &str) -> CatalogResult<()> {
        let client = self.connect(on).await?;
        client
            .execute(SQL_FORGET_NODE, &[&host])
            .await
            .map_err(|err| CatalogError::command(on, "remove node", err))?;
        Ok(())
    }

    async fn add_node(&self, node: &NodeAddr) -> CatalogResult<()> {
        let client = self.connect(&self.coordinator).await?;
        let port = i32::from(node.port);
        client
            .query_one(SQL_ADD_NODE, &[&node.host, &port])
            .await
            .map_err(|err| CatalogError::command(&self.coordinator, "add node", err))?;
        Ok(())
    }
}
