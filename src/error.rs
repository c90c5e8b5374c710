//! Registrar error abstractions.

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Reasons for which the preflight guard declines to run registration.
///
/// None of these are failures from the platform's point of view; the detached run simply
/// logs the reason and exits successfully.
#[derive(Debug, Error)]
pub enum PreflightError {
    /// The runtime environment could not be parsed into a config.
    #[error("invalid registrar configuration: {0}")]
    InvalidConfig(String),
    /// No worker statefulset name is configured.
    #[error("PG_WORKER_STATEFULSET_NAME is not set, nothing to register")]
    MissingWorkerSet,
    /// No database password is available.
    #[error("PGPASSWORD is not set, cannot authenticate against the cluster")]
    MissingCredentials,
    /// The expected worker count is zero.
    #[error("PG_WORKER_REPLICAS is 0, no workers expected")]
    NoReplicas,
}

/// Errors returned from the database control plane.
#[derive(Clone, Debug, Error)]
pub enum CatalogError {
    /// The node could not be reached at the database protocol level.
    #[error("could not connect to {addr}: {message}")]
    Connect { addr: String, message: String },
    /// The node was reachable, but a command against it failed.
    #[error("{op} failed on {addr}: {message}")]
    Command {
        addr: String,
        op: &'static str,
        code: Option<SqlState>,
        message: String,
    },
}

impl CatalogError {
    /// Build a command error from a driver error, retaining its SQLSTATE if any.
    pub fn command(addr: impl ToString, op: &'static str, err: tokio_postgres::Error) -> Self {
        let message = match err.as_db_error() {
            Some(db_err) => db_err.message().to_string(),
            None => err.to_string(),
        };
        Self::Command {
            addr: addr.to_string(),
            op,
            code: err.code().cloned(),
            message,
        }
    }

    /// The SQLSTATE returned by the server, if this is a command error which carried one.
    pub fn code(&self) -> Option<&SqlState> {
        match self {
            Self::Connect { .. } => None,
            Self::Command { code, .. } => code.as_ref(),
        }
    }

    /// True if the server rejected the command due to a uniqueness constraint.
    ///
    /// `citus_add_node` surfaces stale `pg_dist_node` rows on metadata nodes this way.
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(&SqlState::UNIQUE_VIOLATION)
    }
}

/// A bounded reachability wait gave up on a node.
#[derive(Clone, Debug, Error)]
#[error("unreachable after {}s: {last_error}", waited.as_secs())]
pub struct WaitTimeout {
    /// How long the node was polled before giving up.
    pub waited: std::time::Duration,
    /// The error returned by the final probe.
    pub last_error: CatalogError,
}
