//! Worker registration reconciler.
//!
//! Each expected worker is driven through a small state machine, one worker at a time in
//! index order:
//!
//! ```text
//! WaitingReachable -> CheckingExisting -> Sanitizing -> Registering
//!        |                  |                               |
//!     Skipped            Skipped                  Registered | Failed
//! ```
//!
//! Every terminal state is final for that worker only. The reconciler always moves on to the
//! next index, and the outcome of each worker is retained in the returned `RunSummary`.


use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::ControlPlane;
use crate::config::Config;
use crate::error::CatalogError;
use crate::readiness::wait_for_node_within;
use crate::topology::WorkerEndpoint;

/// Why a worker was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The worker did not become reachable within the configured bound.
    Unreachable { waited: Duration },
    /// The coordinator's catalog already holds this exact host and port.
    AlreadyRegistered,
}

/// The terminal state reached by a single worker.
#[derive(Clone, Debug)]
pub enum WorkerOutcome {
    Skipped(SkipReason),
    Registered { attempts: u32 },
    Failed { attempts: u32, reason: CatalogError },
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(SkipReason::Unreachable { waited }) => write!(f, "skipped, unreachable after {}s", waited.as_secs()),
            Self::Skipped(SkipReason::AlreadyRegistered) => write!(f, "skipped, already registered"),
            Self::Registered { attempts } => write!(f, "registered after {} attempt(s)", attempts),
            Self::Failed { attempts, reason } => write!(f, "failed after {} attempt(s): {}", attempts, reason),
        }
    }
}

/// The non-terminal states of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerState {
    WaitingReachable,
    CheckingExisting,
    Sanitizing,
    Registering,
}

/// The outcomes of one reconciliation pass, in index order.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<(WorkerEndpoint, WorkerOutcome)>,
}

impl RunSummary {
    /// The number of workers registered during this pass.
    pub fn registered(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches!(o, WorkerOutcome::Registered { .. })).count()
    }

    /// The number of workers skipped during this pass.
    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches!(o, WorkerOutcome::Skipped(_))).count()
    }

    /// The number of workers which could not be registered.
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches!(o, WorkerOutcome::Failed { .. })).count()
    }

    /// Log the summary, one line overall plus one line per worker.
    pub fn log(&self) {
        tracing::info!(
            workers = self.outcomes.len(),
            registered = self.registered(),
            skipped = self.skipped(),
            failed = self.failed(),
            "worker registration finished",
        );
        for (endpoint, outcome) in self.outcomes.iter() {
            match outcome {
                WorkerOutcome::Failed { .. } => tracing::error!(index = endpoint.index, host = %endpoint.host, "{}", outcome),
                WorkerOutcome::Skipped(SkipReason::Unreachable { .. }) => {
                    tracing::warn!(index = endpoint.index, host = %endpoint.host, "{}", outcome)
                }
                _ => tracing::info!(index = endpoint.index, host = %endpoint.host, "{}", outcome),
            }
        }
    }
}

/// Registers expected workers in the coordinator's catalog.
pub struct Reconciler {
    control: Arc<dyn ControlPlane>,
    config: Arc<Config>,
}

impl Reconciler {
    /// Create a new instance.
    pub fn new(control: Arc<dyn ControlPlane>, config: Arc<Config>) -> Self {
        Self { control, config }
    }

    /// Drive every given worker to a terminal state, sequentially and in order.
    pub async fn run(&self, endpoints: &[WorkerEndpoint]) -> RunSummary {
        let mut summary = RunSummary::default();
        for endpoint in endpoints {
            let outcome = self.reconcile_worker(endpoint).await;
            summary.outcomes.push((endpoint.clone(), outcome));
        }
        summary
    }

    #[tracing::instrument(level = "info", skip(self, endpoint), fields(index = endpoint.index, host = %endpoint.host))]
    async fn reconcile_worker(&self, endpoint: &WorkerEndpoint) -> WorkerOutcome {
        let mut state = WorkerState::WaitingReachable;
        loop {
            tracing::trace!(?state, "worker state");
            state = match state {
                WorkerState::WaitingReachable => {
                    let timeout = self.config.worker_wait_timeout();
                    match wait_for_node_within(&*self.control, &endpoint.addr(), self.config.worker_wait_interval(), timeout).await {
                        Ok(_) => WorkerState::CheckingExisting,
                        Err(err) => {
                            tracing::warn!(error = %err.last_error, waited_secs = err.waited.as_secs(), timeout_secs = timeout.as_secs(), "worker unreachable, skipping");
                            return WorkerOutcome::Skipped(SkipReason::Unreachable { waited: err.waited });
                        }
                    }
                }
                WorkerState::CheckingExisting => match self.control.node_exists(&endpoint.addr()).await {
                    Ok(true) => {
                        tracing::info!("worker already registered");
                        return WorkerOutcome::Skipped(SkipReason::AlreadyRegistered);
                    }
                    Ok(false) => WorkerState::Sanitizing,
                    Err(err) => {
                        tracing::warn!(error = %err, "could not check existing registration, proceeding");
                        WorkerState::Sanitizing
                    }
                },
                WorkerState::Sanitizing => {
                    self.sanitize(endpoint).await;
                    WorkerState::Registering
                }
                WorkerState::Registering => return self.register(endpoint).await,
            };
        }
    }

    /// Clear any stale entry for this worker's host from every other known node's catalog.
    ///
    /// Best effort: all errors are logged and discarded.
    async fn sanitize(&self, endpoint: &WorkerEndpoint) {
        let nodes = match self.control.list_nodes().await {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::warn!(error = %err, "could not list registered nodes, skipping stale entry cleanup");
                return;
            }
        };

        let mut seen = HashSet::new();
        for node in nodes.iter().filter(|node| node.host != endpoint.host) {
            if !seen.insert(node.host.as_str()) {
                continue;
            }
            match self.control.forget_node(node, &endpoint.host).await {
                Ok(()) => tracing::debug!(%node, "cleared stale entries for worker"),
                Err(err) => tracing::debug!(%node, error = %err, "error clearing stale entries for worker, ignoring"),
            }
        }
    }

    /// Register the worker, retrying up to the configured number of attempts.
    async fn register(&self, endpoint: &WorkerEndpoint) -> WorkerOutcome {
        let max_attempts = self.config.worker_register_attempts.max(1);
        let addr = endpoint.addr();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.control.add_node(&addr).await {
                Ok(()) => {
                    tracing::info!(attempt, "worker registered");
                    return WorkerOutcome::Registered { attempts: attempt };
                }
                Err(err) => err,
            };
            if attempt >= max_attempts {
                tracing::error!(error = %err, attempts = attempt, "giving up on worker registration");
                return WorkerOutcome::Failed { attempts: attempt, reason: err };
            }
            tracing::warn!(
                error = %err,
                attempt,
                max_attempts,
                unique_violation = err.is_unique_violation(),
                "worker registration failed, retrying"
            );
            tokio::time::sleep(self.config.worker_register_delay()).await;
        }
    }
}
