use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{Stream, StreamExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::wrappers::SignalStream;
use tokio_stream::StreamMap;

use crate::catalog::ControlPlane;
use crate::config::Config;
use crate::error::{CatalogError, PreflightError};
use crate::preflight;
use crate::readiness::{wait_for_coordinator, wait_for_fleet};
use crate::reconciler::{Reconciler, RunSummary};
use crate::topology::ClusterTopology;

/// How a detached registration run ended.
///
/// Every variant is a successful process exit; the report exists for logging and tests.
#[derive(Debug)]
pub enum RunReport {
    /// The preflight guard declined to run.
    Skipped(PreflightError),
    /// The Citus extension could not be activated; a later container restart will retry.
    ExtensionUnavailable(CatalogError),
    /// A termination signal arrived before the run finished.
    Interrupted,
    /// Every worker reached a terminal state.
    Completed(RunSummary),
}

impl RunReport {
    /// Log the report at a level matching its severity.
    pub fn log(&self) {
        match self {
            Self::Skipped(reason) => tracing::warn!(%reason, "worker registration skipped"),
            Self::ExtensionUnavailable(err) => {
                tracing::warn!(error = %err, "could not activate citus extension, worker registration deferred to next restart")
            }
            Self::Interrupted => tracing::warn!("worker registration interrupted"),
            Self::Completed(summary) => summary.log(),
        }
    }
}

/// The application object for a detached registration run.
pub struct App {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The expected worker fleet.
    topology: ClusterTopology,
    /// The database control plane.
    control: Arc<dyn ControlPlane>,
}

impl App {
    /// Create a new instance, applying the preflight guard.
    pub fn new(config: Arc<Config>, control: Arc<dyn ControlPlane>) -> Result<Self, PreflightError> {
        let topology = preflight::check(&config)?;
        Ok(Self { config, topology, control })
    }

    /// Build the app from a parsed config, or the report explaining why no run takes place.
    pub fn prepare<F>(config: Result<Config>, control: F) -> Result<Self, RunReport>
    where
        F: FnOnce(Arc<Config>) -> Arc<dyn ControlPlane>,
    {
        let config = match config {
            Ok(config) => Arc::new(config),
            Err(err) => return Err(RunReport::Skipped(PreflightError::InvalidConfig(format!("{:#}", err)))),
        };
        let control = control(config.clone());
        Self::new(config, control).map_err(RunReport::Skipped)
    }

    /// Run registration to completion, or until SIGTERM or SIGINT is received.
    ///
    /// If signal handlers cannot be installed the run proceeds without them.
    pub async fn run_until_signal(self) -> RunReport {
        match Self::signals() {
            Ok(signals) => self.run_until_shutdown(signals).await,
            Err(err) => {
                tracing::warn!(error = ?err, "running without signal handling");
                self.run().await
            }
        }
    }

    /// Run registration to completion, or until the shutdown stream yields an event.
    ///
    /// A shutdown stream which ends without yielding does not interrupt the run.
    pub async fn run_until_shutdown<S>(self, mut shutdown: S) -> RunReport
    where
        S: Stream + Unpin,
        S::Item: fmt::Debug,
    {
        let run = self.run();
        tokio::pin!(run);
        tokio::select! {
            report = &mut run => report,
            Some(event) = shutdown.next() => {
                tracing::debug!(?event, "shutdown received, abandoning registration run");
                RunReport::Interrupted
            }
        }
    }

    fn signals() -> Result<StreamMap<&'static str, SignalStream>> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));
        Ok(signals)
    }

    /// Execute every phase in order.
    pub async fn run(self) -> RunReport {
        tracing::info!(
            statefulset = %self.topology.worker_statefulset,
            replicas = self.topology.worker_replicas,
            namespace = %self.topology.namespace,
            "starting citus worker registration",
        );

        if let Err(err) = wait_for_coordinator(&*self.control, &self.config).await {
            return RunReport::ExtensionUnavailable(err);
        }

        let endpoints = self.topology.endpoints();
        wait_for_fleet(&*self.control, &self.config, &endpoints).await;

        let summary = Reconciler::new(self.control.clone(), self.config.clone()).run(&endpoints).await;
        RunReport::Completed(summary)
    }
}
