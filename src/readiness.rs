//! Readiness waits for the coordinator and the worker fleet.

use std::time::Duration;

use tokio::time::Instant;

use crate::catalog::ControlPlane;
use crate::config::Config;
use crate::error::{CatalogError, WaitTimeout};
use crate::topology::{NodeAddr, WorkerEndpoint};

/// Poll the given node until it answers, with no upper bound.
///
/// Returns the time spent waiting.
pub async fn wait_for_node(control: &dyn ControlPlane, node: &NodeAddr, interval: Duration) -> Duration {
    let start = Instant::now();
    let mut probes = 0u64;
    loop {
        probes += 1;
        match control.ping(node).await {
            Ok(()) => {
                tracing::debug!(%node, probes, "node is reachable");
                return start.elapsed();
            }
            Err(err) => tracing::trace!(%node, error = %err, "node not yet reachable"),
        }
        tokio::time::sleep(interval).await;
    }
}

/// Poll the given node until it answers or `deadline` elapses.
///
/// No probe is started which could not finish sleeping within the deadline, so the reported
/// wait may fall short of `deadline` when `interval` does not divide it.
pub async fn wait_for_node_within(
    control: &dyn ControlPlane, node: &NodeAddr, interval: Duration, deadline: Duration,
) -> Result<Duration, WaitTimeout> {
    let start = Instant::now();
    let mut probes = 0u64;
    loop {
        probes += 1;
        let err = match control.ping(node).await {
            Ok(()) => {
                tracing::debug!(%node, probes, "node is reachable");
                return Ok(start.elapsed());
            }
            Err(err) => err,
        };
        let waited = start.elapsed();
        if waited >= deadline || waited + interval > deadline {
            return Err(WaitTimeout { waited, last_error: err });
        }
        tracing::trace!(%node, error = %err, "node not yet reachable");
        tokio::time::sleep(interval).await;
    }
}

/// Block until the local coordinator accepts connections, then activate the Citus extension.
///
/// There is no upper bound on the wait; a coordinator which never comes up is left to the
/// platform's liveness probe.
pub async fn wait_for_coordinator(control: &dyn ControlPlane, config: &Config) -> Result<(), CatalogError> {
    let coordinator = control.coordinator().clone();
    tracing::info!(%coordinator, "waiting for coordinator to accept connections");
    let waited = wait_for_node(control, &coordinator, config.coordinator_wait_interval()).await;
    tracing::info!(%coordinator, waited_secs = waited.as_secs(), "coordinator is accepting connections");

    control.ensure_extension().await?;
    tracing::info!("citus extension is active");
    Ok(())
}

/// Block until every expected worker is reachable.
///
/// Registration does not begin until the whole fleet is up, so that nodes are not registered
/// against a fleet still changing shape. No per-worker bound applies here.
pub async fn wait_for_fleet(control: &dyn ControlPlane, config: &Config, endpoints: &[WorkerEndpoint]) {
    tracing::info!(workers = endpoints.len(), "waiting for worker fleet to stabilize");
    for endpoint in endpoints {
        tracing::info!(index = endpoint.index, host = %endpoint.host, "waiting for worker");
        let waited = wait_for_node(control, &endpoint.addr(), config.worker_wait_interval()).await;
        tracing::debug!(index = endpoint.index, waited_secs = waited.as_secs(), "worker is reachable");
    }
    tracing::info!(workers = endpoints.len(), "all workers are reachable");
}
