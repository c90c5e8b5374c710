//! Preflight guard.
//!
//! This process runs on every container start, including pods which are not meant to register
//! anything. A failed precondition therefore ends the run quietly rather than failing.

use crate::config::Config;
use crate::error::PreflightError;
use crate::topology::ClusterTopology;

/// Check the registration preconditions in order, yielding the cluster topology on success.
pub fn check(config: &Config) -> Result<ClusterTopology, PreflightError> {
    let worker_statefulset = config
        .worker_statefulset
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(PreflightError::MissingWorkerSet)?;
    if config.password.as_deref().map_or(true, str::is_empty) {
        return Err(PreflightError::MissingCredentials);
    }
    if config.worker_replicas == 0 {
        return Err(PreflightError::NoReplicas);
    }
    Ok(ClusterTopology::new(config, worker_statefulset.to_string(), config.worker_replicas))
}
