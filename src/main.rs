//! Citus worker registration for Kubernetes coordinator pods.
//!
//! Invoked with `--poststart` from a coordinator container's postStart hook, this binary
//! detaches a `--run` copy of itself and returns immediately. The detached run waits for the
//! coordinator and the worker fleet, then registers every expected worker with the
//! coordinator's catalog. The process always exits successfully; all failures are reported
//! through logs.

mod app;
mod catalog;
mod config;
mod error;
#[cfg(test)]
mod fixtures;
mod hook;
mod preflight;
mod readiness;
mod reconciler;
mod topology;

use std::io::Write;
use std::sync::Arc;

use structopt::clap::{ArgGroup, ErrorKind};
use structopt::StructOpt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::app::{App, RunReport};
use crate::catalog::{ControlPlane, PgControlPlane};
use crate::config::{Config, HookConfig};

/// Register Citus workers with the local coordinator.
#[derive(StructOpt)]
#[structopt(name = "citus-registrar", group = ArgGroup::with_name("mode").required(true))]
struct Opts {
    /// Detach a registration run and return immediately, for use as a postStart hook.
    #[structopt(long, group = "mode")]
    poststart: bool,
    /// Run registration in the foreground.
    #[structopt(long, group = "mode")]
    run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Setup tracing/logging system.
    let _ = tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var, defaulting to info.
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        // Container logs are not a terminal, so no ANSI.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false),
        )
        // Install this registry as the global tracing registry.
        .try_init();

    let opts = match Opts::from_args_safe() {
        Ok(opts) => opts,
        Err(err) if matches!(err.kind, ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed) => {
            println!("{}", err.message);
            return;
        }
        Err(err) => {
            tracing::error!(error = %err.message, "invalid invocation, expected --poststart or --run");
            return;
        }
    };

    if opts.poststart {
        match hook::spawn_detached(&HookConfig::new()) {
            Ok(pid) => tracing::info!(pid, "detached citus worker registration"),
            Err(err) => tracing::error!(error = ?err, "error detaching citus worker registration"),
        }
    } else if opts.run {
        run().await.log();
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

/// Execute a registration run, folding every failure into the returned report.
async fn run() -> RunReport {
    let control = |config: Arc<Config>| -> Arc<dyn ControlPlane> { Arc::new(PgControlPlane::new(config)) };
    match App::prepare(Config::new(), control) {
        Ok(app) => app.run_until_signal().await,
        Err(report) => report,
    }
}
