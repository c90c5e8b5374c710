//! postStart hook wrapper.
//!
//! The platform enforces a hard deadline on lifecycle hooks, while registration may take
//! minutes. The hook therefore only re-executes this binary in `--run` mode as a detached
//! child and returns at once. The child writes to the container's primary output so that its
//! logs show up alongside the database's own.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};

use crate::config::HookConfig;

/// The flag passed to the detached child.
pub const RUN_FLAG: &str = "--run";

/// Spawn the detached registration run from the current executable.
///
/// The child is not waited upon; its exit status is never observed by the hook.
pub fn spawn_detached(config: &HookConfig) -> Result<u32> {
    let exe = std::env::current_exe().context("error locating registrar executable")?;
    let child = spawn(&exe, config)?;
    Ok(child.id())
}

/// Spawn `program --run` in its own process group with output sent to the configured sinks.
pub(crate) fn spawn(program: &Path, config: &HookConfig) -> Result<Child> {
    Command::new(program)
        .arg(RUN_FLAG)
        .stdin(Stdio::null())
        .stdout(open_sink(&config.stdout_sink))
        .stderr(open_sink(&config.stderr_sink))
        .process_group(0)
        .spawn()
        .with_context(|| format!("error spawning detached run of {}", program.display()))
}

/// Open the given path for appending, discarding output if it cannot be opened.
fn open_sink(path: &str) -> Stdio {
    match OpenOptions::new().append(true).open(path) {
        Ok(file) => Stdio::from(file),
        Err(err) => {
            tracing::warn!(error = %err, path, "could not open output sink, detached output will be discarded");
            Stdio::null()
        }
    }
}
