use crate::error::{CorePoolError, Result};
use crate::process::commandline;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: Option<u32>,
}

/// Spawn one generation of a core process
///
/// The child gets:
/// - the inherited environment with `env` laid over it
/// - `cwd` as working directory, when given
/// - piped stdout/stderr for the drain tasks, and a null stdin
///
/// The handle is killed if it is ever dropped while the process is alive.
///
/// # Arguments
/// * `command` - Executable path followed by its arguments
/// * `env` - Extra environment variables
/// * `cwd` - Private working directory for the process
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(CorePoolError)` - Empty command or the OS refused to spawn
pub fn spawn_process(
    command: &[String],
    env: &HashMap<String, String>,
    cwd: Option<&Path>,
) -> Result<SpawnedProcess> {
    let (program, args) = command.split_first().ok_or(CorePoolError::EmptyCommand)?;
    if program.is_empty() {
        return Err(CorePoolError::EmptyCommand);
    }

    let mut cmd = Command::new(program);
    cmd.args(args);

    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    cmd.envs(env);

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        CorePoolError::SpawnError(format!(
            "Failed to spawn '{}': {}",
            commandline::to_string(command),
            e
        ))
    })?;

    let pid = child.id();

    Ok(SpawnedProcess { child, pid })
}

/// Base name of the executable, used as the log tag
pub fn command_name(command: &[String]) -> String {
    command
        .first()
        .map(Path::new)
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
