// Platform stop capability
//
// Unix can ask a process to stop with SIGTERM before escalating to a kill.
// Elsewhere the graceful step is skipped and teardown goes straight to
// Child::start_kill.

use crate::error::{CorePoolError, Result};
use tokio::process::Child;

/// Whether the platform can ask a process to exit before killing it
pub fn supports_graceful_stop() -> bool {
    cfg!(unix)
}

/// Send a graceful termination request to a live child
///
/// A child that has already been reaped is left alone, so the signal never
/// reaches a recycled pid.
#[cfg(unix)]
pub fn request_stop(child: &Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CorePoolError::SignalError(format!(
            "Failed to send SIGTERM to {}: {}",
            pid, e
        ))),
    }
}

#[cfg(not(unix))]
pub fn request_stop(_child: &Child) -> Result<()> {
    Err(CorePoolError::SignalError(
        "Graceful stop is not supported on this platform".to_string(),
    ))
}
