use crate::config::{CoreConfig, SupervisorConfig};
use crate::error::{CorePoolError, Result};
use crate::logs::{LogSink, TracingSink};
use crate::process::guard::{FatalHandler, Guard, RestartCallback, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Wrap an async closure as a restart callback
pub fn restart_callback<F, Fut>(f: F) -> RestartCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Pool of guarded external processes sharing one lifetime
///
/// Every process started here is restarted when it exits, unless it dies
/// within the fast-fail threshold of its launch. In that case the error is
/// handed to the fatal handler and the process is given up on. Shutting the
/// supervisor down stops every process and waits until each exit is
/// confirmed.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    /// Set once shutdown begins; guards `start` against racing it
    closed: Mutex<bool>,
}

impl ProcessSupervisor {
    /// Create a new process supervisor
    ///
    /// # Arguments
    /// * `config` - Timings and working directory for every guard
    /// * `sink` - Receives the stdout/stderr lines of every process
    /// * `on_fatal` - Called at most once per guard with the error that stopped it
    pub fn new<F, Fut>(config: SupervisorConfig, sink: Arc<dyn LogSink>, on_fatal: F) -> Self
    where
        F: Fn(CorePoolError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let on_fatal: FatalHandler = Arc::new(move |e: CorePoolError| on_fatal(e).boxed());

        Self {
            shared: Arc::new(Shared {
                config,
                sink,
                on_fatal,
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
            closed: Mutex::new(false),
        }
    }

    /// Create a supervisor with default timings that logs through `tracing`
    pub fn with_defaults<F, Fut>(on_fatal: F) -> Self
    where
        F: Fn(CorePoolError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(SupervisorConfig::default(), Arc::new(TracingSink), on_fatal)
    }

    /// Start a guarded process
    ///
    /// The first spawn happens before this returns, so a bad executable or
    /// working directory is reported here rather than through the fatal
    /// handler. Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    /// * `command` - Executable path followed by its arguments
    /// * `env` - Extra environment variables for the process
    /// * `on_restart` - Run after every respawn, not after the first launch
    ///
    /// # Returns
    /// * `Ok(())` - Process is running and supervised
    /// * `Err(CorePoolError)` - Nothing was started
    pub fn start(
        &self,
        command: Vec<String>,
        env: HashMap<String, String>,
        on_restart: Option<RestartCallback>,
    ) -> Result<()> {
        if command.first().map_or(true, |program| program.is_empty()) {
            return Err(CorePoolError::EmptyCommand);
        }

        tokio::runtime::Handle::try_current().map_err(|e| {
            CorePoolError::SpawnError(format!("No Tokio runtime available: {}", e))
        })?;

        let closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *closed || self.shared.token.is_cancelled() {
            return Err(CorePoolError::SupervisorClosed);
        }

        let guard = Guard::new(command, env, Arc::clone(&self.shared));
        info!("start process: {}", guard.cmdline());

        let generation = guard.start()?;
        self.shared
            .tracker
            .spawn(guard.looper(generation, on_restart));

        Ok(())
    }

    /// Start a core described by a configuration entry
    pub fn start_core(&self, core: &CoreConfig, on_restart: Option<RestartCallback>) -> Result<()> {
        core.validate()?;
        self.start(core.command.clone(), core.env.clone(), on_restart)
    }

    /// Stop every guarded process and wait for all of them to exit
    ///
    /// Safe to call more than once, including concurrently. Every call
    /// returns only after teardown has finished.
    pub async fn shutdown(&self) {
        {
            let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
            if !*closed {
                *closed = true;
                debug!(
                    "Shutting down process supervisor ({} tasks)",
                    self.shared.tracker.len()
                );
                self.shared.token.cancel();
                self.shared.tracker.close();
            }
        }

        self.shared.tracker.wait().await;
    }

    /// Whether shutdown has been requested
    pub fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Number of supervisor tasks still running (loopers, drains, teardowns)
    pub fn active_tasks(&self) -> usize {
        self.shared.tracker.len()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // Loopers still tear their processes down, just without anyone waiting
        self.shared.token.cancel();
    }
}
