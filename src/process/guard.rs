use crate::config::SupervisorConfig;
use crate::error::{CorePoolError, Result};
use crate::logs::{LogSink, Severity};
use crate::process::exit::{classify, ExitKind, ExitVerdict};
use crate::process::spawner::{command_name, spawn_process, SpawnedProcess};
use crate::process::{commandline, platform};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Async callback run after every successful respawn
pub type RestartCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Async callback receiving the error that stopped a guard
pub type FatalHandler = Arc<dyn Fn(CorePoolError) -> BoxFuture<'static, ()> + Send + Sync>;

/// State every guard of one supervisor shares
pub(crate) struct Shared {
    pub config: SupervisorConfig,
    pub sink: Arc<dyn LogSink>,
    pub on_fatal: FatalHandler,
    pub token: CancellationToken,
    pub tracker: TaskTracker,
}

/// Stop requests forwarded to the task that owns the OS child handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    Terminate,
    Kill,
}

type ExitReport = io::Result<ExitStatus>;

/// One spawn-to-exit instance of a guarded process
pub(crate) struct Generation {
    started: Instant,
    pid: Option<u32>,
    exit: oneshot::Receiver<ExitReport>,
    control: mpsc::UnboundedSender<StopRequest>,
}

impl Generation {
    fn request(&self, request: StopRequest) {
        // The watcher is gone once the exit has been reported
        let _ = self.control.send(request);
    }
}

/// Why a looper stopped
enum Outcome {
    /// Shutdown requested while this generation is still unconfirmed
    Shutdown(Generation),
    /// Shutdown requested after the last generation already exited
    Stopped,
    Fatal(CorePoolError),
    /// Fatal error while a respawned generation is still live
    Aborted(Generation, CorePoolError),
}

/// Supervises one external process across all of its generations
pub(crate) struct Guard {
    command: Vec<String>,
    env: HashMap<String, String>,
    name: Arc<str>,
    cmdline: String,
    restarts: u64,
    shared: Arc<Shared>,
}

impl Guard {
    pub fn new(command: Vec<String>, env: HashMap<String, String>, shared: Arc<Shared>) -> Self {
        let name: Arc<str> = Arc::from(command_name(&command));
        let cmdline = commandline::to_string(&command);

        Self {
            command,
            env,
            name,
            cmdline,
            restarts: 0,
            shared,
        }
    }

    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    /// Spawn a new generation and start draining its output
    pub fn start(&self) -> Result<Generation> {
        let SpawnedProcess { mut child, pid } = spawn_process(
            &self.command,
            &self.env,
            self.shared.config.working_dir.as_deref(),
        )?;

        let stdout = child.stdout.take();
        let stderr_drain = child.stderr.take().map(|stderr| {
            self.shared.tracker.spawn(drain_lines(
                stderr,
                Arc::clone(&self.shared.sink),
                Arc::clone(&self.name),
                Severity::Warning,
            ))
        });

        let (exit_tx, exit_rx) = oneshot::channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        self.shared.tracker.spawn(watch_exit(
            child,
            stdout,
            stderr_drain,
            control_rx,
            exit_tx,
            ExitWatchContext {
                sink: Arc::clone(&self.shared.sink),
                tag: Arc::clone(&self.name),
                drain_grace: self.shared.config.drain_grace(),
            },
        ));

        debug!(
            "Spawned {} (PID: {:?}, restarts so far: {})",
            self.name, pid, self.restarts
        );

        Ok(Generation {
            started: Instant::now(),
            pid,
            exit: exit_rx,
            control: control_tx,
        })
    }

    /// Monitor, restart and finally tear down the guarded process
    pub async fn looper(mut self, mut generation: Generation, on_restart: Option<RestartCallback>) {
        let fast_fail = self.shared.config.fast_fail();

        let outcome = loop {
            let exit = tokio::select! {
                biased;
                _ = self.shared.token.cancelled() => None,
                exit = &mut generation.exit => Some(exit),
            };
            let Some(exit) = exit else {
                break Outcome::Shutdown(generation);
            };

            let uptime = generation.started.elapsed();
            let status = match exit {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    break Outcome::Fatal(CorePoolError::WaitError(format!("{}: {}", self.name, e)))
                }
                Err(_) => {
                    break Outcome::Fatal(CorePoolError::WaitError(format!(
                        "{}: exit watcher stopped without reporting",
                        self.name
                    )))
                }
            };

            let kind = ExitKind::from_status(&status);
            match classify(kind, uptime, fast_fail) {
                ExitVerdict::TooFast => {
                    break Outcome::Fatal(CorePoolError::ExitsTooFast {
                        name: self.name.to_string(),
                        exit: kind,
                    })
                }
                ExitVerdict::Killed => self.notice(&format!("{} was killed", self.name)),
                ExitVerdict::Unexpected => self.notice(&format!(
                    "{} unexpectedly exits with code {}",
                    self.name, kind
                )),
            }

            if self.shared.token.is_cancelled() {
                break Outcome::Stopped;
            }

            info!(
                "restart process: {} (last exit code: {})",
                self.cmdline, kind
            );
            generation = match self.start() {
                Ok(next) => next,
                Err(e) => break Outcome::Fatal(e),
            };
            self.restarts += 1;

            if let Some(ref callback) = on_restart {
                let run = AssertUnwindSafe(async { callback().await }).catch_unwind();
                tokio::select! {
                    biased;
                    _ = self.shared.token.cancelled() => break Outcome::Shutdown(generation),
                    result = run => {
                        if let Err(payload) = result {
                            break Outcome::Aborted(
                                generation,
                                CorePoolError::CallbackPanicked {
                                    name: self.name.to_string(),
                                    message: panic_message(payload.as_ref()),
                                },
                            );
                        }
                    }
                }
            }
        };

        match outcome {
            Outcome::Shutdown(generation) => self.tear_down(generation).await,
            Outcome::Stopped => {
                debug!("{} exited during shutdown, nothing to tear down", self.name);
            }
            Outcome::Fatal(e) => self.fail(e),
            Outcome::Aborted(generation, e) => {
                self.tear_down(generation).await;
                self.fail(e);
            }
        }
    }

    /// Warn through both `tracing` and the process's log sink
    fn notice(&self, message: &str) {
        warn!("{}", message);
        self.shared.sink.write(Severity::Warning, &self.name, message);
    }

    async fn tear_down(&self, generation: Generation) {
        let name = Arc::clone(&self.name);
        let config = self.shared.config.clone();
        // Run on its own task so dropping this looper cannot abandon the child
        let cleanup = self
            .shared
            .tracker
            .spawn(teardown(Arc::clone(&name), generation, config));
        if let Err(e) = cleanup.await {
            error!("Teardown of {} failed: {}", name, e);
        }
    }

    fn fail(&self, e: CorePoolError) {
        self.notice(&format!("error occurred. stop guard: {}", self.cmdline));
        error!("{}", e);
        // Detached from the supervisor's scope so shutdown cannot cancel it
        let on_fatal = Arc::clone(&self.shared.on_fatal);
        tokio::spawn(async move { on_fatal(e).await });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Stop a live generation and wait until its exit is confirmed
async fn teardown(name: Arc<str>, mut generation: Generation, config: SupervisorConfig) {
    debug!("Tearing down {} (PID: {:?})", name, generation.pid);

    if platform::supports_graceful_stop() {
        generation.request(StopRequest::Terminate);
        if timeout(config.stop_timeout(), &mut generation.exit)
            .await
            .is_ok()
        {
            debug!("{} exited after termination request", name);
            return;
        }
        warn!(
            "{} did not exit within {:?}, killing",
            name,
            config.stop_timeout()
        );
    }

    generation.request(StopRequest::Kill);
    if timeout(config.kill_timeout(), &mut generation.exit)
        .await
        .is_ok()
    {
        debug!("{} exited after kill", name);
        return;
    }

    warn!(
        "{} still running {:?} after kill, waiting for exit",
        name,
        config.kill_timeout()
    );
    let _ = (&mut generation.exit).await;
}

struct ExitWatchContext {
    sink: Arc<dyn LogSink>,
    tag: Arc<str>,
    drain_grace: std::time::Duration,
}

/// Drain stdout, own the child handle, and report its exit exactly once
async fn watch_exit(
    mut child: Child,
    stdout: Option<ChildStdout>,
    mut stderr_drain: Option<JoinHandle<()>>,
    mut control: mpsc::UnboundedReceiver<StopRequest>,
    exit_tx: oneshot::Sender<ExitReport>,
    ctx: ExitWatchContext,
) {
    let stdout_drain = {
        let sink = Arc::clone(&ctx.sink);
        let tag = Arc::clone(&ctx.tag);
        async move {
            if let Some(stdout) = stdout {
                drain_lines(stdout, sink, tag, Severity::Info).await;
            }
        }
    };
    tokio::pin!(stdout_drain);
    let mut stdout_done = false;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = &mut stdout_drain, if !stdout_done => stdout_done = true,
            Some(request) = control.recv() => deliver(&mut child, request, &ctx.tag),
        }
    };

    // Let output already in the pipes land before the exit is reported
    let deadline = tokio::time::Instant::now() + ctx.drain_grace;
    if !stdout_done && timeout_at(deadline, &mut stdout_drain).await.is_err() {
        debug!("{} stdout still open after exit, abandoning it", ctx.tag);
    }
    if let Some(ref mut handle) = stderr_drain {
        if timeout_at(deadline, &mut *handle).await.is_err() {
            debug!("{} stderr still open after exit, abandoning it", ctx.tag);
            handle.abort();
        }
    }

    // The looper may already be gone
    let _ = exit_tx.send(status);
}

fn deliver(child: &mut Child, request: StopRequest, tag: &str) {
    let result = match request {
        StopRequest::Terminate => platform::request_stop(child),
        StopRequest::Kill => child.start_kill().map_err(CorePoolError::from),
    };

    if let Err(e) = result {
        warn!("Failed to stop {} ({:?}): {}", tag, request, e);
    }
}

/// Forward each line of a stream to the sink until it closes
async fn drain_lines<R>(reader: R, sink: Arc<dyn LogSink>, tag: Arc<str>, severity: Severity)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                sink.write(severity, &tag, line);
            }
            Err(e) => {
                // Stream errors only end draining; the exit report decides the rest
                debug!("Stopped reading {} output: {}", tag, e);
                break;
            }
        }
    }
}
