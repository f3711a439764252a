// Shared helpers for supervisor integration tests
#![allow(dead_code)]

use corepool::config::SupervisorConfig;
use corepool::logs::RingSink;
use corepool::process::RestartCallback;
use corepool::{restart_callback, CorePoolError, ProcessSupervisor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Defaults with a custom fast-fail threshold
pub fn config_with_fast_fail(fast_fail_ms: u64) -> SupervisorConfig {
    SupervisorConfig {
        fast_fail_ms,
        ..Default::default()
    }
}

/// A supervisor wired to an in-memory sink and a recording fatal handler
pub struct Harness {
    pub supervisor: ProcessSupervisor,
    pub sink: Arc<RingSink>,
    pub fatal_rx: mpsc::UnboundedReceiver<CorePoolError>,
    pub fatal_count: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(config: SupervisorConfig) -> Self {
        let sink = Arc::new(RingSink::new());
        let fatal_count = Arc::new(AtomicUsize::new(0));
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&fatal_count);
        let supervisor = ProcessSupervisor::new(config, sink.clone(), move |e| {
            let counter = Arc::clone(&counter);
            let fatal_tx = fatal_tx.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = fatal_tx.send(e);
            }
        });

        Self {
            supervisor,
            sink,
            fatal_rx,
            fatal_count,
        }
    }

    pub fn fatal_count(&self) -> usize {
        self.fatal_count.load(Ordering::SeqCst)
    }

    /// Wait for the next fatal error
    pub async fn next_fatal(&mut self, within: Duration) -> Option<CorePoolError> {
        tokio::time::timeout(within, self.fatal_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Lines from `tag` whose message equals `message`
    pub fn count_lines(&self, tag: &str, message: &str) -> usize {
        self.sink
            .lines_for(tag)
            .iter()
            .filter(|line| line.as_str() == message)
            .count()
    }
}

/// Restart callback that counts invocations and notifies a channel
pub struct RestartProbe {
    pub callback: RestartCallback,
    pub rx: mpsc::UnboundedReceiver<()>,
    pub count: Arc<AtomicUsize>,
}

impl RestartProbe {
    pub fn new() -> Self {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&count);
        let callback = restart_callback(move || {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }
        });

        Self {
            callback,
            rx,
            count,
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for `n` more restarts
    pub async fn wait_for(&mut self, n: usize, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            for _ in 0..n {
                if self.rx.recv().await.is_none() {
                    return false;
                }
            }
            true
        })
        .await
        .unwrap_or(false)
    }
}

/// Poll `condition` until it holds or `within` elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// A `/bin/sh` reachable under another name, so the log tag is `name`
///
/// A symlink avoids the ETXTBSY races of writing fresh scripts while other
/// tests fork.
pub fn shell_named(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::os::unix::fs::symlink("/bin/sh", &path).unwrap();
    path
}

/// Whether a pid still refers to a live (or unreaped) process
pub fn pid_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}
