// CLI module - Host binary that runs a pool of cores in the foreground

mod output;

use crate::config::{CoreConfig, PoolConfig};
use crate::error::{CorePoolError, Result};
use crate::logs::{FileSink, LogSink, TracingSink};
use crate::process::ProcessSupervisor;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// corepool - Keep proxy cores running, restart them when they crash
#[derive(Parser)]
#[command(name = "corepool")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cores under a supervisor until interrupted or a core fails fatally
    Run {
        /// Pool file (.toml or .json) listing the cores to run
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Working directory for every core
        #[arg(short, long)]
        working_dir: Option<PathBuf>,

        /// Write core output to files in this directory instead of the console
        #[arg(short, long)]
        log_dir: Option<PathBuf>,

        /// Environment variables for the ad-hoc command (KEY=VALUE format)
        #[arg(short, long)]
        env: Vec<String>,

        /// Ad-hoc core to run: executable followed by its arguments
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Validate a pool file and list its cores
    Check {
        /// Pool file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    /// Run the CLI application, returning the process exit code
    pub async fn run() -> anyhow::Result<i32> {
        let cli = Cli::parse();
        cli.execute().await
    }

    /// Install the console subscriber (`RUST_LOG`, default `info`)
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // A subscriber may already be installed when embedded
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    }

    async fn execute(self) -> anyhow::Result<i32> {
        match self.command {
            Commands::Run {
                config,
                working_dir,
                log_dir,
                env,
                command,
            } => {
                let pool = build_pool(config, working_dir, &env, command)?;
                run_pool(pool, log_dir).await
            }
            Commands::Check { config } => {
                let pool = PoolConfig::from_file(&config)
                    .with_context(|| format!("Invalid pool file {}", config.display()))?;
                output::print_success_msg(&format!("{} is valid", config.display()));
                output::print_pool(&pool);
                Ok(0)
            }
        }
    }
}

/// Merge the pool file, command-line overrides and the ad-hoc command
fn build_pool(
    config: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    env: &[String],
    command: Vec<String>,
) -> anyhow::Result<PoolConfig> {
    let mut pool = match config {
        Some(ref path) => PoolConfig::from_file(path)
            .with_context(|| format!("Invalid pool file {}", path.display()))?,
        None => PoolConfig::default(),
    };

    if working_dir.is_some() {
        pool.supervisor.working_dir = working_dir;
    }

    if !command.is_empty() {
        let mut core = CoreConfig::new(command);
        core.env = parse_env_vars(env)?;
        pool.cores.push(core);
    } else if !env.is_empty() {
        anyhow::bail!("--env only applies to an ad-hoc command given after --");
    }

    pool.validate().context("Nothing to run")?;

    Ok(pool)
}

async fn run_pool(pool: PoolConfig, log_dir: Option<PathBuf>) -> anyhow::Result<i32> {
    let sink: Arc<dyn LogSink> = match log_dir {
        Some(dir) => Arc::new(FileSink::new(&dir)?),
        None => Arc::new(TracingSink),
    };

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let supervisor = ProcessSupervisor::new(pool.supervisor.clone(), sink, move |e| {
        let fatal_tx = fatal_tx.clone();
        async move {
            let _ = fatal_tx.send(e);
        }
    });

    for core in &pool.cores {
        if let Err(e) = supervisor.start_core(core, None) {
            supervisor.shutdown().await;
            return Err(e).with_context(|| format!("Failed to start {}", core.display_name()));
        }
    }

    output::print_info(&format!(
        "Supervising {} core(s), press Ctrl-C to stop",
        pool.cores.len()
    ));

    let fatal = tokio::select! {
        signal = shutdown_signal() => {
            signal.context("Failed to listen for shutdown signals")?;
            None
        }
        fatal = fatal_rx.recv() => fatal,
    };

    supervisor.shutdown().await;

    match fatal {
        Some(e) => {
            output::print_error(&e.to_string());
            Ok(1)
        }
        None => {
            output::print_success_msg("All cores stopped");
            Ok(0)
        }
    }
}

/// Resolve once SIGINT or SIGTERM arrives
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        match env_str.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(CorePoolError::ConfigError(format!(
                    "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                    env_str
                )))
            }
        }
    }

    Ok(map)
}
