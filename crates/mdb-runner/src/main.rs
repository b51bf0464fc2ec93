//! # mdb-runner
//!
//! Hosts a native feed runtime isolate for the lifetime of the process.
//!
//! Loads a JSON configuration file, creates the isolate (from a shared
//! library or the in-process loopback runtime), mirrors the configured system
//! properties into it, and drains the runtime's callback executor until
//! Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! mdb-runner config.json --log-level info
//! mdb-runner config.json --loopback --print-properties
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mdb_bridge::loopback::Loopback;
use mdb_bridge::{Executor, ExecutorPump, Isolate, SystemProperties};
use mdb_core::config::AppConfig;
use mdb_core::logging::{LogOptions, init_logging};
use tracing::{error, info, warn};

/// Native feed runtime host.
#[derive(Parser)]
#[command(name = "mdb-runner", about = "Native feed runtime host")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `bridge.log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Use the in-process loopback runtime instead of `runtime.library_path`.
    #[arg(long)]
    loopback: bool,

    /// Read every configured property back from the runtime and print it.
    #[arg(long)]
    print_properties: bool,
}

/// Keeps the loopback control surface alive next to its isolate.
enum Runtime {
    Library(Isolate),
    Loopback(Loopback),
}

impl Runtime {
    fn start(config: &AppConfig) -> Result<Self> {
        if config.runtime.loopback {
            return Ok(Self::Loopback(Loopback::start()?));
        }
        let path = config
            .runtime
            .library_path
            .as_deref()
            .context("runtime.library_path is not set")?;
        let isolate = Isolate::load(path)
            .with_context(|| format!("loading {}", path.display()))?;
        Ok(Self::Library(isolate))
    }

    fn isolate(&self) -> &Isolate {
        match self {
            Self::Library(isolate) => isolate,
            Self::Loopback(lb) => lb.isolate(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration and apply CLI overrides
    let mut config = mdb_core::config::read_config(&cli.config)?;
    if cli.loopback {
        config.runtime.loopback = true;
    }
    config.validate()?;

    // 2. Initialize logging
    let module_name = config.module_name();
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    init_logging(&LogOptions {
        level: &cli.log_level,
        dir: log_dir.as_deref(),
        file_prefix: &module_name,
        json: config.log_json(),
    });
    info!(
        "{module_name} starting, config={}, log_level={}",
        cli.config.display(),
        cli.log_level
    );

    // 3. Create the isolate
    let runtime = Runtime::start(&config)?;
    let isolate = runtime.isolate();
    info!("isolate {} ready", isolate.id());

    // 4. Mirror system properties
    let properties = SystemProperties::new(isolate);
    properties.set_properties(&config.system_properties)?;
    let applied = config.system_properties.len();
    info!("{applied} system properties applied");
    if cli.print_properties {
        for key in config.system_properties.keys() {
            match properties.get_property(key)? {
                Some(value) => println!("{key}={value}"),
                None => println!("{key} (unset)"),
            }
        }
    }

    // 5. Start the executor pump
    let pump = match &config.executor {
        Some(exec) => {
            let executor = Executor::new(isolate)?;
            let interval = exec.pump_interval();
            info!(
                "executor pump every {interval:?} (cpu_affinity={:?})",
                exec.cpu_affinity
            );
            Some(ExecutorPump::start(executor, interval, exec.cpu_affinity))
        }
        None => {
            warn!("no executor configured, callbacks will not be drained");
            None
        }
    };

    info!("running, press Ctrl+C to stop");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 7. Stop the pump and release the executor
    if let Some(pump) = pump {
        match pump.stop() {
            Some(executor) => {
                if let Err(e) = executor.close() {
                    error!("error releasing executor: {e}");
                }
            }
            None => error!("executor pump exited abnormally"),
        }
    }

    info!("stopped, goodbye");
    Ok(())
}
