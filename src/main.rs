//! modhost command-line host.
//!
//! ```text
//! modhost run  [--config FILE] [--modules DIR]
//! modhost list [--config FILE] [--modules DIR]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use modhost::config::{ApplicationConfig, HostConfig, DEFAULT_CONFIG_FILE};
use modhost::loader::ModuleLoader;
use modhost::script::ScriptSource;
use modhost::store::JsonFileStore;
use modhost::transport::{NullSink, OscUdpTransport, ParameterSink};
use modhost::{HostServices, ModuleRuntime};

const INBOUND_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "modhost", version, about = "Reloadable automation module host")]
struct Cli {
    /// Configuration file
    #[arg(short, long, value_name = "FILE", global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Modules root, overriding the configuration
    #[arg(short, long, value_name = "DIR", global = true)]
    modules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and start every enabled module until Ctrl-C
    Run,
    /// Load modules and print what was found
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HostConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;
    if let Some(root) = cli.modules {
        config.modules.root = root;
    }

    init_tracing(&config.application)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::List => list(config),
    }
}

fn init_tracing(app: &ApplicationConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&app.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if app.log_format == "json" {
        builder.json().try_init().map_err(anyhow::Error::msg)?;
    } else {
        builder.pretty().try_init().map_err(anyhow::Error::msg)?;
    }
    Ok(())
}

fn build_runtime(config: &HostConfig, sink: Arc<dyn ParameterSink>) -> Result<ModuleRuntime> {
    let store = JsonFileStore::open(config.config_dir())?.with_seed(config.store_seed());
    let scripts = ScriptSource::new().with_max_operations(config.modules.script_max_operations);
    let loader = ModuleLoader::new(&config.modules.root)
        .with_dirs(&config.modules.local_dir, &config.modules.remote_dir)
        .with_source(scripts);

    let services = HostServices::new(sink)
        .with_store(Arc::new(store))
        .with_config(config.runtime_config());
    Ok(ModuleRuntime::new(loader, services))
}

async fn run(config: HostConfig) -> Result<()> {
    info!("Starting {}", config.application.name);

    let (sink, mut inbound) = if config.osc.enabled {
        let transport = OscUdpTransport::bind(config.osc.listen, config.osc.send).await?;
        let (rx, _task) = transport.spawn_receiver(INBOUND_CAPACITY);
        info!("OSC listening on {} and sending to {}", config.osc.listen, config.osc.send);
        (Arc::new(transport) as Arc<dyn ParameterSink>, Some(rx))
    } else {
        (Arc::new(NullSink) as Arc<dyn ParameterSink>, None)
    };

    let mut runtime = build_runtime(&config, sink)?;
    runtime.load_all()?;
    runtime.start().await;

    #[cfg(feature = "hot-reload")]
    let (_watcher, mut reloads) = {
        let (watcher, rx) = modhost::watcher::ModuleWatcher::spawn(
            runtime.loader().root(),
            vec![config.config_dir()],
            std::time::Duration::from_millis(500),
        )?;
        (watcher, Some(rx))
    };
    #[cfg(not(feature = "hot-reload"))]
    let mut reloads: Option<mpsc::Receiver<()>> = None;

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => runtime.update().await,
            Some(message) = recv_or_pending(&mut inbound) => {
                runtime.on_parameter_received(&message).await;
            }
            Some(()) = recv_or_pending(&mut reloads) => reload(&mut runtime).await,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    runtime.stop().await;
    Ok(())
}

async fn reload(runtime: &mut ModuleRuntime) {
    let was_running = runtime.is_running();
    runtime.stop().await;

    match runtime.reload_all() {
        Ok(report) => info!(
            "Reloaded {} module(s), {} error(s)",
            report.loaded.len(),
            report.errors.len()
        ),
        Err(e) => error!("Reload failed: {}", e),
    }

    if was_running {
        runtime.start().await;
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn list(config: HostConfig) -> Result<()> {
    let mut runtime = build_runtime(&config, Arc::new(NullSink))?;
    let errors = runtime.load_all()?.errors.clone();

    for status in runtime.modules() {
        println!(
            "{:<32} {:<24} {:<14} {}",
            status.id,
            status.title,
            status.category.to_string(),
            status.origin
        );
    }
    for e in errors {
        eprintln!("error: {}: {}", e.path.display(), e.message);
    }
    Ok(())
}
