use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use color_eyre::{Result, eyre::Context};
use simple_proxy::{
    adapters::{EngineOptions, FileConfigProvider, TcpProxyEngine},
    config::loader::load_config_sync,
    core::{ConfigWatcher, Orchestrator, build_proxy_specs, proxy_set_channel},
    ports::ConfigProvider,
    tracing_setup,
    utils::GracefulShutdown,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the HCL configuration file
    #[clap(short, long, env = "PROXY_CONFIG")]
    config: PathBuf,

    /// Validate the configuration, print the resulting listeners as JSON and exit
    #[clap(long)]
    check: bool,

    /// Reload automatically when the configuration file changes
    #[clap(long)]
    watch: bool,

    #[clap(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Log filter, e.g. `info` or `simple_proxy=debug`. `RUST_LOG` takes precedence.
    #[clap(long)]
    log_level: Option<String>,

    /// How long to wait for a client's first bytes when matching Host or SNI rules
    #[clap(long, default_value = "5s", value_parser = humantime::parse_duration)]
    match_timeout: Duration,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    if args.check {
        return check_config_command(&args);
    }

    init_logging(&args).wrap_err("Failed to initialize tracing")?;

    let cancel = CancellationToken::new();
    let (reload_tx, reload_rx) = mpsc::channel(1);

    let shutdown = Arc::new(GracefulShutdown::new(cancel.clone()));
    let signal_reload_tx = reload_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown.run_signal_handler(signal_reload_tx).await {
            tracing::error!("Signal handler error: {:?}", e);
        }
    });

    let provider: Arc<dyn ConfigProvider> = if args.watch {
        Arc::new(
            FileConfigProvider::watching(&args.config, reload_tx)
                .wrap_err("Failed to watch configuration file")?,
        )
    } else {
        Arc::new(FileConfigProvider::new(&args.config))
    };

    let (sender, inbox) = proxy_set_channel();
    let watcher = ConfigWatcher::new(provider, sender, cancel.clone());
    tokio::spawn(watcher.run(reload_rx));

    let engine = Arc::new(TcpProxyEngine::new(EngineOptions {
        match_timeout: args.match_timeout,
    }));

    Orchestrator::new(engine, inbox, cancel)
        .run()
        .await
        .wrap_err_with(|| format!("Proxy stopped with configuration {}", args.config.display()))?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    match (&args.log_level, args.log_format) {
        (Some(level), format) => {
            tracing_setup::init_tracing_with_config(level, matches!(format, LogFormat::Json))
        }
        (None, LogFormat::Json) => tracing_setup::init_tracing(),
        (None, LogFormat::Pretty) => tracing_setup::init_console_tracing(),
    }
}

fn check_config_command(args: &Args) -> Result<()> {
    let config = match load_config_sync(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let specs = build_proxy_specs(&config);
    let rendered = serde_json::to_string_pretty(&specs).wrap_err("Failed to render proxy set")?;
    println!("{rendered}");
    Ok(())
}
