//! Voctodeck control-panel daemon
//!
//! Binds an illuminated key panel to a live video mixer: key faces follow
//! the mixer's reported state (plus a few local sources) and key presses
//! are translated into mixer commands.

mod actions;
mod buttons;
mod config;
mod deck;
mod mixer;
mod pollers;
mod render;
mod service;
mod state;
mod video;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, ServiceConfig};
use crate::service::Service;

fn main() {
    let cli = Cli::parse();

    // Initialize logging with RUST_LOG env var support
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_devices {
        let devices = deck::list_devices().context("Failed to enumerate panels")?;
        if devices.is_empty() {
            println!("No panels found");
        }
        for device in devices {
            println!("{}", device);
        }
        return Ok(());
    }

    let (config, source) = ServiceConfig::load(&cli).context("Failed to load configuration")?;
    if cli.dump_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Voctodeck starting (pid: {})...", std::process::id());
    match &source {
        Some(path) => info!("Using config {}", path.display()),
        None => info!("No config file found, using built-in defaults"),
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        setup_signal_handlers(shutdown.clone());

        info!("Opening panels ({:?} backend)...", config.deck.backend);
        let backends = deck::open_backends(&config.deck, config.buttons.len())
            .context("Failed to open panel")?;

        Service::new(config, shutdown).run(backends).await
    })?;

    info!("Voctodeck stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT, SIGTERM or SIGHUP.
fn setup_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            let (mut sigterm, mut sigint, mut sighup) = match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
                signal(SignalKind::hangup()),
            ) {
                (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
                _ => {
                    error!("Failed to install signal handlers");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sighup.recv() => info!("Received SIGHUP"),
                _ = shutdown.cancelled() => return,
            }

            info!("Shutdown requested");
            shutdown.cancel();
        });
    }

    #[cfg(windows)]
    {
        // Windows uses Ctrl+C handler
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Received Ctrl+C");
            shutdown.cancel();
        }) {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}
