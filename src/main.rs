use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vmrun::cli::Cli;
use vmrun::firecracker::FirecrackerProcess;
use vmrun::{BootError, Bootstrapper};

/// Exit code after SIGINT/SIGTERM, as a shell would report it
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only use colors when outputting to a TTY (not when piped to file)
    let use_color = atty::is(atty::Stream::Stderr);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(true)
        .with_ansi(use_color)
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.resolve_config().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if cli.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let hypervisor = FirecrackerProcess::new(config.firecracker_bin.clone(), config.hypervisor_output);
    let result = Bootstrapper::new(config, hypervisor).run(shutdown).await;

    match result {
        Ok(status) => {
            info!(%status, "firecracker exited");
            Ok(())
        }
        Err(BootError::Interrupted) => {
            info!("interrupted");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            error!("Error: {:#}", anyhow::Error::from(e));
            std::process::exit(1);
        }
    }
}

/// Cancel `shutdown` on the first SIGTERM or SIGINT.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down VM"),
            _ = sigint.recv() => info!("received SIGINT, shutting down VM"),
        }
        shutdown.cancel();
    });
    Ok(())
}
