use std::path::Path;
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use birdwatcher::metrics::Metrics;
use birdwatcher::metrics_server::MetricsServer;
use birdwatcher::supervisor::Supervisor;
use birdwatcher::{config, signals};

#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("birdwatcher")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Health-check supervisor for BIRD route advertisements")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("/etc/birdwatcher.conf")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Increase logging verbosity"),
        )
        .get_matches();

    let level = match matches.get_count("verbose") {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config_path = matches
        .get_one::<String>("config")
        .expect("config has a default");

    let config = match config::load(Path::new(config_path)) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, path = %config_path, "could not load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        services = config.services.len(),
        path = %config_path,
        "configuration loaded"
    );

    if config.prometheus.enabled {
        match Metrics::init() {
            Ok(()) => {
                MetricsServer::start(config.prometheus.port, config.prometheus.path.clone());
            }
            Err(err) => error!(error = %err, "could not register metrics"),
        }
    }

    let shutdown = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (status_tx, mut status_rx) = mpsc::channel(32);

    let mut supervisor = Supervisor::new(&config);
    let supervisor_token = shutdown.clone();
    let supervisor_task =
        tokio::spawn(async move { supervisor.run(ready_tx, status_tx, supervisor_token).await });

    // An init-system integration would forward these to the service
    // manager; standalone we just log them.
    tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            info!(%status, "status update");
        }
    });

    if ready_rx.await.is_ok() {
        info!("all service checks started");
    }

    if let Err(err) = signals::wait_for_shutdown_signal().await {
        error!(error = %err, "could not wait for signals");
    }

    info!("shutting down");
    shutdown.cancel();
    let _ = supervisor_task.await;

    ExitCode::SUCCESS
}
