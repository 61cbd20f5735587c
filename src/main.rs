//! tts-coordinator: serializes spoken notifications from hook processes.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tts_hooks::config::Config;
use tts_hooks::speaker::api::{self, CoordinatorApiState};
use tts_hooks::speaker::queue::QueueCoordinator;
use tts_hooks::speaker::speech::CommandSpeaker;

#[derive(Parser, Debug)]
#[command(name = "tts-coordinator", about = "Playback coordinator for hook TTS notifications")]
struct Args {
    /// Path to config YAML
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port on 127.0.0.1 (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tts-coordinator starting");

    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.coordinator.port = port;
    }

    let coordinator =
        QueueCoordinator::new(Duration::from_secs(config.coordinator.max_playback_secs));
    let speaker = CommandSpeaker::new(&config.speech);
    info!(
        "Speech command: {} (max playback {}s)",
        config.speech.command, config.coordinator.max_playback_secs
    );

    let addr = format!("127.0.0.1:{}", config.coordinator.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let server = tokio::spawn(api::serve(
        listener,
        CoordinatorApiState {
            coordinator: coordinator.clone(),
        },
    ));

    // Ctrl-C → STOPPED
    tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    coordinator.shutdown();
                }
                Err(e) => warn!("Cannot listen for interrupt: {e}"),
            }
        }
    });

    coordinator.run(speaker).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Coordinator API error: {e}"),
        Err(e) => warn!("Coordinator API task failed: {e}"),
    }

    info!("tts-coordinator stopped");
    Ok(())
}
