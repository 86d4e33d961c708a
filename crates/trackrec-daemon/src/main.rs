mod capture;
mod mpris;
mod recorder;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use trackrec_core::config::Config;
use trackrec_core::dedupe::DedupeIndex;
use trackrec_core::platform;
use trackrec_core::status::StatusPublisher;

use capture::FfmpegCapture;
use mpris::{MprisPlayer, PlayerError};
use recorder::RecorderCore;

/// Exit status when no MPRIS player is present on the session bus.
const EXIT_NO_PLAYER: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup file logging
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,trackrec_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let player = match MprisPlayer::connect(config.player.preferred.as_deref()).await {
        Ok(player) => player,
        Err(PlayerError::NoPlayer) => {
            error!("No MPRIS player found on the session bus");
            eprintln!("No MPRIS player found on the session bus.");
            std::process::exit(EXIT_NO_PLAYER);
        }
        Err(e) => return Err(e.into()),
    };

    // The output dir must exist up front so the dedupe index can live there.
    tokio::fs::create_dir_all(&config.output.dir)
        .await
        .with_context(|| format!("creating output dir {:?}", config.output.dir))?;

    let capture = FfmpegCapture::new(&config.capture, config.output.dir.clone())?;
    let index = DedupeIndex::load(&config.output.dir);
    let publisher = StatusPublisher::new(platform::status_file());

    let mut core = RecorderCore::new(
        capture,
        player.clone(),
        index,
        publisher,
        config.capture.dedupe,
    );

    // All bus notifications funnel into one channel; the loop below is the
    // only consumer, so events are applied strictly in order.
    let (event_tx, mut event_rx) = mpsc::channel(64);
    tokio::spawn(mpris::pump_events(player, event_tx));

    core.prime().await;

    info!("Recorder initialised, running event loop");

    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => core.handle(event).await,
                None => {
                    warn!("Notification stream closed, shutting down");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    core.shutdown().await;
    info!("Recorder shutdown complete");
    Ok(())
}
