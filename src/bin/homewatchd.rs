//! homewatchd - home-monitoring camera daemon
//!
//! Wires the node together:
//! 1. Loads and validates configuration (fatal on error)
//! 2. Starts the background image writer and notification channel
//! 3. Starts the PIR sampler and the capture loop (idle until enabled)
//! 4. Serves the operator HTTP API: flag toggles, status, MJPEG stream
//! 5. Shuts everything down in order on SIGINT/SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use homewatch::api::{ApiServer, ApiState};
use homewatch::sensor::{PirState, SensorSampler, StubPresenceSensor};
use homewatch::{
    capture, control, AlertStats, CaptureDeps, ControlStore, FilesystemImageStore,
    FrameBroadcaster, HomewatchConfig, LogNotifier, Notifier, StoreWorker,
};

#[derive(Parser, Debug)]
#[command(name = "homewatchd", about = "Home-monitoring camera node")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "HOMEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Begin capturing immediately instead of waiting for POST /camera/on.
    #[arg(long)]
    start: bool,

    /// Webhook endpoint for notifications (requires the notify-webhook
    /// feature; ignored otherwise).
    #[arg(long, env = "HOMEWATCH_WEBHOOK")]
    webhook: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => HomewatchConfig::load_from(path)?,
        None => HomewatchConfig::load()?,
    };
    log::info!(
        "homewatchd {} starting, camera {}",
        env!("CARGO_PKG_VERSION"),
        config.camera.uri
    );

    let control = ControlStore::with_defaults();
    if args.start {
        control.set_flag(control::CAPTURE_ENABLED, true);
    }

    let notifier = build_notifier(args.webhook.as_deref());
    let store = Arc::new(FilesystemImageStore::new(
        config.storage.image_dir.clone(),
        config.storage.train_dir.clone(),
    ));
    let (sink, store_worker) = StoreWorker::spawn(store, notifier.clone());

    let pir = Arc::new(PirState::default());
    let sampler = SensorSampler::spawn(
        Box::new(StubPresenceSensor::new(Arc::new(AtomicBool::new(false)))),
        pir.clone(),
        control.clone(),
    )
    .context("spawn sensor sampler")?;

    let broadcaster = FrameBroadcaster::new();
    let alert_stats = Arc::new(AlertStats::default());
    let capture_handle = capture::spawn(CaptureDeps {
        config: config.clone(),
        control: control.clone(),
        broadcaster: broadcaster.clone(),
        sink: sink.clone(),
        pir,
        alert_stats: alert_stats.clone(),
        idle_poll: None,
    })?;

    let api_handle = ApiServer::new(
        config.api_addr.clone(),
        ApiState {
            control,
            broadcaster,
            capture_stats: capture_handle.stats().clone(),
            alert_stats,
        },
    )
    .spawn()?;

    if let Err(e) = notifier.post("homewatch online") {
        log::warn!("startup notification failed: {:#}", e);
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("install signal handler")?;
    shutdown_rx.recv().ok();

    log::info!("shutting down");
    if let Err(e) = api_handle.stop() {
        log::warn!("api shutdown: {:#}", e);
    }
    capture_handle.stop();
    sampler.stop();
    drop(sink);
    store_worker.stop();
    if let Err(e) = notifier.post("homewatch offline") {
        log::warn!("shutdown notification failed: {:#}", e);
    }
    Ok(())
}

#[cfg(feature = "notify-webhook")]
fn build_notifier(webhook: Option<&str>) -> Arc<dyn Notifier> {
    match webhook {
        Some(endpoint) => Arc::new(homewatch::notify::WebhookNotifier::new(endpoint.to_string())),
        None => Arc::new(LogNotifier),
    }
}

#[cfg(not(feature = "notify-webhook"))]
fn build_notifier(webhook: Option<&str>) -> Arc<dyn Notifier> {
    if webhook.is_some() {
        log::warn!("--webhook given but the notify-webhook feature is not enabled");
    }
    Arc::new(LogNotifier)
}
