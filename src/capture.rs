//! The capture loop: the single producer thread.
//!
//! Idle until the capture control flag goes on, then run a session:
//! open the camera, build a fresh motion pipeline, and pump frames
//! through motion analysis, broadcast, and the alert engine until the
//! flag goes off or the sensor fails. The flag is checked at least once
//! per frame while running; the camera is released before the loop will
//! honor another start.
//!
//! Only one capture loop may exist per process. A second spawn request
//! returns the running instance instead of opening the sensor twice.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::alert::{AlertEngine, AlertStats, SensorInputs};
use crate::broadcast::FrameBroadcaster;
use crate::config::HomewatchConfig;
use crate::control::{self, ControlStore};
use crate::ingest::CameraSource;
use crate::motion::MotionPipeline;
use crate::sensor::PirState;
use crate::storage::StoreHandle;
use crate::vision;

/// How often the idle loop re-reads the capture flag.
const DEFAULT_IDLE_POLL: Duration = Duration::from_secs(2);
/// Slice used for interruptible sleeps, so shutdown is prompt.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

static ACTIVE: Mutex<Weak<CaptureHandle>> = Mutex::new(Weak::new());

/// Counters surfaced through the status endpoint.
#[derive(Default)]
pub struct CaptureStats {
    pub running: AtomicBool,
    pub sessions: AtomicU64,
    pub frames: AtomicU64,
}

/// Everything the loop needs, wired once at startup.
pub struct CaptureDeps {
    pub config: HomewatchConfig,
    pub control: ControlStore,
    pub broadcaster: FrameBroadcaster,
    pub sink: StoreHandle,
    pub pir: Arc<PirState>,
    pub alert_stats: Arc<AlertStats>,
    /// Idle-poll override for tests; `None` keeps the 2s default.
    pub idle_poll: Option<Duration>,
}

/// Handle to the running loop. Dropping it does not stop the thread;
/// call `stop`.
pub struct CaptureHandle {
    shutdown: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<CaptureStats>,
}

impl CaptureHandle {
    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    /// Signal the thread and wait for it to release the sensor and exit.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let join = self
            .join
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(join) = join {
            if join.join().is_err() {
                log::warn!("CaptureLoop: capture thread panicked");
            }
        }
    }
}

/// Spawn the capture loop, or return the already-running instance.
pub fn spawn(deps: CaptureDeps) -> Result<Arc<CaptureHandle>> {
    let mut active = ACTIVE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = active.upgrade() {
        log::warn!("CaptureLoop: already running, reusing existing instance");
        return Ok(existing);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(CaptureStats::default());
    let thread_shutdown = shutdown.clone();
    let thread_stats = stats.clone();
    let join = thread::Builder::new()
        .name("capture-loop".to_string())
        .spawn(move || run_loop(deps, thread_shutdown, thread_stats))?;

    let handle = Arc::new(CaptureHandle {
        shutdown,
        join: Mutex::new(Some(join)),
        stats,
    });
    *active = Arc::downgrade(&handle);
    Ok(handle)
}

fn run_loop(deps: CaptureDeps, shutdown: Arc<AtomicBool>, stats: Arc<CaptureStats>) {
    let idle_poll = deps.idle_poll.unwrap_or(DEFAULT_IDLE_POLL);
    let mut engine = AlertEngine::new(
        deps.config.alerts.clone(),
        deps.control.clone(),
        deps.alert_stats.clone(),
    );
    let mut sink = deps.sink.clone();

    log::info!("CaptureLoop: idle, waiting for capture flag");
    while !shutdown.load(Ordering::Relaxed) {
        if !deps.control.flag(control::CAPTURE_ENABLED) {
            sleep_interruptible(idle_poll, &shutdown);
            continue;
        }
        run_session(&deps, &shutdown, &stats, &mut engine, &mut sink);
    }
    log::info!("CaptureLoop: shut down");
}

fn run_session(
    deps: &CaptureDeps,
    shutdown: &AtomicBool,
    stats: &CaptureStats,
    engine: &mut AlertEngine,
    sink: &mut StoreHandle,
) {
    let mut source = match CameraSource::open(&deps.config.camera) {
        Ok(source) => source,
        Err(e) => {
            log::error!("CaptureLoop: camera open failed: {:#}", e);
            // Retry on the next flag-on transition, not immediately.
            wait_for_flag_off(deps, shutdown);
            return;
        }
    };

    stats.sessions.fetch_add(1, Ordering::Relaxed);
    stats.running.store(true, Ordering::Relaxed);
    log::info!(
        "CaptureLoop: session {} started on {}",
        stats.sessions.load(Ordering::Relaxed),
        deps.config.camera.uri
    );

    // Fresh background model every session: resuming never reuses the
    // previous session's history.
    let mut pipeline = MotionPipeline::new(
        deps.config.motion.clone(),
        deps.config.camera.frame_width,
    );
    engine.start_session(Instant::now());

    let frame_interval = Duration::from_secs(1) / deps.config.camera.fps.max(1);
    while !shutdown.load(Ordering::Relaxed) && deps.control.flag(control::CAPTURE_ENABLED) {
        let started = Instant::now();
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("CaptureLoop: frame capture failed, ending session: {:#}", e);
                break;
            }
        };
        stats.frames.fetch_add(1, Ordering::Relaxed);

        // The seed frame yields no observation and nothing is published.
        if let Some(obs) = pipeline.process(&frame) {
            match vision::encode_jpeg_gray(&obs.diagnostic) {
                Ok(jpeg) => deps.broadcaster.publish(jpeg, obs.timestamp),
                Err(e) => log::warn!("CaptureLoop: diagnostic encode failed: {:#}", e),
            }
            let inputs = SensorInputs {
                pir: deps.pir.latest(),
                person_prob: None,
            };
            engine.on_observation(&obs, inputs, sink);
        }

        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }

    source.close();
    stats.running.store(false, Ordering::Relaxed);
    log::info!("CaptureLoop: session ended, sensor released");
}

fn wait_for_flag_off(deps: &CaptureDeps, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) && deps.control.flag(control::CAPTURE_ENABLED) {
        thread::sleep(SLEEP_SLICE);
    }
}

fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        match deadline.checked_duration_since(Instant::now()) {
            Some(remaining) => thread::sleep(remaining.min(SLEEP_SLICE)),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::storage::{InMemoryImageStore, StoreWorker};

    fn test_deps(control: ControlStore, broadcaster: FrameBroadcaster) -> (CaptureDeps, StoreWorker) {
        let mut config = crate::config::HomewatchConfig::load().unwrap();
        config.camera.uri = "stub://bench".to_string();
        config.camera.width = 64;
        config.camera.height = 48;
        config.camera.frame_width = 64;
        config.camera.fps = 50;
        let (sink, worker) = StoreWorker::spawn(
            Arc::new(InMemoryImageStore::default()),
            Arc::new(LogNotifier),
        );
        (
            CaptureDeps {
                config,
                control,
                broadcaster,
                sink,
                pir: Arc::new(PirState::default()),
                alert_stats: Arc::new(AlertStats::default()),
                idle_poll: Some(Duration::from_millis(20)),
            },
            worker,
        )
    }

    #[test]
    fn second_spawn_reuses_running_instance() {
        let control = ControlStore::with_defaults();
        let broadcaster = FrameBroadcaster::new();
        let (deps_a, worker_a) = test_deps(control.clone(), broadcaster.clone());
        let (deps_b, worker_b) = test_deps(control, broadcaster);

        let first = spawn(deps_a).unwrap();
        let second = spawn(deps_b).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.stop();
        worker_a.stop();
        worker_b.stop();
    }
}
