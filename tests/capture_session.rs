//! End-to-end capture loop sessions against the synthetic camera:
//! start, stop, restart, and the per-session model re-seed.

use std::sync::Arc;
use std::time::Duration;

use homewatch::notify::LogNotifier;
use homewatch::sensor::PirState;
use homewatch::{
    capture, control, AlertStats, CaptureDeps, ControlStore, FrameBroadcaster, HomewatchConfig,
    InMemoryImageStore, StoreWorker,
};

fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    false
}

fn bench_config() -> HomewatchConfig {
    let mut config = HomewatchConfig::load().expect("default config");
    config.camera.uri = "stub://bench".to_string();
    config.camera.width = 64;
    config.camera.height = 48;
    config.camera.frame_width = 64;
    config.camera.fps = 100;
    config
}

#[test]
fn restart_reseeds_background_model() {
    let control = ControlStore::with_defaults();
    let broadcaster = FrameBroadcaster::new();
    let (sink, worker) = StoreWorker::spawn(
        Arc::new(InMemoryImageStore::default()),
        Arc::new(LogNotifier),
    );

    let handle = capture::spawn(CaptureDeps {
        config: bench_config(),
        control: control.clone(),
        broadcaster: broadcaster.clone(),
        sink,
        pir: Arc::new(PirState::default()),
        alert_stats: Arc::new(AlertStats::default()),
        idle_poll: Some(Duration::from_millis(20)),
    })
    .expect("spawn capture loop");
    let stats = handle.stats().clone();

    // Idle until the flag goes on.
    assert!(!stats.running.load(std::sync::atomic::Ordering::Relaxed));

    // First session: frames start flowing to the broadcaster.
    control.set_flag(control::CAPTURE_ENABLED, true);
    assert!(wait_until(|| broadcaster.latest().is_some()));
    let first_session_seq = broadcaster.latest().unwrap().seq;

    // Stop mid-session: the loop must notice within a frame interval,
    // release the sensor, and go idle.
    control.set_flag(control::CAPTURE_ENABLED, false);
    assert!(wait_until(|| !stats
        .running
        .load(std::sync::atomic::Ordering::Relaxed)));
    let seq_at_stop = broadcaster.latest().unwrap().seq;
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        broadcaster.latest().unwrap().seq,
        seq_at_stop,
        "no frames published while idle"
    );

    // Restart: a second session begins and publishing resumes.
    control.set_flag(control::CAPTURE_ENABLED, true);
    assert!(wait_until(|| broadcaster
        .latest()
        .map(|f| f.seq > seq_at_stop)
        .unwrap_or(false)));
    assert!(first_session_seq <= seq_at_stop);

    control.set_flag(control::CAPTURE_ENABLED, false);
    assert!(wait_until(|| !stats
        .running
        .load(std::sync::atomic::Ordering::Relaxed)));
    handle.stop();
    worker.stop();

    let sessions = stats.sessions.load(std::sync::atomic::Ordering::Relaxed);
    let frames = stats.frames.load(std::sync::atomic::Ordering::Relaxed);
    let published = broadcaster.latest().unwrap().seq;
    assert_eq!(sessions, 2);
    // Each session's first frame seeds the model and is never published,
    // so the capture count exceeds the publish count by one per session.
    assert_eq!(frames, published + sessions);
}
