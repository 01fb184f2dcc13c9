//! Alert engine: turns per-frame motion observations into throttled side
//! effects.
//!
//! State is per capture session: a rolling occupancy window, a bounded
//! frame history, and two independent throttle clocks (saves and
//! notifications). Throttling gates side effects only; the window and
//! history are updated on every observation regardless.
//!
//! Side effects go through `AlertSink`, which is fire-and-forget: the
//! engine runs on the producer thread and must never stall frame
//! acquisition, so the sink hands work to a background writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::config::{AlertSettings, SignalMode};
use crate::control::{self, ControlStore};
use crate::frame::{FrameHistoryBuffer, HistoryRecord, RollingOccupancyWindow};
use crate::motion::MotionObservation;
use crate::vision;

/// Auxiliary per-frame inputs from collaborators outside the frame path.
#[derive(Clone, Copy, Debug, Default)]
pub struct SensorInputs {
    /// Latest passive-infrared reading, if a PIR sensor is wired in.
    pub pir: Option<bool>,
    /// Person probability from an external detector, if one is attached.
    pub person_prob: Option<f64>,
}

/// Destination for the engine's side effects. Implementations must not
/// block; slow I/O belongs on a worker thread behind this trait.
pub trait AlertSink: Send {
    fn save_frame(&mut self, name: &str, jpeg: Vec<u8>);
    /// Persist a labeled frame series as a training sample.
    fn save_series(&mut self, label: &str, records: Vec<HistoryRecord>);
    fn notify(&mut self, name: &str, jpeg: Vec<u8>);
}

/// Counters and timestamps surfaced through the status endpoint.
#[derive(Default)]
pub struct AlertStats {
    pub saves: AtomicU64,
    pub notifies: AtomicU64,
    pub last_save_unix_ms: AtomicU64,
    pub last_notify_unix_ms: AtomicU64,
}

/// Per-session alert state machine.
pub struct AlertEngine {
    settings: AlertSettings,
    control: ControlStore,
    window: RollingOccupancyWindow,
    history: FrameHistoryBuffer,
    last_save_at: Option<Instant>,
    last_notify_at: Option<Instant>,
    /// Monotonic per-engine counter folded into filenames, so two saves
    /// in the same millisecond never overwrite each other.
    sequence: u64,
    stats: Arc<AlertStats>,
}

impl AlertEngine {
    pub fn new(settings: AlertSettings, control: ControlStore, stats: Arc<AlertStats>) -> Self {
        let window = RollingOccupancyWindow::new(settings.rolling_window_count);
        let history = FrameHistoryBuffer::new(settings.frame_store_count);
        Self {
            settings,
            control,
            window,
            history,
            last_save_at: None,
            last_notify_at: None,
            sequence: 0,
            stats,
        }
    }

    /// Reset session state when the capture loop (re)enters Running.
    /// The first save of a session is allowed immediately; the notify
    /// clock starts now, so a camera coming online gets a warm-up grace
    /// of one notify interval before it can page anyone.
    pub fn start_session(&mut self, now: Instant) {
        self.window.clear();
        self.history.clear();
        self.last_save_at = None;
        self.last_notify_at = Some(now);
    }

    /// Consume one observation. Runs on the producer thread; everything
    /// slow is pushed into the sink.
    pub fn on_observation(
        &mut self,
        obs: &MotionObservation,
        inputs: SensorInputs,
        sink: &mut dyn AlertSink,
    ) {
        let now = obs.at;
        let occupied = self.classify(obs, inputs);

        self.window.push(occupied);
        self.history.push(HistoryRecord {
            frame: obs.frame.clone(),
            occupied,
            timestamp: obs.timestamp,
        });
        let fraction = self.window.fraction();

        if self.save_due(now) && self.control.flag(control::SAVING_ENABLED) {
            match vision::encode_jpeg_gray(&obs.frame) {
                Ok(jpeg) => {
                    self.sequence += 1;
                    let name = frame_name(obs.timestamp, self.sequence, occupied);
                    sink.save_frame(&name, jpeg);
                    self.last_save_at = Some(now);
                    self.stats.saves.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .last_save_unix_ms
                        .store(unix_ms(obs.timestamp), Ordering::Relaxed);
                    if !occupied && self.control.flag(control::TRAINING_ENABLED) {
                        sink.save_series("unoccupied", self.history.snapshot());
                    }
                }
                Err(e) => log::warn!("AlertEngine: frame encode failed, save skipped: {:#}", e),
            }
        }

        let notify_ready = self.control.flag(control::NOTIFICATIONS_ENABLED)
            && self.notify_due(now)
            && fraction >= self.settings.min_occupied_fraction;
        if notify_ready {
            match vision::encode_jpeg_gray(&obs.frame) {
                Ok(jpeg) => {
                    self.sequence += 1;
                    let name = alert_name(obs.timestamp, self.sequence);
                    sink.save_frame(&name, jpeg.clone());
                    sink.notify(&name, jpeg);
                    self.last_notify_at = Some(now);
                    self.stats.notifies.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .last_notify_unix_ms
                        .store(unix_ms(obs.timestamp), Ordering::Relaxed);
                    log::info!(
                        "AlertEngine: notified, occupied fraction {:.2} over {} frames",
                        fraction,
                        self.window.len()
                    );
                    if self.control.flag(control::TRAINING_ENABLED) {
                        sink.save_series("occupied", self.history.snapshot());
                    }
                }
                Err(e) => {
                    log::warn!("AlertEngine: frame encode failed, notify skipped: {:#}", e)
                }
            }
        }
    }

    /// Fuse the contour classification with auxiliary inputs according to
    /// the configured signal mode.
    fn classify(&self, obs: &MotionObservation, inputs: SensorInputs) -> bool {
        match self.settings.signal {
            SignalMode::ContourOnly => obs.occupied,
            SignalMode::ContourPlusPir => {
                // PIR can promote sub-threshold motion but never fires on
                // a frame with no contour evidence at all.
                obs.occupied || (inputs.pir == Some(true) && !obs.regions.is_empty())
            }
            SignalMode::ContourPlusModelScore => match inputs.person_prob {
                Some(prob) => obs.occupied && prob >= self.settings.min_person_prob,
                None => obs.occupied,
            },
        }
    }

    fn save_due(&self, now: Instant) -> bool {
        match self.last_save_at {
            Some(last) => now.duration_since(last) >= self.settings.min_save_interval,
            None => true,
        }
    }

    fn notify_due(&self, now: Instant) -> bool {
        match self.last_notify_at {
            Some(last) => now.duration_since(last) >= self.settings.min_notify_interval,
            None => true,
        }
    }
}

fn unix_ms(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn frame_name(ts: SystemTime, sequence: u64, occupied: bool) -> String {
    let label = if occupied { "occupied" } else { "clear" };
    format!("frame-{}-{:06}-{}.jpg", unix_ms(ts), sequence, label)
}

fn alert_name(ts: SystemTime, sequence: u64) -> String {
    format!("alert-{}-{:06}.jpg", unix_ms(ts), sequence)
}
