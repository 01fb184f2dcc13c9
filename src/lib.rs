//! homewatch: a home-monitoring camera node.
//!
//! Captures frames from an image sensor, detects motion against a
//! learned background model, and decides when to persist images and
//! raise notifications, while broadcasting the live stream to any number
//! of viewers.
//!
//! Layout, leaves first:
//! - `vision`: pure pixel operations (grayscale, blur, diff, regions, JPEG)
//! - `frame`: frame containers and the bounded session buffers
//! - `config`: startup configuration, validated once
//! - `ingest`: camera sources (`stub://` synthetic backend built in)
//! - `motion`: the per-session background-subtraction pipeline
//! - `broadcast`: at-most-once frame fan-out to viewers
//! - `alert`: the throttled save/notify state machine
//! - `capture`: the single producer thread tying it together
//! - `control`: shared operator flags
//! - `storage` / `notify` / `sensor`: persistence, notification, and PIR
//!   collaborators, each behind a trait
//! - `api`: the operator HTTP layer (flags, status, MJPEG stream)

pub mod alert;
pub mod api;
pub mod broadcast;
pub mod capture;
pub mod config;
pub mod control;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod notify;
pub mod sensor;
pub mod storage;
pub mod vision;

pub use alert::{AlertEngine, AlertSink, AlertStats, SensorInputs};
pub use broadcast::{Consumer, EncodedFrame, FrameBroadcaster};
pub use capture::{CaptureDeps, CaptureHandle, CaptureStats};
pub use config::{HomewatchConfig, SignalMode};
pub use control::ControlStore;
pub use frame::{Frame, FrameHistoryBuffer, GrayFrame, HistoryRecord, RollingOccupancyWindow};
pub use ingest::CameraSource;
pub use motion::{MotionObservation, MotionPipeline};
pub use notify::{LogNotifier, Notifier};
pub use storage::{FilesystemImageStore, ImageStore, InMemoryImageStore, StoreHandle, StoreWorker};
pub use vision::MotionRegion;
