//! Image persistence and the background writer.
//!
//! `ImageStore` is the persistence seam: a filesystem implementation for
//! the daemon and an in-memory one for tests. The alert engine never
//! calls a store directly; it hands work to a `StoreHandle`, whose jobs
//! drain through a single worker thread. One worker means a slow disk or
//! a slow notification never delays frame capture, while jobs for any
//! given image still execute in the order they were queued.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::alert::AlertSink;
use crate::frame::HistoryRecord;
use crate::notify::Notifier;
use crate::vision;

/// A pre-encoded member of a saved series.
pub struct SeriesFrame {
    pub name: String,
    pub jpeg: Vec<u8>,
}

/// Persistence backend for alert images.
pub trait ImageStore: Send + Sync {
    /// Persist one image under the store's image root. Returns the final
    /// location for logging.
    fn save(&self, name: &str, jpeg: &[u8]) -> Result<PathBuf>;

    /// Persist a labeled series under the store's training root, in one
    /// folder per call.
    fn save_series(&self, folder: &str, frames: &[SeriesFrame]) -> Result<PathBuf>;
}

/// Writes images under `image_dir` and training series under `train_dir`.
/// Directories are created on demand.
pub struct FilesystemImageStore {
    image_dir: PathBuf,
    train_dir: PathBuf,
}

impl FilesystemImageStore {
    pub fn new(image_dir: PathBuf, train_dir: PathBuf) -> Self {
        Self {
            image_dir,
            train_dir,
        }
    }
}

impl ImageStore for FilesystemImageStore {
    fn save(&self, name: &str, jpeg: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.image_dir)
            .with_context(|| format!("create image dir {}", self.image_dir.display()))?;
        let path = self.image_dir.join(name);
        std::fs::write(&path, jpeg).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn save_series(&self, folder: &str, frames: &[SeriesFrame]) -> Result<PathBuf> {
        let dir = self.train_dir.join(folder);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create series dir {}", dir.display()))?;
        for frame in frames {
            let path = dir.join(&frame.name);
            std::fs::write(&path, &frame.jpeg)
                .with_context(|| format!("write {}", path.display()))?;
        }
        Ok(dir)
    }
}

/// Test double that records what was saved without touching disk.
#[derive(Default)]
pub struct InMemoryImageStore {
    saved: std::sync::Mutex<Vec<String>>,
    series: std::sync::Mutex<Vec<(String, usize)>>,
}

impl InMemoryImageStore {
    pub fn saved_names(&self) -> Vec<String> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn series_saved(&self) -> Vec<(String, usize)> {
        self.series
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ImageStore for InMemoryImageStore {
    fn save(&self, name: &str, _jpeg: &[u8]) -> Result<PathBuf> {
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
        Ok(Path::new("mem").join(name))
    }

    fn save_series(&self, folder: &str, frames: &[SeriesFrame]) -> Result<PathBuf> {
        self.series
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((folder.to_string(), frames.len()));
        Ok(Path::new("mem").join(folder))
    }
}

enum StoreJob {
    SaveFrame { name: String, jpeg: Vec<u8> },
    SaveSeries { label: String, records: Vec<HistoryRecord> },
    Notify { name: String, jpeg: Vec<u8> },
}

/// Producer-side handle: queues jobs for the worker. Cloneable; the
/// worker exits once every handle is dropped.
#[derive(Clone)]
pub struct StoreHandle {
    tx: Sender<StoreJob>,
}

impl AlertSink for StoreHandle {
    fn save_frame(&mut self, name: &str, jpeg: Vec<u8>) {
        self.send(StoreJob::SaveFrame {
            name: name.to_string(),
            jpeg,
        });
    }

    fn save_series(&mut self, label: &str, records: Vec<HistoryRecord>) {
        self.send(StoreJob::SaveSeries {
            label: label.to_string(),
            records,
        });
    }

    fn notify(&mut self, name: &str, jpeg: Vec<u8>) {
        self.send(StoreJob::Notify {
            name: name.to_string(),
            jpeg,
        });
    }
}

impl StoreHandle {
    fn send(&self, job: StoreJob) {
        if self.tx.send(job).is_err() {
            log::warn!("StoreWorker: job dropped, worker is gone");
        }
    }
}

/// The background writer thread.
pub struct StoreWorker {
    join: Option<JoinHandle<()>>,
}

impl StoreWorker {
    /// Spawn the worker. Returns the queueing handle and the worker
    /// itself; call `stop` (after dropping all handles) to join it.
    pub fn spawn(store: Arc<dyn ImageStore>, notifier: Arc<dyn Notifier>) -> (StoreHandle, Self) {
        let (tx, rx) = mpsc::channel();
        let join = thread::Builder::new()
            .name("store-worker".to_string())
            .spawn(move || run_worker(rx, store, notifier))
            .ok();
        if join.is_none() {
            log::error!("StoreWorker: failed to spawn, persistence disabled");
        }
        (StoreHandle { tx }, Self { join })
    }

    /// Join the worker after the last `StoreHandle` is dropped.
    pub fn stop(mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::warn!("StoreWorker: worker thread panicked");
            }
        }
    }
}

fn run_worker(rx: Receiver<StoreJob>, store: Arc<dyn ImageStore>, notifier: Arc<dyn Notifier>) {
    while let Ok(job) = rx.recv() {
        match job {
            StoreJob::SaveFrame { name, jpeg } => match store.save(&name, &jpeg) {
                Ok(path) => log::debug!("StoreWorker: saved {}", path.display()),
                Err(e) => log::warn!("StoreWorker: save '{}' failed: {:#}", name, e),
            },
            StoreJob::SaveSeries { label, records } => {
                save_series_job(store.as_ref(), &label, &records)
            }
            StoreJob::Notify { name, jpeg } => {
                if let Err(e) = notifier.upload(&name, &jpeg) {
                    log::warn!("StoreWorker: notify '{}' failed: {:#}", name, e);
                }
            }
        }
    }
    log::debug!("StoreWorker: queue closed, exiting");
}

fn save_series_job(store: &dyn ImageStore, label: &str, records: &[HistoryRecord]) {
    let mut frames = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        match vision::encode_jpeg_gray(&record.frame) {
            Ok(jpeg) => frames.push(SeriesFrame {
                name: format!(
                    "{:03}-{}.jpg",
                    i,
                    if record.occupied { "occupied" } else { "clear" }
                ),
                jpeg,
            }),
            Err(e) => log::warn!("StoreWorker: series frame {} encode failed: {:#}", i, e),
        }
    }
    let folder = format!("{}-{}", label, now_ms());
    match store.save_series(&folder, &frames) {
        Ok(path) => log::info!(
            "StoreWorker: saved {} training frames to {}",
            frames.len(),
            path.display()
        ),
        Err(e) => log::warn!("StoreWorker: series '{}' failed: {:#}", folder, e),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::GrayFrame;
    use crate::notify::testing::RecordingNotifier;

    #[test]
    fn filesystem_store_writes_under_roots() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = FilesystemImageStore::new(tmp.path().join("imgs"), tmp.path().join("train"));

        let path = store.save("frame-1.jpg", &[0xFF, 0xD8])?;
        assert!(path.exists());
        assert!(path.starts_with(tmp.path().join("imgs")));

        let dir = store.save_series(
            "occupied-123",
            &[SeriesFrame {
                name: "000-occupied.jpg".to_string(),
                jpeg: vec![0xFF, 0xD8],
            }],
        )?;
        assert!(dir.join("000-occupied.jpg").exists());
        assert!(dir.starts_with(tmp.path().join("train")));
        Ok(())
    }

    #[test]
    fn worker_drains_jobs_in_order() {
        let store = Arc::new(InMemoryImageStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (mut handle, worker) = StoreWorker::spawn(store.clone(), notifier.clone());

        handle.save_frame("a.jpg", vec![1]);
        handle.save_frame("b.jpg", vec![2]);
        handle.notify("alert.jpg", vec![3]);
        drop(handle);
        worker.stop();

        assert_eq!(store.saved_names(), vec!["a.jpg", "b.jpg"]);
        assert_eq!(notifier.uploads.lock().unwrap().as_slice(), ["alert.jpg"]);
    }

    #[test]
    fn worker_encodes_series_records() {
        let store = Arc::new(InMemoryImageStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (mut handle, worker) = StoreWorker::spawn(store.clone(), notifier);

        let records = vec![
            HistoryRecord {
                frame: GrayFrame::blank(8, 8),
                occupied: false,
                timestamp: SystemTime::UNIX_EPOCH,
            },
            HistoryRecord {
                frame: GrayFrame::blank(8, 8),
                occupied: true,
                timestamp: SystemTime::UNIX_EPOCH,
            },
        ];
        handle.save_series("occupied", records);
        drop(handle);
        worker.stop();

        let series = store.series_saved();
        assert_eq!(series.len(), 1);
        assert!(series[0].0.starts_with("occupied-"));
        assert_eq!(series[0].1, 2);
    }
}
