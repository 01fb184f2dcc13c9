use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CAMERA_URI: &str = "stub://living_room";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FRAME_WIDTH: u32 = 500;
const DEFAULT_MIN_AREA: f64 = 500.0;
const DEFAULT_DELTA_THRESH: u8 = 5;
const DEFAULT_ALPHA: f64 = 0.1;
const DEFAULT_DILATE_ITERATIONS: u32 = 2;
const DEFAULT_KERNEL_SIZE: u32 = 21;
const DEFAULT_MIN_SAVE_SECS: u64 = 60;
const DEFAULT_MIN_NOTIFY_SECS: u64 = 180;
const DEFAULT_MIN_OCCUPIED_FRACTION: f64 = 0.6;
const DEFAULT_ROLLING_WINDOW: usize = 8;
const DEFAULT_FRAME_STORE: usize = 20;
const DEFAULT_MIN_PERSON_PROB: f64 = 0.5;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8799";
const DEFAULT_IMAGE_DIR: &str = "imgs";
const DEFAULT_TRAIN_DIR: &str = "train-data";

#[derive(Debug, Deserialize, Default)]
struct HomewatchConfigFile {
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
    alerts: Option<AlertConfigFile>,
    api: Option<ApiConfigFile>,
    storage: Option<StorageConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    uri: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    frame_width: Option<u32>,
    vflip: Option<bool>,
    hflip: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    min_area: Option<f64>,
    delta_thresh: Option<u8>,
    alpha: Option<f64>,
    dilate_iterations: Option<u32>,
    kernel_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    min_save_interval_seconds: Option<u64>,
    min_notify_interval_seconds: Option<u64>,
    min_occupied_fraction: Option<f64>,
    rolling_window_count: Option<usize>,
    frame_store_count: Option<usize>,
    min_person_prob: Option<f64>,
    signal: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    image_dir: Option<PathBuf>,
    train_dir: Option<PathBuf>,
}

/// Classification signal fed to the alert engine. One engine with
/// pluggable inputs instead of per-deployment forks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalMode {
    ContourOnly,
    ContourPlusPir,
    ContourPlusModelScore,
}

impl SignalMode {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "contour" => Ok(SignalMode::ContourOnly),
            "contour+pir" => Ok(SignalMode::ContourPlusPir),
            "contour+model" => Ok(SignalMode::ContourPlusModelScore),
            other => Err(anyhow!(
                "unknown alert signal '{}' (expected contour, contour+pir, or contour+model)",
                other
            )),
        }
    }
}

/// Full daemon configuration. Loaded once at startup; never hot-reloaded.
/// A missing or invalid threshold is fatal before capture begins.
#[derive(Debug, Clone)]
pub struct HomewatchConfig {
    pub camera: CameraSettings,
    pub motion: MotionSettings,
    pub alerts: AlertSettings,
    pub api_addr: String,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub uri: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Width frames are resized to before motion analysis.
    pub frame_width: u32,
    pub vflip: bool,
    pub hflip: bool,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    /// Minimum region area (pixels) for a region to count as motion.
    pub min_area: f64,
    /// Binary threshold applied to the frame/background delta.
    pub delta_thresh: u8,
    /// Background model smoothing factor.
    pub alpha: f64,
    pub dilate_iterations: u32,
    /// Box blur kernel size, must be odd.
    pub kernel_size: u32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub min_save_interval: Duration,
    pub min_notify_interval: Duration,
    pub min_occupied_fraction: f64,
    pub rolling_window_count: usize,
    pub frame_store_count: usize,
    pub min_person_prob: f64,
    pub signal: SignalMode,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub image_dir: PathBuf,
    pub train_dir: PathBuf,
}

impl HomewatchConfig {
    /// Load configuration from the file named by `HOMEWATCH_CONFIG` (if
    /// set), apply env overrides, and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HOMEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        Self::from_parts(file_cfg.unwrap_or_default())
    }

    /// Load from an explicit file path (daemon `--config` flag).
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_parts(read_config_file(path)?)
    }

    fn from_parts(file: HomewatchConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HomewatchConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let api = file.api.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();

        let signal = match alerts.signal.as_deref() {
            Some(value) => SignalMode::parse(value)?,
            None => SignalMode::ContourOnly,
        };

        Ok(Self {
            camera: CameraSettings {
                uri: camera.uri.unwrap_or_else(|| DEFAULT_CAMERA_URI.to_string()),
                fps: camera.fps.unwrap_or(DEFAULT_FPS),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                frame_width: camera.frame_width.unwrap_or(DEFAULT_FRAME_WIDTH),
                vflip: camera.vflip.unwrap_or(false),
                hflip: camera.hflip.unwrap_or(false),
            },
            motion: MotionSettings {
                min_area: motion.min_area.unwrap_or(DEFAULT_MIN_AREA),
                delta_thresh: motion.delta_thresh.unwrap_or(DEFAULT_DELTA_THRESH),
                alpha: motion.alpha.unwrap_or(DEFAULT_ALPHA),
                dilate_iterations: motion
                    .dilate_iterations
                    .unwrap_or(DEFAULT_DILATE_ITERATIONS),
                kernel_size: motion.kernel_size.unwrap_or(DEFAULT_KERNEL_SIZE),
            },
            alerts: AlertSettings {
                min_save_interval: Duration::from_secs(
                    alerts
                        .min_save_interval_seconds
                        .unwrap_or(DEFAULT_MIN_SAVE_SECS),
                ),
                min_notify_interval: Duration::from_secs(
                    alerts
                        .min_notify_interval_seconds
                        .unwrap_or(DEFAULT_MIN_NOTIFY_SECS),
                ),
                min_occupied_fraction: alerts
                    .min_occupied_fraction
                    .unwrap_or(DEFAULT_MIN_OCCUPIED_FRACTION),
                rolling_window_count: alerts
                    .rolling_window_count
                    .unwrap_or(DEFAULT_ROLLING_WINDOW),
                frame_store_count: alerts.frame_store_count.unwrap_or(DEFAULT_FRAME_STORE),
                min_person_prob: alerts.min_person_prob.unwrap_or(DEFAULT_MIN_PERSON_PROB),
                signal,
            },
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            storage: StorageSettings {
                image_dir: storage
                    .image_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
                train_dir: storage
                    .train_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TRAIN_DIR)),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("HOMEWATCH_CAMERA_URI") {
            if !uri.trim().is_empty() {
                self.camera.uri = uri;
            }
        }
        if let Ok(addr) = std::env::var("HOMEWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("HOMEWATCH_IMAGE_DIR") {
            if !dir.trim().is_empty() {
                self.storage.image_dir = PathBuf::from(dir);
            }
        }
        if let Ok(alpha) = std::env::var("HOMEWATCH_ALPHA") {
            self.motion.alpha = alpha
                .parse()
                .map_err(|_| anyhow!("HOMEWATCH_ALPHA must be a number in (0, 1]"))?;
        }
        if let Ok(secs) = std::env::var("HOMEWATCH_MIN_NOTIFY_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| anyhow!("HOMEWATCH_MIN_NOTIFY_SECS must be an integer"))?;
            self.alerts.min_notify_interval = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.camera.frame_width == 0 {
            return Err(anyhow!("frame_width must be greater than zero"));
        }
        if !(self.motion.alpha > 0.0 && self.motion.alpha <= 1.0) {
            return Err(anyhow!("alpha must be in (0, 1]"));
        }
        if self.motion.min_area < 0.0 {
            return Err(anyhow!("min_area must be non-negative"));
        }
        if self.motion.kernel_size == 0 || self.motion.kernel_size % 2 == 0 {
            return Err(anyhow!("kernel_size must be a positive odd number"));
        }
        if !(0.0..=1.0).contains(&self.alerts.min_occupied_fraction) {
            return Err(anyhow!("min_occupied_fraction must be in [0, 1]"));
        }
        if self.alerts.rolling_window_count == 0 {
            return Err(anyhow!("rolling_window_count must be at least 1"));
        }
        if self.alerts.frame_store_count == 0 {
            return Err(anyhow!("frame_store_count must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.alerts.min_person_prob) {
            return Err(anyhow!("min_person_prob must be in [0, 1]"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<HomewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = HomewatchConfig::from_parts(HomewatchConfigFile::default()).unwrap();
        assert_eq!(cfg.camera.uri, DEFAULT_CAMERA_URI);
        assert_eq!(cfg.alerts.signal, SignalMode::ContourOnly);
        assert_eq!(cfg.motion.kernel_size, 21);
    }

    #[test]
    fn even_kernel_rejected() {
        let file = HomewatchConfigFile {
            motion: Some(MotionConfigFile {
                kernel_size: Some(20),
                ..MotionConfigFile::default()
            }),
            ..HomewatchConfigFile::default()
        };
        assert!(HomewatchConfig::from_parts(file).is_err());
    }

    #[test]
    fn zero_alpha_rejected() {
        let file = HomewatchConfigFile {
            motion: Some(MotionConfigFile {
                alpha: Some(0.0),
                ..MotionConfigFile::default()
            }),
            ..HomewatchConfigFile::default()
        };
        assert!(HomewatchConfig::from_parts(file).is_err());
    }

    #[test]
    fn signal_mode_parses() {
        assert_eq!(
            SignalMode::parse("contour+pir").unwrap(),
            SignalMode::ContourPlusPir
        );
        assert!(SignalMode::parse("pir-only").is_err());
    }
}
