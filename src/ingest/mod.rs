//! Camera frame sources.
//!
//! `CameraSource` is the single entry point the capture loop uses to pull
//! frames. The backend is selected by URI scheme: `stub://` yields a
//! deterministic synthetic scene for tests and bench rigs; anything else
//! is a real-device integration point and is rejected until one is wired
//! in.
//!
//! A source is opened per capture session and closed when the session
//! ends, releasing the device for other processes.

mod synthetic;

use anyhow::{bail, Result};

use crate::config::CameraSettings;
use crate::frame::Frame;
use synthetic::SyntheticSource;

/// Camera frame source with a URI-selected backend.
pub struct CameraSource {
    backend: Backend,
}

enum Backend {
    Synthetic(SyntheticSource),
}

impl CameraSource {
    /// Open the camera named by the configured URI. Failure here means the
    /// device is absent or busy; the caller decides whether to retry.
    pub fn open(settings: &CameraSettings) -> Result<Self> {
        if settings.uri.starts_with("stub://") {
            let source = SyntheticSource::open(settings)?;
            log::info!("CameraSource: opened {} (synthetic)", settings.uri);
            return Ok(Self {
                backend: Backend::Synthetic(source),
            });
        }
        bail!(
            "no backend for camera uri '{}' (only stub:// is built in)",
            settings.uri
        )
    }

    /// Capture the next frame, blocking for up to one frame interval.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            Backend::Synthetic(source) => source.next_frame(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            Backend::Synthetic(source) => source.stats(),
        }
    }

    /// Release the device. Consumes the source so a closed camera cannot
    /// be polled again.
    pub fn close(self) {
        match self.backend {
            Backend::Synthetic(source) => source.close(),
        }
    }
}

/// Counters exposed through the status endpoint.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraSettings;

    fn stub_settings() -> CameraSettings {
        CameraSettings {
            uri: "stub://test".to_string(),
            fps: 10,
            width: 64,
            height: 48,
            frame_width: 64,
            vflip: false,
            hflip: false,
        }
    }

    #[test]
    fn stub_uri_opens_synthetic_backend() -> Result<()> {
        let mut source = CameraSource::open(&stub_settings())?;
        let frame = source.next_frame()?;
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn unknown_uri_is_rejected() {
        let mut settings = stub_settings();
        settings.uri = "rtsp://10.0.0.4/stream".to_string();
        assert!(CameraSource::open(&settings).is_err());
    }
}
