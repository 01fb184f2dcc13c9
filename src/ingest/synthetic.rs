//! Synthetic camera backend for `stub://` URIs.
//!
//! Produces a static indoor scene with low-level sensor noise and a
//! periodic "intruder": a bright block that sweeps across the frame for a
//! stretch of frames, then leaves. Deterministic enough for tests (the
//! intruder schedule is fixed by frame count), noisy enough to exercise
//! the blur stage.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::SystemTime;

use crate::config::CameraSettings;
use crate::frame::Frame;
use crate::ingest::SourceStats;
use crate::vision;

/// Frames per intruder cycle: quiet stretch, then the intruder walks.
const CYCLE_FRAMES: u64 = 100;
const INTRUDER_ENTERS_AT: u64 = 60;
const NOISE_AMPLITUDE: u8 = 3;

pub(crate) struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    vflip: bool,
    hflip: bool,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub(crate) fn open(settings: &CameraSettings) -> Result<Self> {
        Ok(Self {
            uri: settings.uri.clone(),
            width: settings.width,
            height: settings.height,
            vflip: settings.vflip,
            hflip: settings.hflip,
            frame_count: 0,
            rng: StdRng::seed_from_u64(0x686f_6d65),
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let mut frame = Frame::new(
            self.scene_pixels(),
            self.width,
            self.height,
            SystemTime::now(),
        );
        if self.vflip || self.hflip {
            vision::flip_rgb(&mut frame, self.vflip, self.hflip);
        }
        Ok(frame)
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.uri.clone(),
        }
    }

    pub(crate) fn close(self) {
        log::info!(
            "CameraSource: closed {} after {} frames",
            self.uri,
            self.frame_count
        );
    }

    fn scene_pixels(&mut self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut pixels = vec![0u8; w * h * 3];

        // Static background: a horizontal gradient, like a lit wall.
        for y in 0..h {
            for x in 0..w {
                let base = 40 + ((x * 120) / w.max(1)) as u8;
                let idx = (y * w + x) * 3;
                let noise = self.rng.gen_range(0..=NOISE_AMPLITUDE * 2) as i16
                    - NOISE_AMPLITUDE as i16;
                let value = (base as i16 + noise).clamp(0, 255) as u8;
                pixels[idx] = value;
                pixels[idx + 1] = value;
                pixels[idx + 2] = value;
            }
        }

        // Intruder block sweeping left to right during the active stretch.
        let phase = self.frame_count % CYCLE_FRAMES;
        if phase >= INTRUDER_ENTERS_AT {
            let progress = (phase - INTRUDER_ENTERS_AT) as usize;
            let span = (CYCLE_FRAMES - INTRUDER_ENTERS_AT) as usize;
            let block_w = (w / 6).max(1);
            let block_h = (h / 3).max(1);
            let x0 = (progress * w.saturating_sub(block_w)) / span.max(1);
            let y0 = h / 3;
            for y in y0..(y0 + block_h).min(h) {
                for x in x0..(x0 + block_w).min(w) {
                    let idx = (y * w + x) * 3;
                    pixels[idx] = 230;
                    pixels[idx + 1] = 230;
                    pixels[idx + 2] = 230;
                }
            }
        }

        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision;

    fn settings() -> CameraSettings {
        CameraSettings {
            uri: "stub://scene".to_string(),
            fps: 10,
            width: 96,
            height: 72,
            frame_width: 96,
            vflip: false,
            hflip: false,
        }
    }

    #[test]
    fn quiet_frames_differ_only_by_noise() -> Result<()> {
        let mut source = SyntheticSource::open(&settings())?;
        let a = vision::grayscale(&source.next_frame()?);
        let b = vision::grayscale(&source.next_frame()?);
        let max_delta = vision::absdiff(&a, &b)
            .pixels
            .iter()
            .copied()
            .max()
            .unwrap_or(0);
        assert!(max_delta <= NOISE_AMPLITUDE * 2);
        Ok(())
    }

    #[test]
    fn intruder_stretch_produces_large_delta() -> Result<()> {
        let mut source = SyntheticSource::open(&settings())?;
        let mut quiet = None;
        let mut active = None;
        for _ in 0..CYCLE_FRAMES {
            let frame = source.next_frame()?;
            let phase = source.frame_count % CYCLE_FRAMES;
            if phase == INTRUDER_ENTERS_AT - 10 {
                quiet = Some(vision::grayscale(&frame));
            }
            if phase == INTRUDER_ENTERS_AT + 10 {
                active = Some(vision::grayscale(&frame));
            }
        }
        let delta = vision::absdiff(&quiet.unwrap(), &active.unwrap());
        let changed = delta.pixels.iter().filter(|&&p| p > 50).count();
        assert!(changed > 100, "intruder should change many pixels");
        Ok(())
    }
}
