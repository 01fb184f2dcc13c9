//! Background-subtraction motion pipeline.
//!
//! Each capture session owns one `MotionPipeline`. The first frame of a
//! session seeds the background model and yields no observation, so a
//! freshly started camera never alerts on its own cold start. Every
//! subsequent frame updates the model with an exponential moving average
//! and is scored against it.

use std::time::{Instant, SystemTime};

use crate::config::MotionSettings;
use crate::frame::{Frame, GrayFrame};
use crate::vision::{self, MotionRegion};

/// The outcome of analyzing one frame against the session background.
#[derive(Clone, Debug)]
pub struct MotionObservation {
    /// The processed grayscale frame, resized to the analysis width.
    pub frame: GrayFrame,
    /// 2x2 composite of frame, model, delta, and threshold for viewers.
    pub diagnostic: GrayFrame,
    pub regions: Vec<MotionRegion>,
    /// True when at least one region met the minimum area.
    pub occupied: bool,
    pub timestamp: SystemTime,
    /// Monotonic capture instant, used for throttle arithmetic.
    pub at: Instant,
}

/// Per-session motion state: the floating-point background accumulator
/// plus the thresholds it is scored with.
pub struct MotionPipeline {
    settings: MotionSettings,
    frame_width: u32,
    model: Option<BackgroundModel>,
}

struct BackgroundModel {
    acc: Vec<f32>,
    width: u32,
    height: u32,
}

impl MotionPipeline {
    pub fn new(settings: MotionSettings, frame_width: u32) -> Self {
        Self {
            settings,
            frame_width,
            model: None,
        }
    }

    /// Whether the background model has been seeded yet.
    pub fn is_seeded(&self) -> bool {
        self.model.is_some()
    }

    /// Analyze one captured frame. Returns `None` exactly once per
    /// session, for the frame that seeds the model.
    pub fn process(&mut self, frame: &Frame) -> Option<MotionObservation> {
        let at = Instant::now();
        let gray = vision::resize_to_width(&vision::grayscale(frame), self.frame_width);
        let blurred = vision::box_blur(&gray, self.settings.kernel_size);

        let model = match self.model.as_mut() {
            Some(model) if model.width == blurred.width && model.height == blurred.height => {
                model
            }
            _ => {
                // Seed (or re-seed on a resolution change) and skip.
                self.model = Some(BackgroundModel {
                    acc: blurred.pixels.iter().map(|&p| p as f32).collect(),
                    width: blurred.width,
                    height: blurred.height,
                });
                log::debug!(
                    "MotionPipeline: background seeded at {}x{}",
                    blurred.width,
                    blurred.height
                );
                return None;
            }
        };

        vision::accumulate_weighted(&blurred, &mut model.acc, self.settings.alpha);
        let model_frame = vision::scale_abs(&model.acc, model.width, model.height);

        let delta = vision::absdiff(&blurred, &model_frame);
        let thresh = vision::dilate(
            &vision::threshold(&delta, self.settings.delta_thresh),
            self.settings.dilate_iterations,
        );

        // Every extracted region stays in the observation; only those
        // meeting the minimum area flip the classification.
        let regions: Vec<MotionRegion> = vision::connected_regions(&thresh);
        let occupied = regions.iter().any(|r| r.area >= self.settings.min_area);

        let mut annotated = gray.clone();
        let mut delta_view = delta.clone();
        for region in &regions {
            if region.area >= self.settings.min_area {
                vision::draw_region(&mut annotated, region, 255);
            } else {
                vision::draw_region(&mut delta_view, region, 255);
            }
        }
        let diagnostic =
            vision::compose_diagnostic(&annotated, &model_frame, &delta_view, &thresh);

        Some(MotionObservation {
            frame: gray,
            diagnostic,
            regions,
            occupied,
            timestamp: frame.timestamp,
            at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn settings() -> MotionSettings {
        MotionSettings {
            min_area: 25.0,
            delta_thresh: 20,
            alpha: 0.1,
            dilate_iterations: 1,
            kernel_size: 3,
        }
    }

    fn flat_frame(value: u8, width: u32, height: u32) -> Frame {
        Frame::new(
            vec![value; (width * height * 3) as usize],
            width,
            height,
            SystemTime::now(),
        )
    }

    fn frame_with_block(background: u8, block: u8, width: u32, height: u32) -> Frame {
        let mut pixels = vec![background; (width * height * 3) as usize];
        for y in 10..30u32 {
            for x in 10..30u32 {
                let idx = ((y * width + x) * 3) as usize;
                pixels[idx] = block;
                pixels[idx + 1] = block;
                pixels[idx + 2] = block;
            }
        }
        Frame::new(pixels, width, height, SystemTime::now())
    }

    #[test]
    fn first_frame_seeds_and_yields_nothing() {
        let mut pipeline = MotionPipeline::new(settings(), 64);
        assert!(!pipeline.is_seeded());
        assert!(pipeline.process(&flat_frame(50, 64, 64)).is_none());
        assert!(pipeline.is_seeded());
        assert!(pipeline.process(&flat_frame(50, 64, 64)).is_some());
    }

    #[test]
    fn static_scene_is_unoccupied() {
        let mut pipeline = MotionPipeline::new(settings(), 64);
        pipeline.process(&flat_frame(50, 64, 64));
        for _ in 0..5 {
            let obs = pipeline.process(&flat_frame(50, 64, 64)).unwrap();
            assert!(!obs.occupied);
            assert!(obs.regions.is_empty());
        }
    }

    #[test]
    fn intruding_block_flips_occupied() {
        let mut pipeline = MotionPipeline::new(settings(), 64);
        pipeline.process(&flat_frame(50, 64, 64));
        let obs = pipeline
            .process(&frame_with_block(50, 220, 64, 64))
            .unwrap();
        assert!(obs.occupied);
        assert_eq!(obs.regions.len(), 1);
        assert!(obs.regions[0].area >= 25.0);
    }

    #[test]
    fn sub_threshold_region_is_kept_but_does_not_occupy() {
        let mut big_area = settings();
        big_area.min_area = 10_000.0;
        let mut pipeline = MotionPipeline::new(big_area, 64);
        pipeline.process(&flat_frame(50, 64, 64));
        let obs = pipeline
            .process(&frame_with_block(50, 220, 64, 64))
            .unwrap();
        // Small regions stay visible to diagnostics and PIR fusion;
        // they just never flip the classification on their own.
        assert!(!obs.occupied);
        assert_eq!(obs.regions.len(), 1);
        assert!(obs.regions[0].area < 10_000.0);
    }

    #[test]
    fn model_absorbs_persistent_change() {
        let mut fast = settings();
        fast.alpha = 0.5;
        let mut pipeline = MotionPipeline::new(fast, 64);
        pipeline.process(&flat_frame(50, 64, 64));
        // A parked object keeps triggering at first, then fades into the
        // background as the accumulator converges.
        let mut last_occupied = true;
        for _ in 0..40 {
            let obs = pipeline
                .process(&frame_with_block(50, 220, 64, 64))
                .unwrap();
            last_occupied = obs.occupied;
        }
        assert!(!last_occupied);
    }

    #[test]
    fn diagnostic_is_two_by_two_grid() {
        let mut pipeline = MotionPipeline::new(settings(), 64);
        pipeline.process(&flat_frame(50, 64, 64));
        let obs = pipeline.process(&flat_frame(50, 64, 64)).unwrap();
        assert_eq!(obs.diagnostic.width, obs.frame.width * 2);
        assert_eq!(obs.diagnostic.height, obs.frame.height * 2);
    }
}
