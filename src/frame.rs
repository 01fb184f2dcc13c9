//! Frame containers and the bounded per-session state buffers.
//!
//! - `Frame`: raw RGB frame as captured from the sensor.
//! - `GrayFrame`: single-channel working image used by the motion pipeline.
//! - `FrameHistoryBuffer`: bounded FIFO of the last M processed frames,
//!   kept only for saving an illustrative series around an alert.
//! - `RollingOccupancyWindow`: bounded FIFO of the last N occupancy
//!   booleans, smoothing single-frame noise before notifying.
//!
//! A frame is owned exclusively by the pipeline stage that produced it
//! until handed to the next stage and is never mutated after hand-off.

use std::collections::VecDeque;
use std::time::SystemTime;

/// Raw color frame: height x width x 3 (RGB), row-major, plus the capture
/// timestamp.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: SystemTime,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, timestamp: SystemTime) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 3) as usize);
        Self {
            pixels,
            width,
            height,
            timestamp,
        }
    }
}

/// Single-channel 8-bit image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            pixels,
            width,
            height,
        }
    }

    /// All-zero frame of the given dimensions.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0u8; (width * height) as usize],
            width,
            height,
        }
    }

    #[inline]
    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.pixels[(y * self.width + x) as usize]
    }
}

/// One entry of the frame history: the processed grayscale frame plus the
/// per-frame classification it received.
#[derive(Clone, Debug)]
pub struct HistoryRecord {
    pub frame: GrayFrame,
    pub occupied: bool,
    pub timestamp: SystemTime,
}

/// Bounded FIFO of the last M history records. Oldest evicted on push;
/// length never exceeds capacity.
pub struct FrameHistoryBuffer {
    records: VecDeque<HistoryRecord>,
    capacity: usize,
}

impl FrameHistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: HistoryRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of the buffered series, oldest first, for handing to the
    /// background writer.
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Bounded FIFO of the last N occupancy booleans.
pub struct RollingOccupancyWindow {
    slots: VecDeque<bool>,
    capacity: usize,
}

impl RollingOccupancyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, occupied: bool) {
        while self.slots.len() >= self.capacity {
            self.slots.pop_front();
        }
        self.slots.push_back(occupied);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Mean of the window contents: the occupied fraction, in [0, 1].
    /// An empty window reads as 0.
    pub fn fraction(&self) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        let occupied = self.slots.iter().filter(|&&b| b).count();
        occupied as f64 / self.slots.len() as f64
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(occupied: bool) -> HistoryRecord {
        HistoryRecord {
            frame: GrayFrame::blank(4, 4),
            occupied,
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn history_buffer_enforces_capacity() {
        let mut buf = FrameHistoryBuffer::new(5);
        for i in 0..12 {
            buf.push(record(i % 2 == 0));
        }
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn history_snapshot_is_oldest_first() {
        let mut buf = FrameHistoryBuffer::new(3);
        buf.push(record(false));
        buf.push(record(true));
        buf.push(record(false));
        buf.push(record(true));

        let snap = buf.snapshot();
        assert_eq!(snap.len(), 3);
        assert!(snap[0].occupied);
        assert!(!snap[1].occupied);
        assert!(snap[2].occupied);
    }

    #[test]
    fn rolling_window_never_exceeds_capacity() {
        let mut window = RollingOccupancyWindow::new(5);
        for _ in 0..100 {
            window.push(true);
            assert!(window.len() <= 5);
            let f = window.fraction();
            assert!((0.0..=1.0).contains(&f));
        }
    }

    #[test]
    fn rolling_window_fraction() {
        let mut window = RollingOccupancyWindow::new(5);
        for occ in [true, true, true, false, false] {
            window.push(occ);
        }
        assert!((window.fraction() - 0.6).abs() < f64::EPSILON);

        let mut window = RollingOccupancyWindow::new(5);
        for occ in [true, true, false, false, false] {
            window.push(occ);
        }
        assert!((window.fraction() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_window_fraction_is_zero() {
        let window = RollingOccupancyWindow::new(4);
        assert_eq!(window.fraction(), 0.0);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut window = RollingOccupancyWindow::new(3);
        window.push(true);
        window.push(false);
        window.push(false);
        // evicts the leading `true`
        window.push(false);
        assert_eq!(window.fraction(), 0.0);
    }
}
