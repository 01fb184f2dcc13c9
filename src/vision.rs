//! Pixel operations backing the motion pipeline.
//!
//! Pure functions over owned buffers: grayscale conversion, resize, box
//! blur, running-average accumulation, absolute difference, binary
//! threshold, dilation, connected-region extraction, and JPEG encode.
//! Codec work (JPEG, resampling) is delegated to the `image` crate; the
//! motion-specific loops operate on raw buffers directly.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ExtendedColorType, GrayImage};

use crate::frame::{Frame, GrayFrame};

/// Axis-aligned bounding region produced by connected-component
/// extraction, with its pixel area.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: f64,
}

/// Convert an RGB frame to a grayscale working image (ITU-R 601 luma).
pub fn grayscale(frame: &Frame) -> GrayFrame {
    let mut pixels = Vec::with_capacity((frame.width * frame.height) as usize);
    for chunk in frame.pixels.chunks_exact(3) {
        let luma =
            (299 * chunk[0] as u32 + 587 * chunk[1] as u32 + 114 * chunk[2] as u32) / 1000;
        pixels.push(luma as u8);
    }
    GrayFrame::new(pixels, frame.width, frame.height)
}

/// Mirror a raw RGB frame vertically and/or horizontally, matching the
/// sensor mounting orientation.
pub fn flip_rgb(frame: &mut Frame, vflip: bool, hflip: bool) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let row_bytes = width * 3;
    if vflip {
        for y in 0..height / 2 {
            let (top, bottom) = (y * row_bytes, (height - 1 - y) * row_bytes);
            for i in 0..row_bytes {
                frame.pixels.swap(top + i, bottom + i);
            }
        }
    }
    if hflip {
        for y in 0..height {
            let row = y * row_bytes;
            for x in 0..width / 2 {
                let left = row + x * 3;
                let right = row + (width - 1 - x) * 3;
                for c in 0..3 {
                    frame.pixels.swap(left + c, right + c);
                }
            }
        }
    }
}

/// Resize a grayscale image to the given width, preserving aspect ratio.
pub fn resize_to_width(gray: &GrayFrame, target_width: u32) -> GrayFrame {
    if gray.width == target_width {
        return gray.clone();
    }
    let target_height =
        ((gray.height as u64 * target_width as u64) / gray.width as u64).max(1) as u32;
    let Some(img) = GrayImage::from_raw(gray.width, gray.height, gray.pixels.clone()) else {
        return gray.clone();
    };
    let resized = imageops::resize(
        &img,
        target_width,
        target_height,
        imageops::FilterType::Triangle,
    );
    GrayFrame::new(resized.into_raw(), target_width, target_height)
}

/// Separable box blur with an odd kernel size, suppressing sensor noise
/// before differencing. Edges are clamped.
pub fn box_blur(gray: &GrayFrame, kernel_size: u32) -> GrayFrame {
    debug_assert!(kernel_size % 2 == 1, "kernel size must be odd");
    let radius = (kernel_size / 2) as i64;
    let w = gray.width as i64;
    let h = gray.height as i64;
    let norm = kernel_size as u32;

    // Horizontal pass
    let mut tmp = vec![0u8; gray.pixels.len()];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            for dx in -radius..=radius {
                let sx = (x + dx).clamp(0, w - 1);
                sum += gray.pixels[(y * w + sx) as usize] as u32;
            }
            tmp[(y * w + x) as usize] = (sum / norm) as u8;
        }
    }

    // Vertical pass
    let mut out = vec![0u8; gray.pixels.len()];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            for dy in -radius..=radius {
                let sy = (y + dy).clamp(0, h - 1);
                sum += tmp[(sy * w + x) as usize] as u32;
            }
            out[(y * w + x) as usize] = (sum / norm) as u8;
        }
    }

    GrayFrame::new(out, gray.width, gray.height)
}

/// Exponentially fold a new frame into the running background average:
/// `acc = acc * (1 - alpha) + gray * alpha`, in place.
pub fn accumulate_weighted(gray: &GrayFrame, acc: &mut [f32], alpha: f64) {
    debug_assert_eq!(gray.pixels.len(), acc.len());
    let alpha = alpha as f32;
    for (a, &p) in acc.iter_mut().zip(gray.pixels.iter()) {
        *a = *a * (1.0 - alpha) + p as f32 * alpha;
    }
}

/// Round the floating-point background accumulator back to an 8-bit image
/// for differencing and display.
pub fn scale_abs(acc: &[f32], width: u32, height: u32) -> GrayFrame {
    let pixels = acc
        .iter()
        .map(|&v| v.abs().round().min(255.0) as u8)
        .collect();
    GrayFrame::new(pixels, width, height)
}

/// Per-pixel absolute difference of two equally sized images.
pub fn absdiff(a: &GrayFrame, b: &GrayFrame) -> GrayFrame {
    debug_assert_eq!((a.width, a.height), (b.width, b.height));
    let pixels = a
        .pixels
        .iter()
        .zip(b.pixels.iter())
        .map(|(&x, &y)| x.abs_diff(y))
        .collect();
    GrayFrame::new(pixels, a.width, a.height)
}

/// Binary threshold: pixels strictly above `level` become 255, the rest 0.
pub fn threshold(gray: &GrayFrame, level: u8) -> GrayFrame {
    let pixels = gray
        .pixels
        .iter()
        .map(|&p| if p > level { 255 } else { 0 })
        .collect();
    GrayFrame::new(pixels, gray.width, gray.height)
}

/// Dilate a binary image with a 3x3 structuring element, repeated
/// `iterations` times, merging nearby motion fragments.
pub fn dilate(binary: &GrayFrame, iterations: u32) -> GrayFrame {
    let w = binary.width as i64;
    let h = binary.height as i64;
    let mut current = binary.pixels.clone();
    for _ in 0..iterations {
        let mut next = vec![0u8; current.len()];
        for y in 0..h {
            for x in 0..w {
                'probe: for dy in -1..=1i64 {
                    for dx in -1..=1i64 {
                        let sx = x + dx;
                        let sy = y + dy;
                        if sx < 0 || sy < 0 || sx >= w || sy >= h {
                            continue;
                        }
                        if current[(sy * w + sx) as usize] != 0 {
                            next[(y * w + x) as usize] = 255;
                            break 'probe;
                        }
                    }
                }
            }
        }
        current = next;
    }
    GrayFrame::new(current, binary.width, binary.height)
}

/// Extract connected foreground regions (4-connectivity) from a binary
/// image, returning a bounding box and pixel area per region.
pub fn connected_regions(binary: &GrayFrame) -> Vec<MotionRegion> {
    let w = binary.width as usize;
    let h = binary.height as usize;
    let mut visited = vec![false; w * h];
    let mut regions = Vec::new();
    let mut queue = Vec::new();

    for start in 0..w * h {
        if visited[start] || binary.pixels[start] == 0 {
            continue;
        }

        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut area = 0u64;

        visited[start] = true;
        queue.push(start);
        while let Some(idx) = queue.pop() {
            let x = idx % w;
            let y = idx / w;
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            let mut probe = |nx: usize, ny: usize| {
                let nidx = ny * w + nx;
                if !visited[nidx] && binary.pixels[nidx] != 0 {
                    visited[nidx] = true;
                    queue.push(nidx);
                }
            };
            if x > 0 {
                probe(x - 1, y);
            }
            if x + 1 < w {
                probe(x + 1, y);
            }
            if y > 0 {
                probe(x, y - 1);
            }
            if y + 1 < h {
                probe(x, y + 1);
            }
        }

        regions.push(MotionRegion {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
            area: area as f64,
        });
    }

    regions
}

/// Draw a 1px rectangle outline onto a grayscale image, marking a
/// detected region for viewers.
pub fn draw_region(gray: &mut GrayFrame, region: &MotionRegion, value: u8) {
    let w = gray.width;
    let h = gray.height;
    let x1 = region.x.min(w.saturating_sub(1));
    let y1 = region.y.min(h.saturating_sub(1));
    let x2 = (region.x + region.width.saturating_sub(1)).min(w.saturating_sub(1));
    let y2 = (region.y + region.height.saturating_sub(1)).min(h.saturating_sub(1));
    for x in x1..=x2 {
        gray.pixels[(y1 * w + x) as usize] = value;
        gray.pixels[(y2 * w + x) as usize] = value;
    }
    for y in y1..=y2 {
        gray.pixels[(y * w + x1) as usize] = value;
        gray.pixels[(y * w + x2) as usize] = value;
    }
}

/// 2x2 diagnostic composite for the live stream: current frame and
/// background model on top, delta and thresholded delta below.
pub fn compose_diagnostic(
    gray: &GrayFrame,
    model: &GrayFrame,
    delta: &GrayFrame,
    thresh: &GrayFrame,
) -> GrayFrame {
    let top = hstack(gray, model);
    let bottom = hstack(delta, thresh);
    vstack(&top, &bottom)
}

fn hstack(left: &GrayFrame, right: &GrayFrame) -> GrayFrame {
    debug_assert_eq!(left.height, right.height);
    let width = left.width + right.width;
    let mut pixels = Vec::with_capacity((width * left.height) as usize);
    for y in 0..left.height {
        let lrow = (y * left.width) as usize;
        let rrow = (y * right.width) as usize;
        pixels.extend_from_slice(&left.pixels[lrow..lrow + left.width as usize]);
        pixels.extend_from_slice(&right.pixels[rrow..rrow + right.width as usize]);
    }
    GrayFrame::new(pixels, width, left.height)
}

fn vstack(top: &GrayFrame, bottom: &GrayFrame) -> GrayFrame {
    debug_assert_eq!(top.width, bottom.width);
    let mut pixels = Vec::with_capacity(top.pixels.len() + bottom.pixels.len());
    pixels.extend_from_slice(&top.pixels);
    pixels.extend_from_slice(&bottom.pixels);
    GrayFrame::new(pixels, top.width, top.height + bottom.height)
}

/// JPEG-encode a grayscale image.
pub fn encode_jpeg_gray(gray: &GrayFrame) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new(&mut out)
        .encode(
            &gray.pixels,
            gray.width,
            gray.height,
            ExtendedColorType::L8,
        )
        .context("jpeg encode grayscale frame")?;
    Ok(out)
}

/// JPEG-encode a raw RGB frame.
pub fn encode_jpeg_rgb(frame: &Frame) -> Result<Vec<u8>> {
    if frame.pixels.len() != (frame.width * frame.height * 3) as usize {
        return Err(anyhow!("rgb buffer does not match frame dimensions"));
    }
    let mut out = Vec::new();
    JpegEncoder::new(&mut out)
        .encode(
            &frame.pixels,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .context("jpeg encode rgb frame")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn gray_from(rows: &[&[u8]]) -> GrayFrame {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let pixels = rows.iter().flat_map(|r| r.iter().copied()).collect();
        GrayFrame::new(pixels, width, height)
    }

    #[test]
    fn grayscale_averages_channels() {
        let frame = Frame::new(vec![255, 255, 255, 0, 0, 0], 2, 1, SystemTime::UNIX_EPOCH);
        let gray = grayscale(&frame);
        assert_eq!(gray.pixels, vec![255, 0]);
    }

    #[test]
    fn absdiff_is_symmetric() {
        let a = gray_from(&[&[10, 200]]);
        let b = gray_from(&[&[30, 100]]);
        assert_eq!(absdiff(&a, &b).pixels, vec![20, 100]);
        assert_eq!(absdiff(&b, &a).pixels, vec![20, 100]);
    }

    #[test]
    fn threshold_is_strictly_above() {
        let g = gray_from(&[&[4, 5, 6]]);
        assert_eq!(threshold(&g, 5).pixels, vec![0, 0, 255]);
    }

    #[test]
    fn dilate_grows_single_pixel() {
        let mut pixels = vec![0u8; 25];
        pixels[12] = 255; // center of 5x5
        let binary = GrayFrame::new(pixels, 5, 5);
        let grown = dilate(&binary, 1);
        let lit = grown.pixels.iter().filter(|&&p| p != 0).count();
        assert_eq!(lit, 9);
    }

    #[test]
    fn connected_regions_finds_two_blobs() {
        let binary = gray_from(&[
            &[255, 255, 0, 0, 0, 0],
            &[255, 255, 0, 0, 0, 0],
            &[0, 0, 0, 0, 255, 255],
            &[0, 0, 0, 0, 255, 255],
        ]);
        let mut regions = connected_regions(&binary);
        regions.sort_by_key(|r| (r.y, r.x));
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].area, 4.0);
        assert_eq!((regions[0].x, regions[0].y), (0, 0));
        assert_eq!((regions[0].width, regions[0].height), (2, 2));
        assert_eq!((regions[1].x, regions[1].y), (4, 2));
    }

    #[test]
    fn diagonal_pixels_are_separate_regions() {
        // 4-connectivity: touching corners do not merge
        let binary = gray_from(&[&[255, 0], &[0, 255]]);
        assert_eq!(connected_regions(&binary).len(), 2);
    }

    #[test]
    fn accumulate_converges_toward_frame() {
        let gray = gray_from(&[&[100, 100]]);
        let mut acc = vec![0.0f32; 2];
        for _ in 0..200 {
            accumulate_weighted(&gray, &mut acc, 0.1);
        }
        let model = scale_abs(&acc, 2, 1);
        assert!(model.pixels.iter().all(|&p| (99..=101).contains(&p)));
    }

    #[test]
    fn blur_preserves_flat_regions() {
        let g = GrayFrame::new(vec![7u8; 81], 9, 9);
        let blurred = box_blur(&g, 3);
        assert!(blurred.pixels.iter().all(|&p| p == 7));
    }

    #[test]
    fn compose_diagnostic_dimensions() {
        let g = GrayFrame::blank(4, 3);
        let out = compose_diagnostic(&g, &g, &g, &g);
        assert_eq!((out.width, out.height), (8, 6));
    }

    #[test]
    fn jpeg_encode_round_trips_header() {
        let g = GrayFrame::blank(16, 16);
        let jpeg = encode_jpeg_gray(&g).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn flip_both_axes() {
        let mut frame = Frame::new(
            vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4],
            2,
            2,
            SystemTime::UNIX_EPOCH,
        );
        flip_rgb(&mut frame, true, true);
        assert_eq!(frame.pixels[0], 4);
        assert_eq!(frame.pixels[9], 1);
    }
}
