//! Frame container and overlay drawing.
//!
//! - `Frame`: one decoded RGB8 image handed from a capture source to the worker.
//! - `annotate`: draws the counting line, counting zone edges, tracked boxes
//!   and the running count onto a copy of a frame for the per-frame update
//!   callback.
//!
//! Frames are never written to disk by the kernel. The annotated copy is the
//! only pixel data that leaves a worker, and only through the update callback.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::counter::CountingGeometry;
use crate::detect::TrackedDetection;

const LINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const ZONE_EDGE_COLOR: Rgb<u8> = Rgb([255, 160, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNTRACKED_BOX_COLOR: Rgb<u8> = Rgb([128, 128, 128]);
const ZONE_EDGE_HEIGHT_PX: f32 = 12.0;

const BADGE_COLOR: Rgb<u8> = Rgb([32, 32, 32]);
const DIGIT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BADGE_MARGIN: i32 = 4;
const BADGE_PADDING: i32 = 3;
const DIGIT_WIDTH: i32 = 8;
const DIGIT_HEIGHT: i32 = 14;
const DIGIT_GAP: i32 = 2;
const SEGMENT_THICKNESS: i32 = 2;

/// Seven-segment masks for 0-9; bit 0 = top, then clockwise, bit 6 = middle.
const DIGIT_SEGMENTS: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];

/// One RGB8 frame (row-major, 3 bytes per pixel, no padding).
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture-order sequence number assigned by the source.
    pub sequence: u64,
}

impl Frame {
    /// Wrap decoded RGB8 pixels. Fails when the buffer does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected_len = rgb_len(width, height)?;
        if data.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected_len,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    /// All-black frame, mostly useful for tests and synthetic sources.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Result<Self> {
        let len = rgb_len(width, height)?;
        Self::new(vec![0u8; len], width, height, sequence)
    }

    /// Pixel at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    fn into_image(self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data)
    }

    fn from_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// Draw the counting overlay onto a copy of `frame`.
///
/// The counting line spans the counting zone only; short vertical ticks mark the
/// zone edges. Tracked detections get a green outline, untracked ones grey.
/// The session count is drawn as a badge in the top-left corner.
pub fn annotate(
    frame: &Frame,
    geometry: &CountingGeometry,
    detections: &[TrackedDetection],
    count: u64,
) -> Frame {
    let sequence = frame.sequence;
    let Some(mut image) = frame.clone().into_image() else {
        return frame.clone();
    };

    for det in detections {
        let color = if det.track_id.is_some() {
            BOX_COLOR
        } else {
            UNTRACKED_BOX_COLOR
        };
        if let Some(rect) = to_rect(det, image.width(), image.height()) {
            draw_hollow_rect_mut(&mut image, rect, color);
        }
    }

    let y = geometry.line_y;
    let (x0, x1) = (geometry.zone.start, geometry.zone.end);
    draw_line_segment_mut(&mut image, (x0, y), (x1, y), LINE_COLOR);
    draw_line_segment_mut(&mut image, (x0, y + 1.0), (x1, y + 1.0), LINE_COLOR);
    for x in [x0, x1] {
        draw_line_segment_mut(
            &mut image,
            (x, y - ZONE_EDGE_HEIGHT_PX),
            (x, y + ZONE_EDGE_HEIGHT_PX),
            ZONE_EDGE_COLOR,
        );
    }

    draw_count(&mut image, count);

    Frame::from_image(image, sequence)
}

fn draw_count(image: &mut RgbImage, count: u64) {
    let digits = count.to_string();
    let cell = DIGIT_WIDTH + DIGIT_GAP;
    let badge_width = digits.len() as i32 * cell - DIGIT_GAP + 2 * BADGE_PADDING;
    let badge_height = DIGIT_HEIGHT + 2 * BADGE_PADDING;
    draw_filled_rect_mut(
        image,
        Rect::at(BADGE_MARGIN, BADGE_MARGIN).of_size(badge_width as u32, badge_height as u32),
        BADGE_COLOR,
    );

    let top = BADGE_MARGIN + BADGE_PADDING;
    for (i, digit) in digits.bytes().enumerate() {
        let left = BADGE_MARGIN + BADGE_PADDING + i as i32 * cell;
        let mask = DIGIT_SEGMENTS[usize::from(digit - b'0')];
        for (bit, (x, y, w, h)) in segments(left, top).into_iter().enumerate() {
            if mask & (1 << bit) != 0 {
                draw_filled_rect_mut(image, Rect::at(x, y).of_size(w as u32, h as u32), DIGIT_COLOR);
            }
        }
    }
}

/// Segment rectangles `(x, y, w, h)` in mask bit order.
fn segments(left: i32, top: i32) -> [(i32, i32, i32, i32); 7] {
    let (w, h, t) = (DIGIT_WIDTH, DIGIT_HEIGHT, SEGMENT_THICKNESS);
    let half = h / 2;
    [
        (left, top, w, t),
        (left + w - t, top, t, half),
        (left + w - t, top + half, t, half),
        (left, top + h - t, w, t),
        (left, top + half, t, half),
        (left, top, t, half),
        (left, top + half - t / 2, w, t),
    ]
}

fn to_rect(det: &TrackedDetection, width: u32, height: u32) -> Option<Rect> {
    let x1 = det.bbox.x1.max(0.0).min(width as f32 - 1.0);
    let y1 = det.bbox.y1.max(0.0).min(height as f32 - 1.0);
    let x2 = det.bbox.x2.max(0.0).min(width as f32);
    let y2 = det.bbox.y2.max(0.0).min(height as f32);
    let w = (x2 - x1).floor();
    let h = (y2 - y1).floor();
    if w < 1.0 || h < 1.0 {
        return None;
    }
    Some(Rect::at(x1 as i32, y1 as i32).of_size(w as u32, h as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::ZoneBounds;
    use crate::detect::BoundingBox;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, 0).is_err());
        assert!(Frame::new(vec![0u8; 48], 4, 4, 0).is_ok());
    }

    #[test]
    fn annotate_draws_counting_line_inside_zone() -> Result<()> {
        let frame = Frame::blank(100, 100, 7)?;
        let geometry = CountingGeometry {
            line_y: 50.0,
            zone: ZoneBounds {
                start: 20.0,
                end: 80.0,
            },
        };
        let annotated = annotate(&frame, &geometry, &[], 0);

        assert_eq!(annotated.sequence, 7);
        assert_eq!(annotated.pixel(50, 50), Some([255, 0, 0]));
        assert_eq!(annotated.pixel(10, 50), Some([0, 0, 0]));
        // The source frame is untouched.
        assert_eq!(frame.pixel(50, 50), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn annotate_outlines_tracked_boxes() -> Result<()> {
        let frame = Frame::blank(100, 100, 0)?;
        let geometry = CountingGeometry {
            line_y: 90.0,
            zone: ZoneBounds {
                start: 0.0,
                end: 100.0,
            },
        };
        let det = TrackedDetection {
            bbox: BoundingBox::new(40.0, 40.0, 60.0, 70.0),
            track_id: Some(3),
            class_id: 0,
            confidence: 0.9,
        };
        let annotated = annotate(&frame, &geometry, &[det], 0);
        assert_eq!(annotated.pixel(40, 50), Some([0, 255, 0]));
        assert_eq!(annotated.pixel(50, 50), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn annotate_draws_the_running_count() -> Result<()> {
        let frame = Frame::blank(100, 100, 0)?;
        let geometry = CountingGeometry {
            line_y: 90.0,
            zone: ZoneBounds {
                start: 0.0,
                end: 100.0,
            },
        };
        // First digit cell starts at (7, 7); its middle segment covers y 13..=14.
        let eight = annotate(&frame, &geometry, &[], 8);
        assert_eq!(eight.pixel(11, 13), Some([255, 255, 255]));
        assert_eq!(eight.pixel(11, 7), Some([255, 255, 255]));

        let seven = annotate(&frame, &geometry, &[], 7);
        assert_eq!(seven.pixel(11, 13), Some([32, 32, 32]));
        assert_eq!(seven.pixel(11, 7), Some([255, 255, 255]));

        // Two digits widen the badge; the second cell starts at x = 17.
        let twelve = annotate(&frame, &geometry, &[], 12);
        assert_eq!(twelve.pixel(20, 7), Some([255, 255, 255]));
        assert_eq!(eight.pixel(20, 7), Some([0, 0, 0]));
        Ok(())
    }
}
