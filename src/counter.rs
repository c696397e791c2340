//! Line-crossing counter.
//!
//! Each worker owns one `CrossingCounter`. For every tracked object id it keeps
//! the fraction of the box that was below the counting line on the previous
//! frame. An object is counted when it goes from mostly below the line
//! (`>= CROSSING_THRESHOLD`) to mostly above it (`< CROSSING_THRESHOLD`) while
//! its horizontal center is inside the counting zone. After a count the object
//! stays disarmed until it is mostly below the line again.
//!
//! State for ids that do not appear in a frame is dropped by `finish_frame`, so
//! memory is bounded by the number of objects visible in one frame.

use std::collections::{HashMap, HashSet};

use crate::detect::BoundingBox;

/// Fraction of box height that must be below the line for an object to count as "below".
pub const CROSSING_THRESHOLD: f32 = 0.70;

/// Horizontal pixel range in which crossings are eligible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoneBounds {
    pub start: f32,
    pub end: f32,
}

impl ZoneBounds {
    pub fn contains(&self, x: f32) -> bool {
        self.start <= x && x <= self.end
    }
}

/// Counting line and zone in pixel coordinates for one frame size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountingGeometry {
    pub line_y: f32,
    pub zone: ZoneBounds,
}

impl CountingGeometry {
    /// Derive pixel geometry from configured fractions.
    ///
    /// `line_position` is the line height as a fraction of frame height,
    /// `line_width` the zone width as a fraction of frame width, centered.
    /// Both are clamped to `[0, 1]`; pixel values are truncated.
    pub fn from_frame(width: u32, height: u32, line_position: f32, line_width: f32) -> Self {
        let line_position = clamp_unit(line_position);
        let line_width = clamp_unit(line_width);
        let line_y = (height as f32 * line_position).trunc();
        let zone_px = width as f32 * line_width;
        let start = ((width as f32 - zone_px) / 2.0).trunc();
        let end = (start + zone_px).trunc();
        Self {
            line_y,
            zone: ZoneBounds { start, end },
        }
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Per-track state. Never shared outside the owning worker.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackerState {
    pub previous_fraction_below: Option<f32>,
    pub counted_this_crossing: bool,
}

#[derive(Debug, Default)]
pub struct CrossingCounter {
    states: HashMap<u64, TrackerState>,
    seen_this_frame: HashSet<u64>,
}

impl CrossingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tracked box for the current frame. Returns true exactly on a countable crossing.
    pub fn update(&mut self, track_id: u64, bbox: &BoundingBox, line_y: f32, zone: ZoneBounds) -> bool {
        self.seen_this_frame.insert(track_id);

        let Some(fraction_below) = fraction_below(bbox, line_y) else {
            return false;
        };
        let in_zone = zone.contains(bbox.center_x());

        let state = self.states.entry(track_id).or_default();
        let was_below = state
            .previous_fraction_below
            .is_some_and(|prev| prev >= CROSSING_THRESHOLD);
        let is_above = fraction_below < CROSSING_THRESHOLD;

        let crossed = was_below && is_above && !state.counted_this_crossing && in_zone;
        if crossed {
            state.counted_this_crossing = true;
        } else if fraction_below >= CROSSING_THRESHOLD {
            state.counted_this_crossing = false;
        }
        state.previous_fraction_below = Some(fraction_below);

        crossed
    }

    /// Close the current frame: drop state for every id not seen since the previous call.
    ///
    /// Returns the number of purged ids.
    pub fn finish_frame(&mut self) -> usize {
        let before = self.states.len();
        let seen = &self.seen_this_frame;
        self.states.retain(|id, _| seen.contains(id));
        self.seen_this_frame.clear();
        before - self.states.len()
    }

    pub fn state(&self, track_id: u64) -> Option<&TrackerState> {
        self.states.get(&track_id)
    }

    /// Number of ids with live state.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

/// Fraction of the box height below `line_y`, or `None` for degenerate boxes.
pub fn fraction_below(bbox: &BoundingBox, line_y: f32) -> Option<f32> {
    let height = bbox.height();
    if height <= 0.0 || !height.is_finite() {
        return None;
    }
    let pixels_below = (bbox.y2 - line_y).max(0.0);
    Some((pixels_below / height).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_Y: f32 = 100.0;
    const FULL_WIDTH: ZoneBounds = ZoneBounds {
        start: 0.0,
        end: 640.0,
    };

    /// Box 100px tall, centered at `cx`, with `fraction` of its height below `LINE_Y`.
    fn box_with_fraction(cx: f32, fraction: f32) -> BoundingBox {
        let y2 = LINE_Y + fraction * 100.0;
        BoundingBox::new(cx - 10.0, y2 - 100.0, cx + 10.0, y2)
    }

    fn feed(counter: &mut CrossingCounter, id: u64, cx: f32, fractions: &[f32]) -> usize {
        let mut counted = 0;
        for &fraction in fractions {
            if counter.update(id, &box_with_fraction(cx, fraction), LINE_Y, FULL_WIDTH) {
                counted += 1;
            }
            counter.finish_frame();
        }
        counted
    }

    #[test]
    fn upward_crossing_counts_once() {
        let mut counter = CrossingCounter::new();
        let mut hits = Vec::new();
        for fraction in [0.9, 0.75, 0.5, 0.3] {
            hits.push(counter.update(7, &box_with_fraction(320.0, fraction), LINE_Y, FULL_WIDTH));
            counter.finish_frame();
        }
        assert_eq!(hits, vec![false, false, true, false]);
    }

    #[test]
    fn counted_object_rearms_after_dropping_below_again() {
        let mut counter = CrossingCounter::new();
        assert_eq!(feed(&mut counter, 7, 320.0, &[0.9, 0.75, 0.5, 0.3]), 1);
        assert_eq!(feed(&mut counter, 7, 320.0, &[0.3, 0.8, 0.4]), 1);
    }

    #[test]
    fn hovering_above_line_does_not_recount() {
        let mut counter = CrossingCounter::new();
        assert_eq!(feed(&mut counter, 1, 320.0, &[0.9, 0.5, 0.6, 0.2, 0.65]), 1);
    }

    #[test]
    fn downward_motion_never_counts() {
        let mut counter = CrossingCounter::new();
        assert_eq!(feed(&mut counter, 1, 320.0, &[0.0, 0.3, 0.69, 0.71, 1.0]), 0);
    }

    #[test]
    fn first_sighting_above_line_never_counts() {
        let mut counter = CrossingCounter::new();
        assert_eq!(feed(&mut counter, 1, 320.0, &[0.2]), 0);
        assert_eq!(
            counter.state(1).and_then(|s| s.previous_fraction_below),
            Some(0.2)
        );
    }

    #[test]
    fn object_outside_zone_never_counts() {
        let zone = ZoneBounds {
            start: 200.0,
            end: 440.0,
        };
        let mut counter = CrossingCounter::new();
        let mut counted = 0;
        for fraction in [0.9, 0.75, 0.5, 0.3, 0.95, 0.1, 1.0, 0.0] {
            if counter.update(4, &box_with_fraction(100.0, fraction), LINE_Y, zone) {
                counted += 1;
            }
            counter.finish_frame();
        }
        assert_eq!(counted, 0);
    }

    #[test]
    fn zone_edges_are_inclusive() {
        let zone = ZoneBounds {
            start: 200.0,
            end: 440.0,
        };
        assert!(zone.contains(200.0));
        assert!(zone.contains(440.0));
        assert!(!zone.contains(440.5));
    }

    #[test]
    fn degenerate_boxes_are_skipped_but_keep_the_id_alive() {
        let mut counter = CrossingCounter::new();
        counter.update(9, &box_with_fraction(320.0, 0.9), LINE_Y, FULL_WIDTH);
        counter.finish_frame();

        let flat = BoundingBox::new(310.0, 150.0, 330.0, 150.0);
        assert!(!counter.update(9, &flat, LINE_Y, FULL_WIDTH));
        assert_eq!(counter.finish_frame(), 0);
        assert_eq!(
            counter.state(9).and_then(|s| s.previous_fraction_below),
            Some(0.9)
        );

        // Still armed from the last valid observation.
        assert!(counter.update(9, &box_with_fraction(320.0, 0.4), LINE_Y, FULL_WIDTH));
    }

    #[test]
    fn state_is_purged_one_frame_after_id_disappears() {
        let mut counter = CrossingCounter::new();
        counter.update(1, &box_with_fraction(320.0, 0.9), LINE_Y, FULL_WIDTH);
        counter.update(2, &box_with_fraction(320.0, 0.9), LINE_Y, FULL_WIDTH);
        assert_eq!(counter.finish_frame(), 0);
        assert_eq!(counter.tracked(), 2);

        counter.update(2, &box_with_fraction(320.0, 0.8), LINE_Y, FULL_WIDTH);
        assert_eq!(counter.finish_frame(), 1);
        assert!(counter.state(1).is_none());
        assert!(counter.state(2).is_some());

        // A reappearing id starts from scratch and cannot count on its first frame back.
        assert!(!counter.update(1, &box_with_fraction(320.0, 0.3), LINE_Y, FULL_WIDTH));
    }

    #[test]
    fn churning_ids_do_not_grow_state() {
        let mut counter = CrossingCounter::new();
        for id in 0..10_000u64 {
            counter.update(id, &box_with_fraction(320.0, 0.9), LINE_Y, FULL_WIDTH);
            counter.update(id + 1_000_000, &box_with_fraction(320.0, 0.9), LINE_Y, FULL_WIDTH);
            counter.finish_frame();
            assert!(counter.tracked() <= 2);
        }
    }

    #[test]
    fn fraction_below_is_clamped() {
        assert_eq!(fraction_below(&BoundingBox::new(0.0, 0.0, 10.0, 50.0), 100.0), Some(0.0));
        assert_eq!(fraction_below(&BoundingBox::new(0.0, 150.0, 10.0, 200.0), 100.0), Some(1.0));
        assert_eq!(fraction_below(&BoundingBox::new(0.0, 80.0, 10.0, 120.0), 100.0), Some(0.5));
        assert_eq!(fraction_below(&BoundingBox::new(0.0, 80.0, 10.0, 70.0), 100.0), None);
    }

    #[test]
    fn geometry_centers_zone_and_clamps_fractions() {
        let g = CountingGeometry::from_frame(640, 480, 0.5, 0.5);
        assert_eq!(g.line_y, 240.0);
        assert_eq!(g.zone, ZoneBounds { start: 160.0, end: 480.0 });

        let g = CountingGeometry::from_frame(640, 480, 1.7, -0.2);
        assert_eq!(g.line_y, 480.0);
        assert_eq!(g.zone, ZoneBounds { start: 320.0, end: 320.0 });

        let full = CountingGeometry::from_frame(641, 481, 0.25, 1.0);
        assert_eq!(full.line_y, 120.0);
        assert_eq!(full.zone, ZoneBounds { start: 0.0, end: 641.0 });
    }
}
