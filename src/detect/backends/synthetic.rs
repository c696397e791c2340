//! Synthetic tracking engine for development and demos.
//!
//! Spawns boxes at the bottom of the frame and moves them upward at a random
//! speed, assigning each a fresh track id. With the default counting line in
//! the middle of the frame every box that stays in the zone produces exactly
//! one upward crossing. No pixels are inspected.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::BackendSelection;
use crate::detect::backend::{InferenceEngine, ModelLoader, TrackParams};
use crate::detect::result::{BoundingBox, TrackedDetection};
use crate::frame::Frame;

const DEFAULT_SPAWN_EVERY: u64 = 25;
const BOX_HEIGHT_FRACTION: f32 = 0.2;
const BOX_WIDTH_FRACTION: f32 = 0.1;

struct SyntheticObject {
    track_id: u64,
    center_x: f32,
    bottom_y: f32,
    speed_px: f32,
    confidence: f32,
}

pub struct SyntheticEngine {
    rng: StdRng,
    objects: Vec<SyntheticObject>,
    next_track_id: u64,
    frames_seen: u64,
    spawn_every: u64,
}

impl SyntheticEngine {
    pub fn new(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            objects: Vec::new(),
            next_track_id: 1,
            frames_seen: 0,
            spawn_every: DEFAULT_SPAWN_EVERY,
        }
    }

    /// Spawn a new object every `frames` frames (minimum 1).
    pub fn with_spawn_interval(mut self, frames: u64) -> Self {
        self.spawn_every = frames.max(1);
        self
    }

    fn spawn(&mut self, width: f32, height: f32) {
        let jitter = width * 0.2;
        let object = SyntheticObject {
            track_id: self.next_track_id,
            center_x: width / 2.0 + self.rng.gen_range(-jitter..=jitter),
            bottom_y: height,
            speed_px: height / self.rng.gen_range(30.0..60.0),
            confidence: self.rng.gen_range(0.55..0.98),
        };
        self.next_track_id += 1;
        self.objects.push(object);
    }
}

impl InferenceEngine for SyntheticEngine {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn track(&mut self, frame: &Frame, params: &TrackParams<'_>) -> Result<Vec<TrackedDetection>> {
        let width = frame.width as f32;
        let height = frame.height as f32;
        let box_height = height * BOX_HEIGHT_FRACTION;
        let half_width = width * BOX_WIDTH_FRACTION / 2.0;

        if self.frames_seen % self.spawn_every == 0 {
            self.spawn(width, height);
        }
        self.frames_seen += 1;

        for object in &mut self.objects {
            object.bottom_y -= object.speed_px;
        }
        self.objects.retain(|object| object.bottom_y > 0.0);

        Ok(self
            .objects
            .iter()
            .filter(|object| object.confidence >= params.confidence_threshold)
            .map(|object| TrackedDetection {
                bbox: BoundingBox::new(
                    object.center_x - half_width,
                    object.bottom_y - box_height,
                    object.center_x + half_width,
                    object.bottom_y,
                ),
                track_id: Some(object.track_id),
                class_id: 0,
                confidence: object.confidence,
            })
            .collect())
    }
}

/// Loads `SyntheticEngine`s. The model artifact must exist but its content is ignored.
#[derive(Clone, Debug, Default)]
pub struct SyntheticLoader {
    seed: Option<u64>,
    spawn_every: Option<u64>,
}

impl SyntheticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic object motion for every loaded engine.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_spawn_interval(mut self, frames: u64) -> Self {
        self.spawn_every = Some(frames);
        self
    }
}

impl ModelLoader for SyntheticLoader {
    fn load(&self, selection: &BackendSelection) -> Result<Box<dyn InferenceEngine>> {
        if !selection.model_path.exists() {
            return Err(anyhow!(
                "model artifact {} not found",
                selection.model_path.display()
            ));
        }
        let mut engine = match self.seed {
            Some(seed) => SyntheticEngine::new(seed),
            None => SyntheticEngine::with_rng(StdRng::from_entropy()),
        };
        if let Some(frames) = self.spawn_every {
            engine = engine.with_spawn_interval(frames);
        }
        log::debug!(
            "synthetic engine loaded for {} ({})",
            selection.model_path.display(),
            selection.backend
        );
        Ok(Box::new(engine))
    }
}
