/// Axis-aligned box in pixel coordinates (`x1,y1` top-left, `x2,y2` bottom-right).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }
}

/// One detection returned by the tracking engine for a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedDetection {
    pub bbox: BoundingBox,
    /// Persistent id assigned by the tracker; `None` when the tracker has not
    /// confirmed the object yet. Untracked detections are never counted.
    pub track_id: Option<u64>,
    pub class_id: u32,
    pub confidence: f32,
}
