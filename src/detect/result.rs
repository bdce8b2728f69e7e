use crate::zone::Point;

/// Axis-aligned box, centre anchored, native pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.cx, self.cy)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub confidence: f32,
}

impl Keypoint {
    /// Models emit (0, 0) for keypoints they did not localise.
    pub fn is_degenerate(&self) -> bool {
        !self.x.is_finite() || !self.y.is_finite() || (self.x == 0.0 && self.y == 0.0)
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Result of running an engine on one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    /// Subject position; `None` when confidence was insufficient.
    pub position: Option<Point>,
    /// Secondary ("tail") landmark, when the model provides it.
    pub secondary: Option<Point>,
    pub confidence: f32,
}

impl DetectionResult {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn at(position: Point, confidence: f32) -> Self {
        Self {
            position: Some(position),
            secondary: None,
            confidence,
        }
    }
}

/// Collapse a single-box detection into a position.
///
/// The primary landmark (keypoint 0) wins when present and non-degenerate,
/// otherwise the box centre is used. `secondary_index` selects the tail
/// landmark; its absence is not an error.
pub fn resolve_single_box(
    bbox: Option<&BoundingBox>,
    keypoints: &[Keypoint],
    secondary_index: usize,
) -> DetectionResult {
    let Some(bbox) = bbox else {
        return DetectionResult::missing();
    };
    let position = match keypoints.first() {
        Some(primary) if !primary.is_degenerate() => primary.point(),
        _ => bbox.center(),
    };
    if !position.x.is_finite() || !position.y.is_finite() {
        return DetectionResult::missing();
    }
    let secondary = keypoints
        .get(secondary_index)
        .filter(|kp| !kp.is_degenerate())
        .map(Keypoint::point);
    DetectionResult {
        position: Some(position),
        secondary,
        confidence: bbox.confidence,
    }
}
