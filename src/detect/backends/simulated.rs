use anyhow::Result;

use crate::detect::backend::FrameEngine;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;
use crate::zone::Point;

const RADIUS_X: f64 = 150.0;
const RADIUS_Y: f64 = 100.0;
const ANGULAR_SPEED: f64 = 1.5;

/// Synthetic subject orbiting the frame centre on an ellipse.
///
/// The phase follows the frame timestamp, so repeated runs over the same
/// clip produce the same path. Runs using this engine are tagged as
/// simulated in their provenance.
#[derive(Debug, Default)]
pub struct SimulatedEngine;

impl SimulatedEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn position_at(width: u32, height: u32, t: f64) -> Point {
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        let rx = RADIUS_X.min(cx);
        let ry = RADIUS_Y.min(cy);
        Point::new(
            (cx + rx * (t * ANGULAR_SPEED).cos()).round(),
            (cy + ry * (t * ANGULAR_SPEED).sin()).round(),
        )
    }
}

impl FrameEngine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn infer(&mut self, frame: &mut Frame) -> Result<DetectionResult> {
        let position = Self::position_at(frame.width, frame.height, frame.timestamp_s);
        frame.draw_marker(position, 10, [255, 0, 0]);
        Ok(DetectionResult::at(position, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t: f64) -> Frame {
        Frame::new(vec![0u8; 640 * 480 * 3], 640, 480, t, 0)
    }

    #[test]
    fn orbit_starts_right_of_center() {
        let mut engine = SimulatedEngine::new();
        let result = engine.infer(&mut frame(0.0)).unwrap();
        assert_eq!(result.position, Some(Point::new(470.0, 240.0)));
        assert!(engine.is_simulated());
    }

    #[test]
    fn path_is_periodic_and_repeatable() {
        let mut engine = SimulatedEngine::new();
        let period = std::f64::consts::TAU / ANGULAR_SPEED;
        let a = engine.infer(&mut frame(1.234)).unwrap().position;
        let b = engine.infer(&mut frame(1.234)).unwrap().position;
        let c = engine.infer(&mut frame(1.234 + period)).unwrap().position;
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn overlay_does_not_move_position() {
        let mut engine = SimulatedEngine::new();
        let mut f = frame(0.5);
        let first = engine.infer(&mut f).unwrap();
        // painted frame gives the same answer
        let second = engine.infer(&mut f).unwrap();
        assert_eq!(first, second);
        assert_ne!(f.pixels().iter().map(|&p| p as u64).sum::<u64>(), 0);
    }
}
