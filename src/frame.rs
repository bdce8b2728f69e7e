//! Decoded video frames.
//!
//! - `Frame`: RGB24 pixels at native resolution plus the container timestamp.
//! - Engines receive `&mut Frame` so they can paint diagnostic overlays. Overlays
//!   are cosmetic and never feed back into position or zone computation.

use crate::zone::Point;

/// One decoded RGB24 frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Container timestamp, seconds from the start of the file.
    pub timestamp_s: f64,
    /// Decode order, zero based, counted from the seek point.
    pub index: u64,
}

impl Frame {
    pub(crate) fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_s: f64,
        index: u64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_s,
            index,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Fill a square marker centred on `center`. Out-of-frame pixels are clipped.
    pub fn draw_marker(&mut self, center: Point, radius: u32, rgb: [u8; 3]) {
        if self.data.len() < (self.width as usize) * (self.height as usize) * 3 {
            return;
        }
        let r = radius as i64;
        let cx = center.x.round() as i64;
        let cy = center.y.round() as i64;
        for y in (cy - r).max(0)..=(cy + r).min(self.height as i64 - 1) {
            for x in (cx - r).max(0)..=(cx + r).min(self.width as i64 - 1) {
                let idx = ((y as usize) * self.width as usize + x as usize) * 3;
                self.data[idx..idx + 3].copy_from_slice(&rgb);
            }
        }
    }
}
