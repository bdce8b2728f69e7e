//! Decoding of single-box pose model output.
//!
//! The model emits a channels-first tensor `[1, C, N]` over `N` candidate
//! anchors. Each anchor carries `cx, cy, w, h, score` followed by `K`
//! keypoint triples `(x, y, confidence)`, so `C = 5 + 3K`. Coordinates are in
//! model-input pixels and are scaled back to the native frame here.

use anyhow::{anyhow, Result};

use super::result::{resolve_single_box, BoundingBox, DetectionResult, Keypoint};

/// Ratio between native frame size and model input size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputScale {
    pub sx: f64,
    pub sy: f64,
}

impl InputScale {
    pub fn new(frame_w: u32, frame_h: u32, input_w: u32, input_h: u32) -> Self {
        Self {
            sx: frame_w as f64 / input_w.max(1) as f64,
            sy: frame_h as f64 / input_h.max(1) as f64,
        }
    }
}

/// Keep the highest-scoring anchor at or above `threshold` and resolve it.
pub fn decode_single_box(
    data: &[f32],
    channels: usize,
    anchors: usize,
    threshold: f32,
    scale: InputScale,
    secondary_index: usize,
) -> Result<DetectionResult> {
    if channels < 5 {
        return Err(anyhow!("model output has {channels} channels, need at least 5"));
    }
    let expected = channels
        .checked_mul(anchors)
        .ok_or_else(|| anyhow!("model output shape overflows"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "model output holds {} values, expected {}x{}",
            data.len(),
            channels,
            anchors
        ));
    }
    let at = |c: usize, a: usize| data[c * anchors + a];

    // A non-finite centre is unusable even with a confident score.
    let best = (0..anchors)
        .filter(|&a| at(4, a).is_finite() && at(4, a) >= threshold)
        .filter(|&a| at(0, a).is_finite() && at(1, a).is_finite())
        .max_by(|&a, &b| at(4, a).total_cmp(&at(4, b)));
    let Some(anchor) = best else {
        return Ok(DetectionResult::missing());
    };

    let bbox = BoundingBox {
        cx: at(0, anchor) as f64 * scale.sx,
        cy: at(1, anchor) as f64 * scale.sy,
        w: at(2, anchor) as f64 * scale.sx,
        h: at(3, anchor) as f64 * scale.sy,
        confidence: at(4, anchor),
    };

    let extra = channels - 5;
    let keypoints: Vec<Keypoint> = if extra % 3 == 0 {
        (0..extra / 3)
            .map(|k| {
                let base = 5 + k * 3;
                Keypoint {
                    x: at(base, anchor) as f64 * scale.sx,
                    y: at(base + 1, anchor) as f64 * scale.sy,
                    confidence: at(base + 2, anchor),
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(resolve_single_box(Some(&bbox), &keypoints, secondary_index))
}
