#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{EngineParams, FrameEngine};
use crate::detect::decode::{decode_single_box, InputScale};
use crate::detect::result::DetectionResult;
use crate::device::ComputeDevice;
use crate::frame::Frame;

/// Tract-based real-time engine for single-box pose models in ONNX form.
///
/// Frames are resized (nearest neighbour) to the model input; decoded
/// coordinates are scaled back to native resolution.
pub struct TractPoseEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    secondary_keypoint: usize,
}

impl TractPoseEngine {
    pub fn initialize(params: &EngineParams, device: ComputeDevice) -> Result<Self> {
        let model_path = params
            .model_path
            .as_deref()
            .ok_or_else(|| anyhow!("realtime engine needs a model path"))?;
        if device.is_accelerated() {
            log::warn!("tract executes on the CPU; requested device {device} is not used");
        }
        let engine = Self::load(model_path, params.input_width, params.input_height)?;
        Ok(Self {
            confidence_threshold: params.confidence,
            secondary_keypoint: params.secondary_keypoint,
            ..engine
        })
    }

    /// Load an ONNX model from disk and prepare it for inference.
    fn load(model_path: &Path, width: u32, height: u32) -> Result<Self> {
        if !model_path.is_file() {
            return Err(anyhow!("model weights {} not found", model_path.display()));
        }
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.5,
            secondary_keypoint: 16,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let expected_len = (frame.width as usize)
            .checked_mul(frame.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let pixels = frame.pixels();
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let src_w = frame.width as usize;
        let src_h = frame.height as usize;
        let dst_w = self.width as usize;
        let dst_h = self.height as usize;
        let shape = (1, 3, dst_h, dst_w);
        let input = tract_ndarray::Array4::from_shape_fn(shape, |(_, channel, y, x)| {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let sy = (y * src_h / dst_h).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }
}

impl FrameEngine for TractPoseEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &mut Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let (channels, anchors) = match shape.as_slice() {
            [1, c, n] => (*c, *n),
            other => return Err(anyhow!("unexpected model output shape {:?}", other)),
        };
        let data: Vec<f32> = view.iter().copied().collect();
        let scale = InputScale::new(frame.width, frame.height, self.width, self.height);
        let result = decode_single_box(
            &data,
            channels,
            anchors,
            self.confidence_threshold,
            scale,
            self.secondary_keypoint,
        )?;
        if let Some(position) = result.position {
            frame.draw_marker(position, 6, [0, 255, 0]);
        }
        Ok(result)
    }
}
