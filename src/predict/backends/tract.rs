#![cfg(feature = "backend-tract")]

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::frame::{PixelFormat, VideoFrame};
use crate::predict::backend::Predictor;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>>;

/// Tract-based ONNX backend.
///
/// Loads a local model file at `start` and runs inference on RGB frames
/// matching the configured input geometry. No network I/O.
pub struct TractPredictor {
    model_location: Option<PathBuf>,
    model: Option<RunnableModel>,
    width: u32,
    height: u32,
}

impl TractPredictor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            model_location: None,
            model: None,
            width,
            height,
        }
    }

    fn build_input(&self, frame: &VideoFrame) -> Result<Tensor> {
        if frame.format != PixelFormat::Rgb {
            return Err(anyhow!("tract backend requires RGB frames"));
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                frame.pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }
}

impl Predictor for TractPredictor {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn configure(&mut self, model_location: &str) -> Result<()> {
        if model_location.trim().is_empty() {
            return Err(anyhow!("model location is empty"));
        }
        self.model_location = Some(PathBuf::from(model_location));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let path = self
            .model_location
            .as_ref()
            .ok_or_else(|| anyhow!("tract predictor started before configure"))?;
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.model = Some(model);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.model = None;
        Ok(())
    }

    fn predict(&mut self, frame: &VideoFrame) -> Result<Vec<f32>> {
        let input = self.build_input(frame)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract predictor used before start"))?;
        let outputs = model.run(tvec!(input)).context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(view.iter().copied().collect())
    }
}
