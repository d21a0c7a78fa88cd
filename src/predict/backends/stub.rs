use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::frame::VideoFrame;
use crate::predict::backend::Predictor;

/// Deterministic in-memory backend for tests and the demo daemon.
///
/// Returns a canned tensor for every frame and counts `predict` calls so
/// tests can assert whether inference ran at all.
pub struct StubPredictor {
    tensor: Vec<f32>,
    configured: bool,
    running: bool,
    calls: Arc<AtomicUsize>,
}

impl StubPredictor {
    pub fn new(tensor: Vec<f32>) -> Self {
        Self {
            tensor,
            configured: false,
            running: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, usable after the predictor has been handed off.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for StubPredictor {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn configure(&mut self, _model_location: &str) -> Result<()> {
        self.configured = true;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.configured {
            return Err(anyhow!("stub predictor started before configure"));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn predict(&mut self, _frame: &VideoFrame) -> Result<Vec<f32>> {
        if !self.running {
            return Err(anyhow!("stub predictor used before start"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tensor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn counts_predict_calls() {
        let mut predictor = StubPredictor::new(vec![0.25, 0.75]);
        predictor.configure("unused").unwrap();
        predictor.start().unwrap();

        let frame = VideoFrame::blank(2, 2, PixelFormat::Rgb);
        let tensor = predictor.predict(&frame).unwrap();
        predictor.predict(&frame).unwrap();

        assert_eq!(tensor, vec![0.25, 0.75]);
        assert_eq!(predictor.calls(), 2);
    }

    #[test]
    fn rejects_use_outside_lifecycle() {
        let mut predictor = StubPredictor::new(Vec::new());
        assert!(predictor.start().is_err());

        predictor.configure("unused").unwrap();
        let frame = VideoFrame::blank(1, 1, PixelFormat::Gray);
        assert!(predictor.predict(&frame).is_err());
    }
}
