use anyhow::Result;

use crate::frame::VideoFrame;

/// Inference backend trait.
///
/// Lifecycle: `configure` then `start` before the first `predict`; `stop`
/// after the last. The caller serializes access, so implementations may
/// assume one prediction in flight at a time.
pub trait Predictor: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Bind the backend to a model. Called once, before `start`; a failure
    /// here is a configuration error and aborts startup.
    fn configure(&mut self, model_location: &str) -> Result<()>;

    /// Acquire runtime resources. Called once after `configure`.
    fn start(&mut self) -> Result<()>;

    /// Release runtime resources. Called exactly once per successful
    /// `start`.
    fn stop(&mut self) -> Result<()>;

    /// Run inference on a preprocessed frame, returning the flattened
    /// output tensor.
    ///
    /// Implementations must treat the frame as read-only and ephemeral.
    fn predict(&mut self, frame: &VideoFrame) -> Result<Vec<f32>>;
}
