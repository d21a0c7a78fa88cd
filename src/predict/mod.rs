//! Inference backends.
//!
//! The synchronizer never touches a model directly; it talks to a
//! [`Predictor`](backend::Predictor), which owns model loading and tensor
//! execution. A stub implementation backs the tests and the demo daemon;
//! a tract-based ONNX implementation is available behind `backend-tract`.

pub mod backend;
pub mod backends;

pub use backend::Predictor;
pub use backends::stub::StubPredictor;
#[cfg(feature = "backend-tract")]
pub use backends::tract::TractPredictor;
