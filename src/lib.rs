//! infermux
//!
//! Dual-path video inference core. A stream is split in two: a model path
//! runs (possibly downscaled) frames through a neural network, a bypass
//! path carries the untouched full-resolution frames. The synchronizer
//! reunites them, attaching each inference result to its original frame
//! as a structured prediction tree.
//!
//! # Module Structure
//!
//! - `geometry`: box math (IoU, anchor decode, duplicate suppression)
//! - `prediction`: the hierarchical prediction/classification tree
//! - `labels`: class label tables
//! - `postprocess`: output tensor to prediction tree
//! - `adapter`: per-model-family preprocess/postprocess hooks
//! - `predict`: inference backends (stub, optional tract ONNX)
//! - `sync`: the dual-path frame synchronizer
//! - `frame`: frame buffers and queue records
//! - `config`: engine configuration and hot-reloadable thresholds

pub mod adapter;
pub mod config;
pub mod frame;
pub mod geometry;
pub mod labels;
pub mod postprocess;
pub mod predict;
pub mod prediction;
pub mod sync;

pub use adapter::{ClassifierAdapter, ModelAdapter, YoloCornerAdapter, YoloGridAdapter};
pub use config::{EngineConfig, SharedThresholds, Thresholds};
pub use frame::{FrameRecord, PixelFormat, Resolution, VideoFrame};
pub use geometry::{
    decode_box, intersection_over_union, sigmoid, suppress_duplicates, DecodedBox, DetectionBox,
};
pub use labels::LabelTable;
pub use postprocess::{
    build_classification_node, build_detection_tree, BoxEncoding, GeometryConfig,
};
pub use predict::{Predictor, StubPredictor};
#[cfg(feature = "backend-tract")]
pub use predict::TractPredictor;
pub use prediction::{BoundingBox, Classification, Prediction};
pub use sync::{Forwarded, FrameSynchronizer, MergeEvent, Ports};
