//! Model family adapters.
//!
//! An adapter knows how one family of models wants its frames prepared and
//! how its output tensor maps back to a prediction tree. The synchronizer
//! holds exactly one adapter and calls `preprocess` before inference and
//! `postprocess` after it.
//!
//! Thresholds are read through [`SharedThresholds`] at postprocess time, so
//! updates apply from the next frame onward.

use anyhow::Result;

use crate::config::SharedThresholds;
use crate::frame::{Resolution, VideoFrame};
use crate::labels::LabelTable;
use crate::postprocess::{
    build_classification_node, build_detection_tree, BoxEncoding, GeometryConfig,
};
use crate::prediction::{BoundingBox, Prediction};

/// Per-model-family hooks around the predictor.
pub trait ModelAdapter: Send {
    /// Adapter identifier.
    fn name(&self) -> &'static str;

    /// Size the model expects its input frames to be.
    fn model_resolution(&self) -> Resolution;

    /// Prepare a frame for inference. The default resamples to the model
    /// resolution; families with extra normalization override this.
    fn preprocess(&self, frame: &VideoFrame) -> Result<VideoFrame> {
        let target = self.model_resolution();
        Ok(resample_nearest(frame, target))
    }

    /// Interpret the output tensor as a prediction tree at the model
    /// resolution.
    fn postprocess(&self, tensor: &[f32]) -> Result<Prediction>;
}

/// Nearest-neighbor resample, preserving the pixel format.
fn resample_nearest(frame: &VideoFrame, target: Resolution) -> VideoFrame {
    if frame.resolution() == target {
        return frame.clone();
    }

    let bpp = frame.format.bytes_per_pixel();
    let (src_w, src_h) = (frame.width as usize, frame.height as usize);
    let (dst_w, dst_h) = (target.width as usize, target.height as usize);
    let mut pixels = Vec::with_capacity(dst_w * dst_h * bpp);

    for y in 0..dst_h {
        let src_y = y * src_h / dst_h;
        for x in 0..dst_w {
            let src_x = x * src_w / dst_w;
            let idx = (src_y * src_w + src_x) * bpp;
            pixels.extend_from_slice(&frame.pixels[idx..idx + bpp]);
        }
    }

    VideoFrame {
        pixels,
        width: target.width,
        height: target.height,
        format: frame.format,
    }
}

/// Anchor-grid detection family (TinyYOLO style).
pub struct YoloGridAdapter {
    geometry: GeometryConfig,
    model_resolution: Resolution,
    thresholds: SharedThresholds,
    labels: Option<LabelTable>,
}

impl YoloGridAdapter {
    pub fn new(
        geometry: GeometryConfig,
        model_resolution: Resolution,
        thresholds: SharedThresholds,
        labels: Option<LabelTable>,
    ) -> Self {
        debug_assert!(matches!(geometry.encoding, BoxEncoding::AnchorGrid { .. }));
        Self {
            geometry,
            model_resolution,
            thresholds,
            labels,
        }
    }
}

impl ModelAdapter for YoloGridAdapter {
    fn name(&self) -> &'static str {
        "yolo-grid"
    }

    fn model_resolution(&self) -> Resolution {
        self.model_resolution
    }

    fn postprocess(&self, tensor: &[f32]) -> Result<Prediction> {
        build_detection_tree(
            tensor,
            &self.geometry,
            self.thresholds.get(),
            self.labels.as_ref(),
            self.model_resolution,
        )
    }
}

/// Direct corner-regression detection family.
pub struct YoloCornerAdapter {
    geometry: GeometryConfig,
    model_resolution: Resolution,
    thresholds: SharedThresholds,
    labels: Option<LabelTable>,
}

impl YoloCornerAdapter {
    pub fn new(
        geometry: GeometryConfig,
        model_resolution: Resolution,
        thresholds: SharedThresholds,
        labels: Option<LabelTable>,
    ) -> Self {
        debug_assert!(matches!(
            geometry.encoding,
            BoxEncoding::CornerRegression { .. }
        ));
        Self {
            geometry,
            model_resolution,
            thresholds,
            labels,
        }
    }
}

impl ModelAdapter for YoloCornerAdapter {
    fn name(&self) -> &'static str {
        "yolo-corner"
    }

    fn model_resolution(&self) -> Resolution {
        self.model_resolution
    }

    fn postprocess(&self, tensor: &[f32]) -> Result<Prediction> {
        build_detection_tree(
            tensor,
            &self.geometry,
            self.thresholds.get(),
            self.labels.as_ref(),
            self.model_resolution,
        )
    }
}

/// Whole-frame classification family.
///
/// The classification is attached to an enabled full-frame child rather
/// than the root, so the enabled-descendant gate treats classified frames
/// the same way it treats detections.
pub struct ClassifierAdapter {
    model_resolution: Resolution,
    labels: Option<LabelTable>,
}

impl ClassifierAdapter {
    pub fn new(model_resolution: Resolution, labels: Option<LabelTable>) -> Self {
        Self {
            model_resolution,
            labels,
        }
    }
}

impl ModelAdapter for ClassifierAdapter {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn model_resolution(&self) -> Resolution {
        self.model_resolution
    }

    fn postprocess(&self, tensor: &[f32]) -> Result<Prediction> {
        let classification = build_classification_node(tensor, self.labels.as_ref())?;

        let full_frame = BoundingBox::new(
            0,
            0,
            self.model_resolution.width,
            self.model_resolution.height,
        );
        let mut root = Prediction::with_bbox(full_frame);
        root.enabled = true;

        let mut subject = Prediction::with_bbox(full_frame);
        subject.enabled = true;
        subject.append_classification(classification);
        root.append_child(subject);
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::frame::PixelFormat;

    #[test]
    fn preprocess_resamples_to_model_resolution() {
        let adapter = ClassifierAdapter::new(Resolution::new(2, 2), None);
        let mut frame = VideoFrame::blank(4, 4, PixelFormat::Gray);
        // Mark the corners so nearest-neighbor picks them up.
        frame.pixels[0] = 10;
        frame.pixels[2] = 20;
        frame.pixels[8] = 30;
        frame.pixels[10] = 40;

        let resampled = adapter.preprocess(&frame).unwrap();

        assert_eq!(resampled.resolution(), Resolution::new(2, 2));
        assert_eq!(resampled.pixels, vec![10, 20, 30, 40]);
    }

    #[test]
    fn preprocess_passes_matching_frames_through() {
        let adapter = ClassifierAdapter::new(Resolution::new(4, 4), None);
        let frame = VideoFrame::blank(4, 4, PixelFormat::Rgb);

        let out = adapter.preprocess(&frame).unwrap();

        assert_eq!(out.pixels, frame.pixels);
    }

    #[test]
    fn classifier_attaches_enabled_full_frame_child() {
        let labels = LabelTable::from_delimited("cat;dog", ';');
        let adapter = ClassifierAdapter::new(Resolution::new(8, 8), Some(labels));

        let tree = adapter.postprocess(&[0.2, 0.8]).unwrap();

        assert!(tree.is_any_enabled());
        assert_eq!(tree.children.len(), 1);
        let child = &tree.children[0];
        assert_eq!(child.bbox, BoundingBox::new(0, 0, 8, 8));
        assert_eq!(child.classifications[0].class_label.as_deref(), Some("dog"));
    }

    #[test]
    fn corner_adapter_scales_boxes_to_model_frame() {
        let geometry = GeometryConfig {
            encoding: BoxEncoding::CornerRegression { total_boxes: 1 },
            num_classes: 1,
        };
        let adapter = YoloCornerAdapter::new(
            geometry,
            Resolution::new(100, 100),
            SharedThresholds::default(),
            None,
        );
        let tensor = vec![0.1f32, 0.2, 0.5, 0.6, 0.9, 1.0];

        let tree = adapter.postprocess(&tensor).unwrap();

        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].bbox, BoundingBox::new(10, 20, 40, 40));
    }

    #[test]
    fn grid_adapter_reads_thresholds_at_postprocess_time() {
        let geometry = GeometryConfig {
            encoding: BoxEncoding::AnchorGrid {
                grid_height: 1,
                grid_width: 1,
                boxes_per_cell: 1,
                grid_stride: 32.0,
                anchors: vec![(1.0, 1.0)],
            },
            num_classes: 1,
        };
        let thresholds = SharedThresholds::new(Thresholds {
            objectness: 0.3,
            class_prob: 0.3,
            iou: 0.3,
        });
        let adapter = YoloGridAdapter::new(
            geometry,
            Resolution::new(32, 32),
            thresholds.clone(),
            None,
        );
        // Objectness 0.9, class score 1.0.
        let tensor = vec![0.0f32, 0.0, 0.0, 0.0, 0.9, 1.0];

        assert_eq!(adapter.postprocess(&tensor).unwrap().children.len(), 1);

        thresholds
            .set(Thresholds {
                objectness: 0.95,
                class_prob: 0.3,
                iou: 0.3,
            })
            .unwrap();

        assert!(adapter.postprocess(&tensor).unwrap().children.is_empty());
    }
}
