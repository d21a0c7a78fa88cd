//! Tensor to prediction-tree postprocessing.
//!
//! Responsibilities:
//! - Validate raw tensor length against the configured output geometry
//! - Decode anchor-grid or corner-regression outputs into pixel boxes
//! - Threshold, classify (argmax) and de-duplicate candidate boxes
//! - Assemble the resulting detections into a prediction tree
//!
//! All threshold comparisons are strict: a score exactly equal to a cutoff
//! is rejected. A tensor whose length does not match the geometry is an
//! internal consistency failure and yields a fatal error.

use anyhow::{anyhow, Result};

use crate::config::Thresholds;
use crate::frame::Resolution;
use crate::geometry::{decode_box, suppress_duplicates, DetectionBox};
use crate::labels::LabelTable;
use crate::prediction::{BoundingBox, Classification, Prediction};

/// Per-box channel count in front of the class scores:
/// x, y, w, h, objectness.
const BOX_CHANNELS: usize = 5;

/// How a model lays its detections out in the output tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum BoxEncoding {
    /// Grid-cell anchor boxes with sigmoid/exponential reparameterization.
    /// Anchor extents are in cell units and get multiplied by the stride.
    AnchorGrid {
        grid_height: usize,
        grid_width: usize,
        boxes_per_cell: usize,
        grid_stride: f64,
        anchors: Vec<(f64, f64)>,
    },
    /// Direct corner regression: normalized corner coordinates scaled by
    /// the frame dimensions, a fixed number of boxes.
    CornerRegression { total_boxes: usize },
}

/// Output-tensor geometry of one model family.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryConfig {
    pub encoding: BoxEncoding,
    pub num_classes: usize,
}

impl GeometryConfig {
    fn box_stride(&self) -> usize {
        BOX_CHANNELS + self.num_classes
    }

    /// Total f32 count the tensor must contain.
    pub fn expected_len(&self) -> usize {
        let boxes = match &self.encoding {
            BoxEncoding::AnchorGrid {
                grid_height,
                grid_width,
                boxes_per_cell,
                ..
            } => grid_height * grid_width * boxes_per_cell,
            BoxEncoding::CornerRegression { total_boxes } => *total_boxes,
        };
        boxes * self.box_stride()
    }

    fn validate_tensor(&self, tensor: &[f32]) -> Result<()> {
        let expected = self.expected_len();
        if tensor.len() != expected {
            return Err(anyhow!(
                "tensor length {} does not match geometry (expected {})",
                tensor.len(),
                expected
            ));
        }
        if let BoxEncoding::AnchorGrid {
            boxes_per_cell,
            anchors,
            grid_stride,
            ..
        } = &self.encoding
        {
            if anchors.len() != *boxes_per_cell {
                return Err(anyhow!(
                    "anchor table has {} entries for {} boxes per cell",
                    anchors.len(),
                    boxes_per_cell
                ));
            }
            if *grid_stride <= 0.0 {
                return Err(anyhow!("grid stride must be positive"));
            }
        }
        Ok(())
    }
}

/// Argmax over the class scores of one box slice. The running maximum
/// starts at zero, so a slice with no positive score yields `(0, 0.0)`.
fn argmax_class(class_scores: &[f32]) -> (i32, f64) {
    let mut best_class = 0;
    let mut best_score = 0.0f64;
    for (class, &score) in class_scores.iter().enumerate() {
        let score = score as f64;
        if score > best_score {
            best_class = class as i32;
            best_score = score;
        }
    }
    (best_class, best_score)
}

/// Decode, threshold and de-duplicate a detection tensor into a tree.
///
/// The returned root spans the full frame and is enabled iff any detection
/// survived; each surviving box becomes an enabled child carrying one
/// classification (label resolved from `labels` when present).
pub fn build_detection_tree(
    tensor: &[f32],
    geometry: &GeometryConfig,
    thresholds: Thresholds,
    labels: Option<&LabelTable>,
    frame: Resolution,
) -> Result<Prediction> {
    geometry.validate_tensor(tensor)?;

    let mut boxes = match &geometry.encoding {
        BoxEncoding::AnchorGrid {
            grid_height,
            grid_width,
            boxes_per_cell,
            grid_stride,
            anchors,
        } => decode_anchor_grid(
            tensor,
            geometry,
            thresholds,
            *grid_height,
            *grid_width,
            *boxes_per_cell,
            *grid_stride,
            anchors,
        ),
        BoxEncoding::CornerRegression { total_boxes } => {
            decode_corner_regression(tensor, geometry, thresholds, *total_boxes, frame)
        }
    };

    suppress_duplicates(&mut boxes, thresholds.iou);

    let mut root = Prediction::new();
    root.bbox = BoundingBox::new(0, 0, frame.width, frame.height);
    root.enabled = !boxes.is_empty();
    for detection in boxes {
        root.append_child(prediction_from_box(&detection, labels));
    }
    Ok(root)
}

#[allow(clippy::too_many_arguments)]
fn decode_anchor_grid(
    tensor: &[f32],
    geometry: &GeometryConfig,
    thresholds: Thresholds,
    grid_height: usize,
    grid_width: usize,
    boxes_per_cell: usize,
    grid_stride: f64,
    anchors: &[(f64, f64)],
) -> Vec<DetectionBox> {
    let box_stride = geometry.box_stride();
    let mut boxes = Vec::new();

    for row in 0..grid_height {
        for col in 0..grid_width {
            for b in 0..boxes_per_cell {
                let index = ((row * grid_width + col) * boxes_per_cell + b) * box_stride;
                let slice = &tensor[index..index + box_stride];

                // Objectness and class scores are taken as the model emits
                // them; the sigmoid applies to the box coordinates only.
                let objectness = slice[4] as f64;
                if objectness <= thresholds.objectness {
                    continue;
                }

                let (class, prob) = argmax_class(&slice[BOX_CHANNELS..]);
                if prob <= thresholds.class_prob {
                    continue;
                }

                // Anchor extents are in cell units.
                let (anchor_w, anchor_h) = anchors[b];
                let decoded = decode_box(
                    [
                        slice[0] as f64,
                        slice[1] as f64,
                        slice[2] as f64,
                        slice[3] as f64,
                    ],
                    row,
                    col,
                    grid_stride,
                    anchor_w * grid_stride,
                    anchor_h * grid_stride,
                );
                boxes.push(decoded.into_detection(class, prob));
            }
        }
    }

    boxes
}

fn decode_corner_regression(
    tensor: &[f32],
    geometry: &GeometryConfig,
    thresholds: Thresholds,
    total_boxes: usize,
    frame: Resolution,
) -> Vec<DetectionBox> {
    let box_stride = geometry.box_stride();
    let mut boxes = Vec::new();

    for b in 0..total_boxes {
        let slice = &tensor[b * box_stride..(b + 1) * box_stride];

        let objectness = slice[4] as f64;
        if objectness <= thresholds.objectness {
            continue;
        }

        let (class, prob) = argmax_class(&slice[BOX_CHANNELS..]);
        if prob <= thresholds.class_prob {
            continue;
        }

        // Normalized corners scaled by the frame dimensions.
        let x = slice[0] as f64 * frame.width as f64;
        let y = slice[1] as f64 * frame.height as f64;
        let width = slice[2] as f64 * frame.width as f64 - x;
        let height = slice[3] as f64 * frame.height as f64 - y;

        boxes.push(DetectionBox {
            x,
            y,
            width,
            height,
            label: class,
            prob,
        });
    }

    boxes
}

fn prediction_from_box(detection: &DetectionBox, labels: Option<&LabelTable>) -> Prediction {
    let mut node = Prediction::with_bbox(BoundingBox::new(
        detection.x as i32,
        detection.y as i32,
        detection.width.max(0.0) as u32,
        detection.height.max(0.0) as u32,
    ));
    node.enabled = true;

    let class_label = labels
        .and_then(|table| table.get(detection.label))
        .map(str::to_string);
    let label_vec = labels.map(LabelTable::to_vec);
    node.append_classification(Classification::new(
        detection.label,
        detection.prob,
        class_label,
        Vec::new(),
        label_vec,
    ));
    node
}

/// Argmax classification over a whole-frame probability tensor.
///
/// Retains the full probability vector. An empty tensor is an internal
/// consistency failure.
pub fn build_classification_node(
    tensor: &[f32],
    labels: Option<&LabelTable>,
) -> Result<Classification> {
    if tensor.is_empty() {
        return Err(anyhow!("classification tensor is empty"));
    }

    let (class, prob) = argmax_class(tensor);
    let class_label = labels.and_then(|table| table.get(class)).map(str::to_string);

    Ok(Classification::new(
        class,
        prob,
        class_label,
        tensor.iter().map(|&p| p as f64).collect(),
        labels.map(LabelTable::to_vec),
    ))
}
