//! Box geometry primitives.
//!
//! This module provides the pure math used by tensor postprocessing:
//! - Intersection over union between corner-form boxes
//! - Anchor/grid box decoding (sigmoid/exponential reparameterization)
//! - Greedy IoU-based duplicate suppression
//!
//! No I/O, no allocation beyond the in-place suppression. All functions are
//! infallible; `decode_box` requires a positive grid stride (caller contract).

/// Flat detection box exchanged between tensor decode and tree building.
///
/// Corner form: `(x, y)` is the upper-left corner in pixels relative to one
/// specific video resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub label: i32,
    pub prob: f64,
}

/// A decoded anchor box in center form, before corner conversion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodedBox {
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
}

/// Logistic sigmoid, `1 / (1 + e^-x)`.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Intersection over union of two corner-form boxes.
///
/// Returns 0 when the boxes do not overlap or the union area is not
/// positive. Symmetric in its arguments; a positive-area box against itself
/// yields exactly 1.0.
pub fn intersection_over_union(a: &DetectionBox, b: &DetectionBox) -> f64 {
    let overlap_w = (a.x + a.width).min(b.x + b.width) - a.x.max(b.x);
    let overlap_h = (a.y + a.height).min(b.y + b.height) - a.y.max(b.y);

    let intersection = if overlap_w < 0.0 || overlap_h < 0.0 {
        0.0
    } else {
        overlap_w * overlap_h
    };

    let union = a.width * a.height + b.width * b.height - intersection;
    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

/// Decode a raw anchor-box prediction into a center-form pixel box.
///
/// The center is `(sigmoid(tx) + col, sigmoid(ty) + row)` scaled by the grid
/// stride; the extent is `exp(tw) * anchor_width` by `exp(th) * anchor_height`.
/// This is the YOLO-style reparameterization; detector families using direct
/// corner regression bypass this decode entirely.
///
/// `grid_stride` must be positive.
pub fn decode_box(
    raw: [f64; 4],
    grid_row: usize,
    grid_col: usize,
    grid_stride: f64,
    anchor_width: f64,
    anchor_height: f64,
) -> DecodedBox {
    debug_assert!(grid_stride > 0.0, "grid stride must be positive");

    let [tx, ty, tw, th] = raw;

    DecodedBox {
        cx: (grid_col as f64 + sigmoid(tx)) * grid_stride,
        cy: (grid_row as f64 + sigmoid(ty)) * grid_stride,
        width: tw.exp() * anchor_width,
        height: th.exp() * anchor_height,
    }
}

impl DecodedBox {
    /// Convert to a corner-form detection box with the given label and score.
    pub fn into_detection(self, label: i32, prob: f64) -> DetectionBox {
        DetectionBox {
            x: self.cx - self.width * 0.5,
            y: self.cy - self.height * 0.5,
            width: self.width,
            height: self.height,
            label,
            prob,
        }
    }
}

/// Remove duplicated boxes in place.
///
/// Two boxes sharing the same label whose IoU is strictly above the threshold
/// are duplicates; the one with the lower probability is deleted. The scan
/// position restarts after each deletion because the indices shift, and equal
/// probabilities delete the earlier box. This greedy quadratic pass is
/// idempotent: running it on its own output changes nothing.
pub fn suppress_duplicates(boxes: &mut Vec<DetectionBox>, iou_thresh: f64) {
    let mut i = 0;
    while i + 1 < boxes.len() {
        let mut j = i + 1;
        let mut deleted_outer = false;
        while j < boxes.len() {
            if boxes[i].label == boxes[j].label {
                let iou = intersection_over_union(&boxes[i], &boxes[j]);
                if iou > iou_thresh {
                    if boxes[i].prob > boxes[j].prob {
                        boxes.remove(j);
                        // j now points at the next candidate already
                        continue;
                    } else {
                        boxes.remove(i);
                        deleted_outer = true;
                        break;
                    }
                }
            }
            j += 1;
        }
        if !deleted_outer {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(x: f64, y: f64, w: f64, h: f64, label: i32, prob: f64) -> DetectionBox {
        DetectionBox {
            x,
            y,
            width: w,
            height: h,
            label,
            prob,
        }
    }

    #[test]
    fn iou_is_symmetric() {
        let a = boxed(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        let b = boxed(5.0, 5.0, 10.0, 10.0, 0, 0.8);

        assert_eq!(
            intersection_over_union(&a, &b),
            intersection_over_union(&b, &a)
        );
    }

    #[test]
    fn iou_of_box_with_itself_is_one() {
        let a = boxed(3.0, 7.0, 12.0, 9.0, 0, 0.5);

        assert_eq!(intersection_over_union(&a, &a), 1.0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = boxed(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        let b = boxed(20.0, 20.0, 10.0, 10.0, 0, 0.8);

        assert_eq!(intersection_over_union(&a, &b), 0.0);
    }

    #[test]
    fn iou_of_degenerate_boxes_is_zero() {
        let a = boxed(0.0, 0.0, 0.0, 0.0, 0, 0.0);

        assert_eq!(intersection_over_union(&a, &a), 0.0);
    }

    #[test]
    fn decode_box_pins_documented_example() {
        let decoded = decode_box([0.0, 0.0, 0.0, 0.0], 2, 3, 32.0, 2.0, 2.0);

        // sigmoid(0) = 0.5, so the center lands mid-cell.
        assert_eq!(decoded.cx, (3.0 + 0.5) * 32.0);
        assert_eq!(decoded.cy, (2.0 + 0.5) * 32.0);
        assert_eq!(decoded.cx, 112.0);
        assert_eq!(decoded.cy, 80.0);
        // exp(0) = 1, extent equals the anchor.
        assert_eq!(decoded.width, 2.0);
        assert_eq!(decoded.height, 2.0);
    }

    #[test]
    fn decoded_box_corner_conversion() {
        let decoded = DecodedBox {
            cx: 100.0,
            cy: 50.0,
            width: 20.0,
            height: 10.0,
        };
        let det = decoded.into_detection(4, 0.75);

        assert_eq!(det.x, 90.0);
        assert_eq!(det.y, 45.0);
        assert_eq!(det.label, 4);
        assert_eq!(det.prob, 0.75);
    }

    #[test]
    fn suppression_keeps_higher_probability_box() {
        let mut boxes = vec![
            boxed(0.0, 0.0, 10.0, 10.0, 1, 0.9),
            boxed(1.0, 1.0, 10.0, 10.0, 1, 0.6),
        ];

        // IoU is 81/119 ~= 0.68, above the 0.3 threshold.
        suppress_duplicates(&mut boxes, 0.3);

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].prob, 0.9);
        assert_eq!(boxes[0].x, 0.0);
    }

    #[test]
    fn suppression_ignores_different_labels() {
        let mut boxes = vec![
            boxed(0.0, 0.0, 10.0, 10.0, 1, 0.9),
            boxed(1.0, 1.0, 10.0, 10.0, 2, 0.6),
        ];

        suppress_duplicates(&mut boxes, 0.3);

        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn suppression_respects_threshold_boundary() {
        let mut boxes = vec![
            boxed(0.0, 0.0, 10.0, 10.0, 1, 0.9),
            boxed(1.0, 1.0, 10.0, 10.0, 1, 0.6),
        ];
        let iou = intersection_over_union(&boxes[0], &boxes[1]);

        // Strict comparison: IoU equal to the threshold is not a duplicate.
        suppress_duplicates(&mut boxes, iou);

        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn suppression_is_idempotent() {
        let mut boxes = vec![
            boxed(0.0, 0.0, 10.0, 10.0, 1, 0.9),
            boxed(1.0, 1.0, 10.0, 10.0, 1, 0.6),
            boxed(2.0, 2.0, 10.0, 10.0, 1, 0.8),
            boxed(40.0, 40.0, 10.0, 10.0, 1, 0.7),
            boxed(41.0, 41.0, 8.0, 8.0, 2, 0.3),
        ];

        suppress_duplicates(&mut boxes, 0.3);
        let first_pass = boxes.clone();
        suppress_duplicates(&mut boxes, 0.3);

        assert_eq!(boxes, first_pass);
    }

    #[test]
    fn suppression_rescans_after_deleting_outer_box() {
        // The middle box beats the first, then survives against the third.
        let mut boxes = vec![
            boxed(0.0, 0.0, 10.0, 10.0, 1, 0.5),
            boxed(1.0, 1.0, 10.0, 10.0, 1, 0.9),
            boxed(2.0, 2.0, 10.0, 10.0, 1, 0.6),
        ];

        suppress_duplicates(&mut boxes, 0.3);

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].prob, 0.9);
    }
}
