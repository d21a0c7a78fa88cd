//! Hierarchical prediction model.
//!
//! Inference results are represented as a tree rooted at the whole frame:
//! - The root node stands for the frame itself and is never a detection.
//! - Children are detected regions; a child may carry further
//!   classifications or nested child predictions of its own.
//!
//! Each node owns its classifications and children outright (owned tree of
//! owned nodes). Node ids are assigned from a global monotonic counter and
//! survive deep copies, which is what lets a rescaled copy on a second buffer
//! be correlated back to its original.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::frame::Resolution;

static NEXT_PREDICTION_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_CLASSIFICATION_ID: AtomicU64 = AtomicU64::new(0);

fn new_prediction_id() -> u64 {
    NEXT_PREDICTION_ID.fetch_add(1, Ordering::Relaxed)
}

fn new_classification_id() -> u64 {
    NEXT_CLASSIFICATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Size and position of a prediction region, in pixels, relative to one
/// specific video resolution.
///
/// The zero box (all fields zero) denotes "whole frame" by convention and is
/// the state of a freshly created root node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One class assignment attached to a prediction node.
///
/// `class_id` indexes into `probabilities` when the full vector is present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Classification {
    /// Unique id for this specific classification.
    pub id: u64,
    /// Numerical id of the assigned class.
    pub class_id: i32,
    /// Probability of the assigned class, typically in [0, 1].
    pub class_prob: f64,
    /// Label of the assigned class, when a label table was available.
    pub class_label: Option<String>,
    /// The entire probability vector of the prediction.
    pub probabilities: Vec<f64>,
    /// The entire label table of the prediction, when available.
    pub labels: Option<Vec<String>>,
}

impl Classification {
    pub fn new(
        class_id: i32,
        class_prob: f64,
        class_label: Option<String>,
        probabilities: Vec<f64>,
        labels: Option<Vec<String>>,
    ) -> Self {
        debug_assert!(
            probabilities.is_empty() || (class_id as usize) < probabilities.len(),
            "class_id must index into the probability vector"
        );
        Self {
            id: new_classification_id(),
            class_id,
            class_prob,
            class_label,
            probabilities,
            labels,
        }
    }
}

/// Node of a prediction tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prediction {
    /// Opaque correlation key, monotonically assigned and preserved by
    /// copies and rescales.
    pub id: u64,
    /// Whether downstream consumers should process this node. External
    /// filters may toggle it; copy, scale and merge preserve it verbatim.
    pub enabled: bool,
    pub bbox: BoundingBox,
    /// Ordered: insertion order is significant to consumers.
    pub classifications: Vec<Classification>,
    /// Ordered child predictions nested within this region.
    pub children: Vec<Prediction>,
}

impl Default for Prediction {
    fn default() -> Self {
        Self::new()
    }
}

impl Prediction {
    /// A fresh node: zero bbox, no classifications, no children, disabled
    /// until populated.
    pub fn new() -> Self {
        Self {
            id: new_prediction_id(),
            enabled: false,
            bbox: BoundingBox::default(),
            classifications: Vec::new(),
            children: Vec::new(),
        }
    }

    /// A fresh node covering the given region.
    pub fn with_bbox(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            ..Self::new()
        }
    }

    /// Append a child prediction, preserving sibling order.
    pub fn append_child(&mut self, child: Prediction) {
        self.children.push(child);
    }

    /// Append a classification, preserving insertion order.
    pub fn append_classification(&mut self, classification: Classification) {
        self.classifications.push(classification);
    }

    /// Depth-first preorder search by id, children in insertion order.
    pub fn find_by_id(&self, id: u64) -> Option<&Prediction> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_id(id))
    }

    /// Mutable variant of [`find_by_id`](Self::find_by_id).
    pub fn find_by_id_mut(&mut self, id: u64) -> Option<&mut Prediction> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_id_mut(id))
    }

    /// True iff at least one node below the root is enabled. The root's own
    /// flag does not count: it stands for the frame, not a detection.
    pub fn is_any_enabled(&self) -> bool {
        self.children
            .iter()
            .any(|child| child.enabled || child.is_any_enabled())
    }

    /// Scale every bbox in the subtree in place from one resolution to
    /// another.
    ///
    /// `from` must have non-zero dimensions.
    pub fn scale_in_place(&mut self, to: Resolution, from: Resolution) {
        assert!(
            from.width > 0 && from.height > 0,
            "source resolution must be non-zero"
        );

        let hfactor = to.width as f64 / from.width as f64;
        let vfactor = to.height as f64 / from.height as f64;

        self.scale_by_factors(hfactor, vfactor);
    }

    /// Return a deep copy with every bbox in the subtree linearly rescaled.
    /// Node ids and enabled flags carry over unchanged.
    pub fn scale(&self, to: Resolution, from: Resolution) -> Prediction {
        let mut scaled = self.clone();
        scaled.scale_in_place(to, from);
        scaled
    }

    fn scale_by_factors(&mut self, hfactor: f64, vfactor: f64) {
        self.bbox.x = (self.bbox.x as f64 * hfactor) as i32;
        self.bbox.y = (self.bbox.y as f64 * vfactor) as i32;
        self.bbox.width = (self.bbox.width as f64 * hfactor) as u32;
        self.bbox.height = (self.bbox.height as f64 * vfactor) as u32;

        for child in &mut self.children {
            child.scale_by_factors(hfactor, vfactor);
        }
    }

    /// Merge the extra information of `src` into this node.
    ///
    /// Classifications missing by id are copied over; child predictions are
    /// matched by id and merged recursively, unmatched ones are appended as
    /// deep copies. Both nodes must share the same id.
    pub fn merge_from(&mut self, src: &Prediction) {
        debug_assert_eq!(self.id, src.id, "merge requires matching node ids");

        for classification in &src.classifications {
            let exists = self
                .classifications
                .iter()
                .any(|c| c.id == classification.id);
            if !exists {
                self.classifications.push(classification.clone());
            }
        }

        for child in &src.children {
            if let Some(found) = self.find_by_id_mut(child.id) {
                found.merge_from(child);
                continue;
            }
            self.children.push(child.clone());
        }
    }

    /// Serialize the whole tree as JSON, mostly for debug logging.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "<unserializable>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x: i32, y: i32, w: u32, h: u32) -> Prediction {
        let mut p = Prediction::with_bbox(BoundingBox::new(x, y, w, h));
        p.enabled = true;
        p
    }

    #[test]
    fn new_prediction_is_disabled_zero_box() {
        let p = Prediction::new();

        assert!(!p.enabled);
        assert_eq!(p.bbox, BoundingBox::default());
        assert!(p.classifications.is_empty());
        assert!(p.children.is_empty());
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = Prediction::new();
        let b = Prediction::new();

        assert!(b.id > a.id);
    }

    #[test]
    fn deep_copy_preserves_ids_and_flags() {
        let mut root = Prediction::new();
        let mut child = detection(10, 10, 20, 20);
        child.enabled = false;
        let child_id = child.id;
        root.append_child(child);

        let copy = root.clone();

        assert_eq!(copy.id, root.id);
        assert_eq!(copy.children[0].id, child_id);
        assert!(!copy.children[0].enabled);
    }

    #[test]
    fn find_by_id_traverses_depth_first() {
        let mut root = Prediction::new();
        let mut outer = detection(0, 0, 100, 100);
        let inner = detection(10, 10, 20, 20);
        let inner_id = inner.id;
        outer.append_child(inner);
        root.append_child(outer);

        let found = root.find_by_id(inner_id).expect("nested node");
        assert_eq!(found.bbox.width, 20);

        assert!(root.find_by_id(u64::MAX).is_none());
    }

    #[test]
    fn is_any_enabled_ignores_the_root() {
        let mut root = Prediction::new();
        root.enabled = true;
        assert!(!root.is_any_enabled());

        let mut child = detection(0, 0, 10, 10);
        child.enabled = false;
        root.append_child(child);
        assert!(!root.is_any_enabled());

        root.children[0].enabled = true;
        assert!(root.is_any_enabled());
    }

    #[test]
    fn is_any_enabled_sees_deep_descendants() {
        let mut root = Prediction::new();
        let mut outer = detection(0, 0, 100, 100);
        outer.enabled = false;
        outer.append_child(detection(5, 5, 10, 10));
        root.append_child(outer);

        assert!(root.is_any_enabled());
    }

    #[test]
    fn scale_applies_to_every_node() {
        let mut root = Prediction::new();
        let mut outer = detection(10, 20, 100, 50);
        outer.append_child(detection(20, 30, 40, 10));
        root.append_child(outer);

        let from = Resolution::new(100, 100);
        let to = Resolution::new(200, 400);
        let scaled = root.scale(to, from);

        let outer = &scaled.children[0];
        assert_eq!(outer.bbox, BoundingBox::new(20, 80, 200, 200));
        let inner = &outer.children[0];
        assert_eq!(inner.bbox, BoundingBox::new(40, 120, 80, 40));

        // Original untouched, ids preserved.
        assert_eq!(root.children[0].bbox.x, 10);
        assert_eq!(scaled.children[0].id, root.children[0].id);
    }

    #[test]
    fn scale_round_trip_recovers_coordinates() {
        let mut root = Prediction::new();
        root.append_child(detection(16, 24, 320, 240));

        let a = Resolution::new(640, 480);
        let b = Resolution::new(1920, 1080);
        let round_tripped = root.scale(b, a).scale(a, b);

        let original = &root.children[0].bbox;
        let recovered = &round_tripped.children[0].bbox;
        assert!((original.x - recovered.x).abs() <= 1);
        assert!((original.y - recovered.y).abs() <= 1);
        assert!((original.width as i64 - recovered.width as i64).abs() <= 1);
        assert!((original.height as i64 - recovered.height as i64).abs() <= 1);
    }

    #[test]
    fn merge_copies_missing_classifications_and_children() {
        let mut dst = Prediction::new();
        let mut src = dst.clone();

        src.append_classification(Classification::new(2, 0.8, None, vec![0.1, 0.1, 0.8], None));
        let extra = detection(0, 0, 10, 10);
        let extra_id = extra.id;
        src.append_child(extra);

        dst.merge_from(&src);

        assert_eq!(dst.classifications.len(), 1);
        assert_eq!(dst.children.len(), 1);
        assert_eq!(dst.children[0].id, extra_id);
        assert!(dst.children[0].enabled);

        // Idempotent: merging again adds nothing.
        dst.merge_from(&src);
        assert_eq!(dst.classifications.len(), 1);
        assert_eq!(dst.children.len(), 1);
    }

    #[test]
    fn tree_serializes_to_json() {
        let mut root = Prediction::new();
        root.append_child(detection(1, 2, 3, 4));

        let json = root.to_json();
        let parsed: Prediction = serde_json::from_str(&json).expect("round trip");

        assert_eq!(parsed.children.len(), 1);
        assert_eq!(parsed.children[0].bbox, BoundingBox::new(1, 2, 3, 4));
    }
}
