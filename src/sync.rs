//! Dual-path frame synchronizer.
//!
//! Responsibilities:
//! - Lifecycle state machine around the predictor (Null/Ready/Running)
//! - The model path: preprocess, predict, postprocess, enqueue
//! - The bypass path: correlate, rescale, attach, forward
//! - Observer notification on every successful merge
//!
//! The synchronizer owns no threads. Callers push records from whatever
//! threads they like; each port queue sits behind its own mutex and the
//! predictor behind a third, so one inference is in flight at a time and
//! the two ports never block each other on queue access. Forwarded records
//! are returned to the pushing caller rather than sent anywhere.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};

use crate::adapter::ModelAdapter;
use crate::frame::FrameRecord;
use crate::predict::Predictor;
use crate::prediction::Prediction;

/// Lifecycle states. Transitions only move one step at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EngineState {
    Null,
    Ready,
    Running,
}

/// Which ports have a consumer attached. A disconnected port makes the
/// other port forward immediately instead of queueing for a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ports {
    pub model: bool,
    pub bypass: bool,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            model: true,
            bypass: true,
        }
    }
}

/// A record leaving the synchronizer, tagged with the port it left on.
#[derive(Clone, Debug)]
pub enum Forwarded {
    Model(FrameRecord),
    Bypass(FrameRecord),
}

impl Forwarded {
    pub fn record(&self) -> &FrameRecord {
        match self {
            Forwarded::Model(record) | Forwarded::Bypass(record) => record,
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Forwarded::Bypass(_))
    }
}

/// Both sides of a successful merge, after rescaling and attachment. Each
/// record carries its tree; the bypass tree is the model tree rescaled to
/// the bypass resolution (merged into any tree already present).
pub struct MergeEvent<'a> {
    pub model: &'a FrameRecord,
    pub bypass: &'a FrameRecord,
}

impl MergeEvent<'_> {
    pub fn model_tree(&self) -> Option<&Prediction> {
        self.model.tree.as_ref()
    }

    pub fn bypass_tree(&self) -> Option<&Prediction> {
        self.bypass.tree.as_ref()
    }
}

type Observer = Box<dyn Fn(&MergeEvent) + Send + Sync>;

/// Reunites inference results with the untouched full-resolution stream.
///
/// See the module docs for the locking discipline. `stop` may race an
/// in-flight push: the push completes against the old queues and the
/// drain takes whatever is left.
pub struct FrameSynchronizer {
    adapter: Box<dyn ModelAdapter>,
    predictor: Mutex<Box<dyn Predictor>>,
    model_location: String,
    ports: Ports,
    state: Mutex<EngineState>,
    model_queue: Mutex<VecDeque<FrameRecord>>,
    bypass_queue: Mutex<VecDeque<FrameRecord>>,
    observers: Mutex<Vec<Observer>>,
}

impl FrameSynchronizer {
    pub fn new(
        adapter: Box<dyn ModelAdapter>,
        predictor: Box<dyn Predictor>,
        model_location: impl Into<String>,
    ) -> Self {
        Self::with_ports(adapter, predictor, model_location, Ports::default())
    }

    pub fn with_ports(
        adapter: Box<dyn ModelAdapter>,
        predictor: Box<dyn Predictor>,
        model_location: impl Into<String>,
        ports: Ports,
    ) -> Self {
        Self {
            adapter,
            predictor: Mutex::new(predictor),
            model_location: model_location.into(),
            ports,
            state: Mutex::new(EngineState::Null),
            model_queue: Mutex::new(VecDeque::new()),
            bypass_queue: Mutex::new(VecDeque::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register a merge observer. Observers run on the thread that pushed
    /// the bypass record, after the merge and before the records are
    /// returned.
    pub fn subscribe(&self, observer: Observer) {
        self.lock_observers().push(observer);
    }

    // ---- lifecycle -------------------------------------------------------

    /// Null -> Ready. Configures the predictor; a failure here is a
    /// configuration error and leaves the synchronizer in Null.
    pub fn prepare(&self) -> Result<()> {
        self.transition(EngineState::Null, EngineState::Ready, || {
            let mut predictor = self.lock_predictor();
            predictor
                .configure(&self.model_location)
                .with_context(|| format!("configuring predictor {}", predictor.name()))?;
            info!(
                "synchronizer prepared: adapter={} predictor={}",
                self.adapter.name(),
                predictor.name()
            );
            Ok(())
        })
    }

    /// Ready -> Running.
    pub fn start(&self) -> Result<()> {
        self.transition(EngineState::Ready, EngineState::Running, || {
            self.lock_predictor().start()?;
            info!("synchronizer running");
            Ok(())
        })
    }

    /// Running -> Ready. Drains and drops both queues.
    pub fn stop(&self) -> Result<()> {
        self.transition(EngineState::Running, EngineState::Ready, || {
            let dropped_model = self.lock_queue(&self.model_queue).drain(..).count();
            let dropped_bypass = self.lock_queue(&self.bypass_queue).drain(..).count();
            if dropped_model + dropped_bypass > 0 {
                warn!(
                    "synchronizer stopped: dropped {} model and {} bypass records",
                    dropped_model, dropped_bypass
                );
            } else {
                info!("synchronizer stopped");
            }
            Ok(())
        })
    }

    /// Ready -> Null. Stops the predictor exactly once.
    pub fn unprepare(&self) -> Result<()> {
        self.transition(EngineState::Ready, EngineState::Null, || {
            self.lock_predictor().stop()?;
            info!("synchronizer unprepared");
            Ok(())
        })
    }

    fn transition(
        &self,
        from: EngineState,
        to: EngineState,
        action: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let mut state = self.lock_state();
        if *state != from {
            return Err(anyhow!(
                "invalid transition: expected {:?}, currently {:?}",
                from,
                *state
            ));
        }
        action()?;
        *state = to;
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.lock_state();
        if *state != EngineState::Running {
            return Err(anyhow!("synchronizer is not running ({:?})", *state));
        }
        Ok(())
    }

    // ---- model path ------------------------------------------------------

    /// Push a record on the model port.
    ///
    /// A record already carrying a tree with no enabled descendant skips
    /// inference entirely and forwards as-is. Otherwise the record runs
    /// through the adapter and predictor; a failure anywhere is returned
    /// to the caller and the record is not enqueued.
    pub fn push_model(&self, mut record: FrameRecord) -> Result<Vec<Forwarded>> {
        self.ensure_running()?;

        let skip_inference = record
            .tree
            .as_ref()
            .is_some_and(|tree| !tree.is_any_enabled());
        if skip_inference {
            trace!("model record has no enabled nodes, skipping inference");
            return Ok(vec![Forwarded::Model(record)]);
        }

        let prepared = self
            .adapter
            .preprocess(&record.frame)
            .context("preprocess failed")?;
        let tensor = {
            let mut predictor = self.lock_predictor();
            predictor.predict(&prepared).context("inference failed")?
        };
        let mut result = self.adapter.postprocess(&tensor)?;
        // Trees are kept in the record's own coordinates.
        result.scale_in_place(record.resolution(), self.adapter.model_resolution());

        record.tree = Some(match record.tree.take() {
            None => result,
            Some(existing) => extend_tree(existing, result),
        });
        debug!(
            "model record processed: {} detections",
            record.tree.as_ref().map_or(0, |t| t.children.len())
        );

        if !self.ports.bypass {
            return Ok(vec![Forwarded::Model(record)]);
        }
        self.lock_queue(&self.model_queue).push_back(record);
        Ok(Vec::new())
    }

    // ---- bypass path -----------------------------------------------------

    /// Push a record on the bypass port and attempt one merge.
    ///
    /// A record already carrying a tree with no enabled descendant needs
    /// no correlation work: it forwards unmodified and never waits on the
    /// model port.
    pub fn push_bypass(&self, record: FrameRecord) -> Result<Vec<Forwarded>> {
        self.ensure_running()?;

        let skip_correlation = record
            .tree
            .as_ref()
            .is_some_and(|tree| !tree.is_any_enabled());
        if skip_correlation {
            trace!("bypass record has no enabled nodes, forwarding without correlation");
            return Ok(vec![Forwarded::Bypass(record)]);
        }

        if !self.ports.model {
            return Ok(vec![Forwarded::Bypass(record)]);
        }

        // Newest in front, oldest out the back.
        let oldest = {
            let mut queue = self.lock_queue(&self.bypass_queue);
            queue.push_front(record);
            queue.pop_back()
        };
        let Some(mut bypass) = oldest else {
            return Ok(Vec::new());
        };

        let popped = self.lock_queue(&self.model_queue).pop_front();
        let Some(mut model) = popped else {
            trace!("no model result queued, bypass record waits");
            self.lock_queue(&self.bypass_queue).push_back(bypass);
            return Ok(Vec::new());
        };

        // Queued model records always carry a tree; treat a bare one as a
        // pass-through rather than stalling.
        let Some(model_tree) = model.tree.take() else {
            warn!("queued model record carries no tree, forwarding both");
            return Ok(vec![Forwarded::Model(model), Forwarded::Bypass(bypass)]);
        };
        let scaled = model_tree.scale(bypass.resolution(), model.resolution());

        match bypass.tree.take() {
            None => {
                debug!("attached rescaled tree to bypass record");
                bypass.tree = Some(scaled);
                model.tree = Some(model_tree);
                self.notify(&model, &bypass);
                Ok(vec![Forwarded::Model(model), Forwarded::Bypass(bypass)])
            }
            Some(mut existing) if existing.find_by_id(scaled.id).is_some() => {
                if let Some(node) = existing.find_by_id_mut(scaled.id) {
                    node.merge_from(&scaled);
                }
                debug!("merged rescaled tree into existing bypass tree");
                bypass.tree = Some(existing);
                model.tree = Some(model_tree);
                self.notify(&model, &bypass);
                Ok(vec![Forwarded::Model(model), Forwarded::Bypass(bypass)])
            }
            Some(existing) => {
                // Unrelated tree: put the model result back in line and let
                // the bypass record through rather than stalling the stream.
                debug!("bypass tree unrelated to queued model result, forwarding unmerged");
                model.tree = Some(model_tree);
                self.lock_queue(&self.model_queue).push_back(model);
                bypass.tree = Some(existing);
                Ok(vec![Forwarded::Bypass(bypass)])
            }
        }
    }

    fn notify(&self, model: &FrameRecord, bypass: &FrameRecord) {
        let event = MergeEvent { model, bypass };
        for observer in self.lock_observers().iter() {
            observer(&event);
        }
    }

    // ---- lock helpers ----------------------------------------------------
    //
    // A poisoned lock means another push panicked; the queues themselves
    // stay structurally sound, so recover the guard and keep going.

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_predictor(&self) -> std::sync::MutexGuard<'_, Box<dyn Predictor>> {
        self.predictor.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_queue<'a>(
        &self,
        queue: &'a Mutex<VecDeque<FrameRecord>>,
    ) -> std::sync::MutexGuard<'a, VecDeque<FrameRecord>> {
        queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<Observer>> {
        self.observers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Graft a fresh inference result onto a record's existing tree: the new
/// root's classifications and children move under the existing root.
fn extend_tree(mut existing: Prediction, result: Prediction) -> Prediction {
    for classification in result.classifications {
        existing.append_classification(classification);
    }
    for child in result.children {
        existing.append_child(child);
    }
    existing
}
