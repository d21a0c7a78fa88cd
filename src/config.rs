//! Engine configuration.
//!
//! Responsibilities:
//! - Layer defaults, an optional JSON config file and `INFERMUX_*`
//!   environment overrides into an [`EngineConfig`]
//! - Validate everything before the pipeline can reach the running state
//! - Hold the postprocessing score cutoffs in a [`SharedThresholds`] that
//!   can be updated while the pipeline runs

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const DEFAULT_MODEL_LOCATION: &str = "model.onnx";
const DEFAULT_MODEL_WIDTH: u32 = 416;
const DEFAULT_MODEL_HEIGHT: u32 = 416;
const DEFAULT_OBJECTNESS_THRESHOLD: f64 = 0.30;
const DEFAULT_CLASS_PROB_THRESHOLD: f64 = 0.30;
const DEFAULT_IOU_THRESHOLD: f64 = 0.30;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    model_location: Option<String>,
    labels: Option<String>,
    model: Option<ModelConfigFile>,
    thresholds: Option<ThresholdConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdConfigFile {
    objectness: Option<f64>,
    class_prob: Option<f64>,
    iou: Option<f64>,
}

/// Engine configuration assembled from defaults, an optional JSON config
/// file, and environment overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_location: PathBuf,
    /// Semicolon-delimited label string, if one was supplied.
    pub labels: Option<String>,
    pub model_width: u32,
    pub model_height: u32,
    pub thresholds: Thresholds,
}

/// Score cutoffs applied during postprocessing. All comparisons against
/// these are strict: a score exactly equal to the cutoff is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Thresholds {
    pub objectness: f64,
    pub class_prob: f64,
    pub iou: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            objectness: DEFAULT_OBJECTNESS_THRESHOLD,
            class_prob: DEFAULT_CLASS_PROB_THRESHOLD,
            iou: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("objectness", self.objectness),
            ("class_prob", self.class_prob),
            ("iou", self.iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!(
                    "{} threshold must be within [0, 1], got {}",
                    name,
                    value
                ));
            }
        }
        Ok(())
    }
}

/// Thresholds shared between the owner and in-flight postprocessing.
///
/// Updates take effect on the next frame; postprocessing reads a snapshot
/// under a read lock and never holds it across inference.
#[derive(Clone, Debug, Default)]
pub struct SharedThresholds(Arc<RwLock<Thresholds>>);

impl SharedThresholds {
    pub fn new(thresholds: Thresholds) -> Self {
        Self(Arc::new(RwLock::new(thresholds)))
    }

    pub fn get(&self) -> Thresholds {
        match self.0.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, thresholds: Thresholds) -> Result<()> {
        thresholds.validate()?;
        match self.0.write() {
            Ok(mut guard) => *guard = thresholds,
            Err(poisoned) => *poisoned.into_inner() = thresholds,
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INFERMUX_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let model_location = file
            .model_location
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_LOCATION));
        let model_width = file
            .model
            .as_ref()
            .and_then(|model| model.width)
            .unwrap_or(DEFAULT_MODEL_WIDTH);
        let model_height = file
            .model
            .as_ref()
            .and_then(|model| model.height)
            .unwrap_or(DEFAULT_MODEL_HEIGHT);
        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            objectness: file
                .thresholds
                .as_ref()
                .and_then(|t| t.objectness)
                .unwrap_or(defaults.objectness),
            class_prob: file
                .thresholds
                .as_ref()
                .and_then(|t| t.class_prob)
                .unwrap_or(defaults.class_prob),
            iou: file
                .thresholds
                .as_ref()
                .and_then(|t| t.iou)
                .unwrap_or(defaults.iou),
        };
        Self {
            model_location,
            labels: file.labels,
            model_width,
            model_height,
            thresholds,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(model) = std::env::var("INFERMUX_MODEL") {
            if !model.trim().is_empty() {
                self.model_location = PathBuf::from(model);
            }
        }
        if let Ok(labels) = std::env::var("INFERMUX_LABELS") {
            if !labels.trim().is_empty() {
                self.labels = Some(labels);
            }
        }
        if let Ok(value) = std::env::var("INFERMUX_OBJ_THRESH") {
            self.thresholds.objectness = parse_threshold("INFERMUX_OBJ_THRESH", &value)?;
        }
        if let Ok(value) = std::env::var("INFERMUX_PROB_THRESH") {
            self.thresholds.class_prob = parse_threshold("INFERMUX_PROB_THRESH", &value)?;
        }
        if let Ok(value) = std::env::var("INFERMUX_IOU_THRESH") {
            self.thresholds.iou = parse_threshold("INFERMUX_IOU_THRESH", &value)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.model_width == 0 || self.model_height == 0 {
            return Err(anyhow!("model dimensions must be non-zero"));
        }
        self.thresholds.validate()?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_threshold(name: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("{} must be a number within [0, 1]", name))
}
