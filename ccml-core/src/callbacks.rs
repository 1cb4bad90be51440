//! Training callbacks — the callback trait, built-ins, and list building from config.

use crate::error::{CcmlError, Result};
use crate::factory::{Instance, NodeOutput, NodeValue, ObjectRegistry, Resolved, from_params};
use crate::identifiers::RunContext;
use crate::paths::provision_path;
use crate::training::history::{EpochLogs, History};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

/// Action a callback can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
    Checkpoint,
}

/// Trait for training callbacks.
pub trait TrainingCallback: Send + Sync {
    fn name(&self) -> &str;

    /// Called at the end of each epoch with the epoch number and its logs.
    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs) -> CallbackAction;

    /// Called once after the last epoch.
    fn on_train_end(&mut self, _history: &History) -> Result<()> {
        Ok(())
    }
}

/// Resolve each descriptor in order.
pub fn resolve_list(registry: &ObjectRegistry, descriptors: &[Value]) -> Result<Vec<Resolved>> {
    descriptors.iter().map(|d| registry.resolve_value(d)).collect()
}

/// Resolve descriptors into callback objects. Anything that is not a callback is rejected.
pub fn create_callbacks(
    registry: &ObjectRegistry,
    descriptors: &[Value],
) -> Result<Vec<Box<dyn TrainingCallback>>> {
    descriptors
        .iter()
        .map(|d| {
            registry
                .resolve_value(d)?
                .downcast::<Box<dyn TrainingCallback>>()
                .map(|boxed| *boxed)
                .map_err(|_| CcmlError::config(format!("{d} does not describe a training callback")))
        })
        .collect()
}

/// Resolve descriptors and wrap the list under `"callbacks"`.
pub fn create_callbacks_node(registry: &ObjectRegistry, descriptors: &[Value]) -> Result<NodeOutput> {
    let callbacks = resolve_list(registry, descriptors)?;
    Ok(NodeOutput::from([(
        "callbacks".to_string(),
        NodeValue::List(callbacks),
    )]))
}

fn default_val_loss() -> String {
    "val_loss".to_string()
}

fn default_loss() -> String {
    "loss".to_string()
}

fn monitored(name: &str, monitor: &str, logs: &EpochLogs) -> Option<f64> {
    let value = logs.get(monitor).copied();
    if value.is_none() {
        warn!(callback = name, monitor, "Monitored metric missing from epoch logs");
    }
    value
}

/// Early stopping callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EarlyStopping {
    #[serde(default = "default_val_loss")]
    pub monitor: String,
    #[serde(default)]
    pub patience: usize,
    #[serde(default)]
    pub min_delta: f64,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(monitor: &str, patience: usize, min_delta: f64) -> Self {
        Self {
            monitor: monitor.to_string(),
            patience,
            min_delta,
            counter: 0,
            best: None,
        }
    }

    fn observe(&mut self, value: f64) -> CallbackAction {
        match self.best {
            Some(best) if value >= best - self.min_delta => {
                self.counter += 1;
                if self.counter >= self.patience {
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }
            _ => {
                self.best = Some(value);
                self.counter = 0;
                CallbackAction::Continue
            }
        }
    }
}

impl TrainingCallback for EarlyStopping {
    fn name(&self) -> &str {
        "early_stopping"
    }

    fn on_epoch_end(&mut self, _epoch: usize, logs: &EpochLogs) -> CallbackAction {
        match monitored(self.name(), &self.monitor, logs) {
            Some(value) => self.observe(value),
            None => CallbackAction::Continue,
        }
    }
}

fn default_threshold() -> f64 {
    3.0
}

fn default_window() -> usize {
    5
}

/// Stops on NaN/Inf or a spike above `threshold` times the recent mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnomalyDetection {
    #[serde(default = "default_loss")]
    pub monitor: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_window")]
    pub window_size: usize,
    #[serde(skip)]
    window: Vec<f64>,
}

impl AnomalyDetection {
    pub fn new(threshold: f64, window_size: usize) -> Self {
        Self {
            monitor: default_loss(),
            threshold,
            window_size,
            window: Vec::new(),
        }
    }

    fn observe(&mut self, value: f64) -> CallbackAction {
        if !value.is_finite() {
            return CallbackAction::Stop;
        }

        self.window.push(value);
        if self.window.len() > self.window_size {
            self.window.remove(0);
        }

        if self.window.len() >= 3 {
            let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
            if value > mean * self.threshold {
                return CallbackAction::Stop;
            }
        }

        CallbackAction::Continue
    }
}

impl TrainingCallback for AnomalyDetection {
    fn name(&self) -> &str {
        "anomaly_detection"
    }

    fn on_epoch_end(&mut self, _epoch: usize, logs: &EpochLogs) -> CallbackAction {
        match monitored(self.name(), &self.monitor, logs) {
            Some(value) => self.observe(value),
            None => CallbackAction::Continue,
        }
    }
}

fn default_frequency() -> usize {
    1
}

/// Requests a checkpoint every `frequency` epochs, or on improvement when `save_best_only`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelCheckpoint {
    #[serde(default = "default_frequency")]
    pub frequency: usize,
    #[serde(default = "default_val_loss")]
    pub monitor: String,
    #[serde(default)]
    pub save_best_only: bool,
    #[serde(skip)]
    epoch_counter: usize,
    #[serde(skip)]
    best: Option<f64>,
}

impl TrainingCallback for ModelCheckpoint {
    fn name(&self) -> &str {
        "model_checkpoint"
    }

    fn on_epoch_end(&mut self, _epoch: usize, logs: &EpochLogs) -> CallbackAction {
        if self.save_best_only {
            let Some(value) = monitored(self.name(), &self.monitor, logs) else {
                return CallbackAction::Continue;
            };
            if self.best.is_none_or(|best| value < best) {
                self.best = Some(value);
                return CallbackAction::Checkpoint;
            }
            return CallbackAction::Continue;
        }

        self.epoch_counter += 1;
        if self.epoch_counter >= self.frequency.max(1) {
            self.epoch_counter = 0;
            CallbackAction::Checkpoint
        } else {
            CallbackAction::Continue
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HistoryLoggerParams {
    path: String,
}

/// Writes the final history as JSON to a path templated with run identifiers.
#[derive(Debug, Clone)]
pub struct HistoryLogger {
    path: PathBuf,
}

impl HistoryLogger {
    /// Provisions `template` right away so a bad template fails at construction.
    pub fn new(ctx: &RunContext, template: &str) -> Result<Self> {
        Ok(Self {
            path: provision_path(ctx, template)?,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TrainingCallback for HistoryLogger {
    fn name(&self) -> &str {
        "history_logger"
    }

    fn on_epoch_end(&mut self, _epoch: usize, _logs: &EpochLogs) -> CallbackAction {
        CallbackAction::Continue
    }

    fn on_train_end(&mut self, history: &History) -> Result<()> {
        history.save(&self.path)?;
        info!(path = %self.path.display(), epochs = history.len(), "Wrote training history");
        Ok(())
    }
}

fn boxed(callback: impl TrainingCallback + 'static) -> Instance {
    Box::new(Box::new(callback) as Box<dyn TrainingCallback>)
}

fn register_callback<C>(registry: &mut ObjectRegistry, path: &'static str) -> Result<()>
where
    C: TrainingCallback + DeserializeOwned + 'static,
{
    registry.register_constructor(path, move |params| Ok(boxed(from_params::<C>(path, params)?)))
}

pub fn register(registry: &mut ObjectRegistry, ctx: &RunContext) -> Result<()> {
    register_callback::<EarlyStopping>(registry, "ccml.callbacks.EarlyStopping")?;
    register_callback::<AnomalyDetection>(registry, "ccml.callbacks.AnomalyDetection")?;
    register_callback::<ModelCheckpoint>(registry, "ccml.callbacks.ModelCheckpoint")?;

    let ctx = ctx.clone();
    registry.register_constructor("ccml.callbacks.HistoryLogger", move |params| {
        let params: HistoryLoggerParams = from_params("ccml.callbacks.HistoryLogger", params)?;
        Ok(boxed(HistoryLogger::new(&ctx, &params.path)?))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logs(pairs: &[(&str, f64)]) -> EpochLogs {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn registry(ctx: &RunContext) -> ObjectRegistry {
        let mut r = ObjectRegistry::new();
        register(&mut r, ctx).unwrap();
        r
    }

    #[test]
    fn test_early_stopping() {
        let mut cb = EarlyStopping::new("loss", 2, 0.01);
        let l = |v| logs(&[("loss", v)]);
        assert_eq!(cb.on_epoch_end(1, &l(0.5)), CallbackAction::Continue); // best=0.5
        assert_eq!(cb.on_epoch_end(2, &l(0.4)), CallbackAction::Continue); // improves
        assert_eq!(cb.on_epoch_end(3, &l(0.4)), CallbackAction::Continue); // wait 1
        assert_eq!(cb.on_epoch_end(4, &l(0.4)), CallbackAction::Stop); // wait 2
    }

    #[test]
    fn test_early_stopping_zero_patience_stops_on_first_plateau() {
        let mut cb = EarlyStopping::new("loss", 0, 0.0);
        let l = |v| logs(&[("loss", v)]);
        assert_eq!(cb.on_epoch_end(0, &l(1.0)), CallbackAction::Continue);
        assert_eq!(cb.on_epoch_end(1, &l(1.0)), CallbackAction::Stop);
    }

    #[test]
    fn test_early_stopping_missing_metric_continues() {
        let mut cb = EarlyStopping::new("val_loss", 0, 0.0);
        for epoch in 0..5 {
            assert_eq!(
                cb.on_epoch_end(epoch, &logs(&[("loss", 1.0)])),
                CallbackAction::Continue
            );
        }
    }

    #[test]
    fn test_anomaly_nan() {
        let mut cb = AnomalyDetection::new(3.0, 5);
        assert_eq!(
            cb.on_epoch_end(1, &logs(&[("loss", f64::NAN)])),
            CallbackAction::Stop
        );
    }

    #[test]
    fn test_anomaly_spike() {
        let mut cb = AnomalyDetection::new(2.0, 5);
        for v in [1.0, 1.0, 1.0] {
            assert_eq!(cb.on_epoch_end(0, &logs(&[("loss", v)])), CallbackAction::Continue);
        }
        assert_eq!(cb.on_epoch_end(0, &logs(&[("loss", 10.0)])), CallbackAction::Stop);
    }

    #[test]
    fn test_resolve_list_empty_and_ordered() {
        let r = registry(&RunContext::new());
        assert!(resolve_list(&r, &[]).unwrap().is_empty());

        let callbacks = create_callbacks(
            &r,
            &[
                json!({"type": "ccml.callbacks.ModelCheckpoint", "params": {"frequency": 2}}),
                json!({"type": "ccml.callbacks.EarlyStopping", "params": {"patience": 3}}),
                json!({"type": "ccml.callbacks.AnomalyDetection"}),
            ],
        )
        .unwrap();
        let names: Vec<&str> = callbacks.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["model_checkpoint", "early_stopping", "anomaly_detection"]);
    }

    #[test]
    fn test_create_callbacks_rejects_non_callbacks() {
        let mut r = registry(&RunContext::new());
        r.register_value("tests.consts.answer", 42u32).unwrap();
        let err = create_callbacks(&r, &[json!({"function": "tests.consts.answer"})])
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_callbacks_node() {
        let r = registry(&RunContext::new());
        let out = create_callbacks_node(&r, &[json!({"type": "ccml.callbacks.EarlyStopping"})]).unwrap();
        match &out["callbacks"] {
            NodeValue::List(items) => assert_eq!(items.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_checkpoint_frequency_and_best() {
        let mut every_two: ModelCheckpoint = from_params("t", &serde_json::Map::new()).unwrap();
        every_two.frequency = 2;
        let l = logs(&[("val_loss", 1.0)]);
        assert_eq!(every_two.on_epoch_end(0, &l), CallbackAction::Continue);
        assert_eq!(every_two.on_epoch_end(1, &l), CallbackAction::Checkpoint);

        let mut best: ModelCheckpoint =
            serde_json::from_value(json!({"save_best_only": true})).unwrap();
        assert_eq!(best.on_epoch_end(0, &logs(&[("val_loss", 1.0)])), CallbackAction::Checkpoint);
        assert_eq!(best.on_epoch_end(1, &logs(&[("val_loss", 2.0)])), CallbackAction::Continue);
        assert_eq!(best.on_epoch_end(2, &logs(&[("val_loss", 0.5)])), CallbackAction::Checkpoint);
    }

    #[test]
    fn test_history_logger_writes_to_templated_path() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new().with_run_id("run42");
        let r = registry(&ctx);
        let template = format!("{}/$RUN_ID/history.json", dir.path().display());
        let mut callbacks = create_callbacks(
            &r,
            &[json!({"type": "ccml.callbacks.HistoryLogger", "params": {"path": template}})],
        )
        .unwrap();

        let mut history = History::new();
        history.record_epoch(0, &logs(&[("loss", 0.25)]));
        callbacks[0].on_train_end(&history).unwrap();

        let written = History::load(&dir.path().join("run42/history.json")).unwrap();
        assert_eq!(written, history);
    }

    #[test]
    fn test_history_logger_unset_identifier() {
        let r = registry(&RunContext::new());
        let err = create_callbacks(
            &r,
            &[json!({"type": "ccml.callbacks.HistoryLogger", "params": {"path": "out/$RUN_ID/h.json"}})],
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
    }
}
