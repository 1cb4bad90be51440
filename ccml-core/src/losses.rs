//! Loss configuration — named built-ins or descriptor mappings — and built-in losses.

use crate::error::{CcmlError, Result};
use crate::factory::{Instance, ObjectRegistry, Resolved, from_params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const EPSILON: f64 = 1e-7;

/// A loss function over one output.
pub trait Loss: Send + Sync {
    fn name(&self) -> &str;

    /// Mean loss of `y_pred` against `y_true`.
    fn compute(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64>;
}

/// Loss as written in configuration: a built-in name or a mapping of output
/// names to descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LossConfig {
    Named(String),
    Mapping(BTreeMap<String, Value>),
}

/// Loss after resolution.
#[derive(Debug)]
pub enum LossSpec {
    /// A loss the training backend knows by name.
    Named(String),
    /// Resolved objects keyed by output name.
    Resolved(BTreeMap<String, Resolved>),
}

impl LossSpec {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Resolved(_) => None,
        }
    }

    /// The resolved loss object for an output, if it is a [`Loss`].
    pub fn loss_for(&self, output: &str) -> Option<&dyn Loss> {
        match self {
            Self::Named(_) => None,
            Self::Resolved(map) => map
                .get(output)
                .and_then(|obj| obj.downcast_ref::<Box<dyn Loss>>())
                .map(|b| &**b),
        }
    }
}

/// Pass names through; resolve every descriptor in a mapping, keeping its key.
pub fn resolve_loss(registry: &ObjectRegistry, loss: &LossConfig) -> Result<LossSpec> {
    match loss {
        LossConfig::Named(name) => Ok(LossSpec::Named(name.clone())),
        LossConfig::Mapping(map) => map
            .iter()
            .map(|(output, descriptor)| Ok((output.clone(), registry.resolve_value(descriptor)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(LossSpec::Resolved),
    }
}

fn check_shapes(name: &str, y_true: &[f64], y_pred: &[f64]) -> Result<()> {
    if y_true.is_empty() || y_true.len() != y_pred.len() {
        return Err(CcmlError::training(format!(
            "{name}: expected equal non-empty inputs, got {} targets and {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }
    Ok(())
}

fn clip(p: f64) -> f64 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Cross-entropy over one one-hot encoded sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoricalCrossentropy {
    #[serde(default)]
    pub from_logits: bool,
    #[serde(default)]
    pub label_smoothing: f64,
}

impl Loss for CategoricalCrossentropy {
    fn name(&self) -> &str {
        "categorical_crossentropy"
    }

    fn compute(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
        check_shapes(self.name(), y_true, y_pred)?;
        let probs = if self.from_logits {
            softmax(y_pred)
        } else {
            y_pred.to_vec()
        };
        let k = y_true.len() as f64;
        Ok(-y_true
            .iter()
            .zip(&probs)
            .map(|(t, p)| {
                let t = t * (1.0 - self.label_smoothing) + self.label_smoothing / k;
                t * clip(*p).ln()
            })
            .sum::<f64>())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryCrossentropy {
    #[serde(default)]
    pub from_logits: bool,
    #[serde(default)]
    pub label_smoothing: f64,
}

impl Loss for BinaryCrossentropy {
    fn name(&self) -> &str {
        "binary_crossentropy"
    }

    fn compute(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
        check_shapes(self.name(), y_true, y_pred)?;
        let total: f64 = y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| {
                let p = clip(if self.from_logits { sigmoid(*p) } else { *p });
                let t = t * (1.0 - self.label_smoothing) + 0.5 * self.label_smoothing;
                -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
            })
            .sum();
        Ok(total / y_true.len() as f64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeanSquaredError {}

impl Loss for MeanSquaredError {
    fn name(&self) -> &str {
        "mean_squared_error"
    }

    fn compute(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
        check_shapes(self.name(), y_true, y_pred)?;
        let total: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
        Ok(total / y_true.len() as f64)
    }
}

/// Signature of metric functions registered under `ccml.metrics`.
pub type MetricFn = fn(&[usize], &[usize]) -> f64;

/// Fraction of matching class indices.
pub fn accuracy(targets: &[usize], predicted: &[usize]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let hits = targets.iter().zip(predicted).filter(|(t, p)| t == p).count();
    hits as f64 / targets.len() as f64
}

fn register_loss<L>(registry: &mut ObjectRegistry, path: &'static str) -> Result<()>
where
    L: Loss + DeserializeOwned + 'static,
{
    registry.register_constructor(path, move |params| {
        let loss: L = from_params(path, params)?;
        Ok(Box::new(Box::new(loss) as Box<dyn Loss>) as Instance)
    })
}

pub fn register(registry: &mut ObjectRegistry) -> Result<()> {
    register_loss::<CategoricalCrossentropy>(registry, "ccml.losses.CategoricalCrossentropy")?;
    register_loss::<BinaryCrossentropy>(registry, "ccml.losses.BinaryCrossentropy")?;
    register_loss::<MeanSquaredError>(registry, "ccml.losses.MeanSquaredError")?;
    registry.register_value::<MetricFn>("ccml.metrics.accuracy", accuracy)?;
    Ok(())
}
