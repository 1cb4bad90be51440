//! Built-in optimizers, constructible from descriptors.

use crate::error::{CcmlError, Result};
use crate::factory::{Instance, ObjectRegistry, from_params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A first-order optimizer updating a flat parameter vector in place.
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    fn learning_rate(&self) -> f64;

    fn step(&mut self, params: &mut [f64], grads: &[f64]) -> Result<()>;
}

fn check_len(name: &str, params: &[f64], grads: &[f64]) -> Result<()> {
    if params.len() != grads.len() {
        return Err(CcmlError::training(format!(
            "{name}: {} parameters but {} gradients",
            params.len(),
            grads.len()
        )));
    }
    Ok(())
}

fn default_sgd_lr() -> f64 {
    0.01
}

fn default_lr() -> f64 {
    0.001
}

fn default_beta_1() -> f64 {
    0.9
}

fn default_beta_2() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-7
}

/// Stochastic gradient descent with optional momentum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sgd {
    #[serde(default = "default_sgd_lr")]
    pub learning_rate: f64,
    #[serde(default)]
    pub momentum: f64,
    #[serde(skip)]
    velocity: Vec<f64>,
}

impl Sgd {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: Vec::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &str {
        "sgd"
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) -> Result<()> {
        check_len(self.name(), params, grads)?;
        self.velocity.resize(params.len(), 0.0);
        for ((p, g), v) in params.iter_mut().zip(grads).zip(self.velocity.iter_mut()) {
            *v = self.momentum * *v - self.learning_rate * g;
            *p += *v;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Adam {
    #[serde(default = "default_lr")]
    pub learning_rate: f64,
    #[serde(default = "default_beta_1")]
    pub beta_1: f64,
    #[serde(default = "default_beta_2")]
    pub beta_2: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(skip)]
    m: Vec<f64>,
    #[serde(skip)]
    v: Vec<f64>,
    #[serde(skip)]
    t: i32,
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        "adam"
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) -> Result<()> {
        check_len(self.name(), params, grads)?;
        self.m.resize(params.len(), 0.0);
        self.v.resize(params.len(), 0.0);
        self.t += 1;
        let bias_1 = 1.0 - self.beta_1.powi(self.t);
        let bias_2 = 1.0 - self.beta_2.powi(self.t);
        for (i, (p, g)) in params.iter_mut().zip(grads).enumerate() {
            self.m[i] = self.beta_1 * self.m[i] + (1.0 - self.beta_1) * g;
            self.v[i] = self.beta_2 * self.v[i] + (1.0 - self.beta_2) * g * g;
            let m_hat = self.m[i] / bias_1;
            let v_hat = self.v[i] / bias_2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RmsProp {
    #[serde(default = "default_lr")]
    pub learning_rate: f64,
    #[serde(default = "default_beta_1")]
    pub rho: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(skip)]
    mean_square: Vec<f64>,
}

impl Optimizer for RmsProp {
    fn name(&self) -> &str {
        "rmsprop"
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) -> Result<()> {
        check_len(self.name(), params, grads)?;
        self.mean_square.resize(params.len(), 0.0);
        for ((p, g), ms) in params.iter_mut().zip(grads).zip(self.mean_square.iter_mut()) {
            *ms = self.rho * *ms + (1.0 - self.rho) * g * g;
            *p -= self.learning_rate * g / (ms.sqrt() + self.epsilon);
        }
        Ok(())
    }
}

/// Build an optimizer from a descriptor.
pub fn create_optimizer(registry: &ObjectRegistry, descriptor: &Value) -> Result<Box<dyn Optimizer>> {
    registry
        .resolve_value(descriptor)?
        .downcast::<Box<dyn Optimizer>>()
        .map(|boxed| *boxed)
        .map_err(|_| CcmlError::config(format!("{descriptor} does not describe an optimizer")))
}

fn register_optimizer<O>(registry: &mut ObjectRegistry, path: &'static str) -> Result<()>
where
    O: Optimizer + DeserializeOwned + 'static,
{
    registry.register_constructor(path, move |params| {
        let optimizer: O = from_params(path, params)?;
        Ok(Box::new(Box::new(optimizer) as Box<dyn Optimizer>) as Instance)
    })
}

pub fn register(registry: &mut ObjectRegistry) -> Result<()> {
    register_optimizer::<Sgd>(registry, "ccml.optimizers.Sgd")?;
    register_optimizer::<Adam>(registry, "ccml.optimizers.Adam")?;
    register_optimizer::<RmsProp>(registry, "ccml.optimizers.RmsProp")?;
    Ok(())
}
