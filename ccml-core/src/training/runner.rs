//! Training wrapper — build a model, compile it, fit it, hand back the history.

use crate::callbacks::{CallbackAction, TrainingCallback};
use crate::error::Result;
use crate::losses::LossSpec;
use crate::optimizers::Optimizer;
use crate::training::history::{EpochLogs, History};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Metrics every compiled model reports.
pub const DEFAULT_METRICS: &[&str] = &["accuracy"];

/// Epoch and step counts for a fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitOptions {
    pub epochs: usize,
    #[serde(default)]
    pub steps_per_epoch: Option<usize>,
    #[serde(default)]
    pub validation_steps: Option<usize>,
}

impl FitOptions {
    pub fn epochs(epochs: usize) -> Self {
        Self {
            epochs,
            steps_per_epoch: None,
            validation_steps: None,
        }
    }
}

/// A model the training backend can compile and fit.
pub trait Trainable {
    type Data;

    fn compile(
        &mut self,
        optimizer: Box<dyn Optimizer>,
        loss: &LossSpec,
        metrics: &[&str],
    ) -> Result<()>;

    fn fit(
        &mut self,
        train: &Self::Data,
        validation: Option<&Self::Data>,
        options: &FitOptions,
        callbacks: &mut [Box<dyn TrainingCallback>],
    ) -> Result<History>;
}

/// Output of [`fit_generator`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutput {
    pub history: History,
}

/// Build a model with `model`, compile it and fit it, returning the backend's history as is.
pub fn fit_generator<M, F>(
    model: F,
    train: &M::Data,
    validation: Option<&M::Data>,
    options: FitOptions,
    optimizer: Box<dyn Optimizer>,
    loss: &LossSpec,
    callbacks: &mut [Box<dyn TrainingCallback>],
) -> Result<TrainOutput>
where
    M: Trainable,
    F: FnOnce() -> M,
{
    let mut model = model();
    info!(
        optimizer = optimizer.name(),
        epochs = options.epochs,
        callbacks = callbacks.len(),
        "Compiling and fitting model"
    );
    model.compile(optimizer, loss, DEFAULT_METRICS)?;
    let history = model.fit(train, validation, &options, callbacks)?;
    Ok(TrainOutput { history })
}

/// Drive the epoch loop for a [`Trainable::fit`] implementation.
///
/// `step` runs one epoch and returns its logs. Callbacks see every epoch;
/// any `Stop` ends the loop after the current epoch, any `Checkpoint`
/// calls `checkpoint`. `on_train_end` runs for every callback at the end.
pub fn drive_epochs(
    options: &FitOptions,
    callbacks: &mut [Box<dyn TrainingCallback>],
    mut step: impl FnMut(usize) -> Result<EpochLogs>,
    mut checkpoint: impl FnMut(usize, &EpochLogs) -> Result<()>,
) -> Result<History> {
    let mut history = History::new();
    for epoch in 0..options.epochs {
        let logs = step(epoch)?;
        history.record_epoch(epoch, &logs);

        let mut stop = false;
        let mut save = false;
        for callback in callbacks.iter_mut() {
            match callback.on_epoch_end(epoch, &logs) {
                CallbackAction::Continue => {}
                CallbackAction::Stop => {
                    debug!(callback = callback.name(), epoch, "Callback requested stop");
                    stop = true;
                }
                CallbackAction::Checkpoint => save = true,
            }
        }
        if save {
            checkpoint(epoch, &logs)?;
        }
        if stop {
            info!(epoch, "Training stopped early");
            break;
        }
    }

    for callback in callbacks.iter_mut() {
        callback.on_train_end(&history)?;
    }
    Ok(history)
}
