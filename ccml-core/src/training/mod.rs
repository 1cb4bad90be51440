//! Training wrapper — model trait, fit driver, and per-epoch history.

pub mod history;
pub mod runner;

pub use crate::callbacks::{CallbackAction, TrainingCallback};
pub use history::{EpochLogs, History};
pub use runner::{DEFAULT_METRICS, FitOptions, TrainOutput, Trainable, drive_epochs, fit_generator};
