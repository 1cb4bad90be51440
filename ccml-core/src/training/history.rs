//! Per-epoch metric history returned by a fit.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;

/// Metric values reported at the end of one epoch.
pub type EpochLogs = BTreeMap<String, f64>;

/// Training history: the epochs that ran and each metric's series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<usize>,
    pub metrics: BTreeMap<String, Vec<f64>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_epoch(&mut self, epoch: usize, logs: &EpochLogs) {
        self.epochs.push(epoch);
        for (name, value) in logs {
            self.metrics.entry(name.clone()).or_default().push(*value);
        }
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn metric(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(Vec::as_slice)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.metric(name).and_then(|s| s.last().copied())
    }

    /// Epoch with the lowest value of `name`.
    pub fn best_epoch(&self, name: &str) -> Option<(usize, f64)> {
        let series = self.metric(name)?;
        series
            .iter()
            .zip(&self.epochs)
            .filter(|(v, _)| !v.is_nan())
            .min_by(|a, b| a.0.total_cmp(b.0))
            .map(|(v, e)| (*e, *v))
    }

    /// One record per epoch, tagged with `name`, in the shape chart sources expect.
    pub fn chart_rows(&self, name: &str) -> Vec<Value> {
        self.epochs
            .iter()
            .enumerate()
            .map(|(i, epoch)| {
                let mut row = Map::new();
                row.insert("epoch".into(), json!(epoch));
                row.insert("name".into(), json!(name));
                for (metric, series) in &self.metrics {
                    if let Some(v) = series.get(i) {
                        row.insert(metric.clone(), json!(v));
                    }
                }
                Value::Object(row)
            })
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
