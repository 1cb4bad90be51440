//! Prediction containers and their on-disk forms: a parquet table and a YAML sidecar.

use crate::error::{CcmlError, Result};
use crate::factory::NodeOutput;
use crate::identifiers::RunContext;
use crate::paths::provision_dir;
use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Prediction for one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionContainer {
    pub filename: String,
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub prediction: Vec<f64>,
}

/// YAML form of a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub filename: String,
    pub class_idx: usize,
    pub prediction: Vec<f64>,
}

impl PredictionContainer {
    pub fn pred_list(&self) -> &[f64] {
        &self.prediction
    }

    /// Prediction values keyed `pred_0000`, `pred_0001`, ...
    pub fn pred_columns(&self) -> Vec<(String, f64)> {
        self.prediction
            .iter()
            .enumerate()
            .map(|(idx, v)| (format!("pred_{idx:04}"), *v))
            .collect()
    }

    pub fn default_record(&self) -> PredictionRecord {
        PredictionRecord {
            filename: self.filename.clone(),
            class_idx: self.class_idx,
            prediction: self.prediction.clone(),
        }
    }

    /// Table cells: filename, class index, class name, then `width` prediction
    /// columns, blank where this prediction is shorter.
    pub fn table_row(&self, width: usize) -> Vec<String> {
        let mut row = vec![
            self.filename.clone(),
            self.class_idx.to_string(),
            self.class_name.clone().unwrap_or_default(),
        ];
        row.extend((0..width).map(|i| self.prediction.get(i).map(f64::to_string).unwrap_or_default()));
        row
    }

    /// Predicted class: the rounded score for a single output, the argmax otherwise.
    pub fn predicted_index(&self) -> Result<usize> {
        match self.prediction.as_slice() {
            [] => Err(CcmlError::prediction(format!(
                "no prediction column available for {}",
                self.filename
            ))),
            [score] => Ok(score.round().max(0.0) as usize),
            scores => Ok(scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i)
                .unwrap_or_default()),
        }
    }

    pub fn target_index(&self) -> usize {
        self.class_idx
    }
}

/// A set of predictions plus the class name → index mapping they refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub preds: Vec<PredictionContainer>,
    pub class_idxs: BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct PredictionsYaml<'a> {
    class_idxs: &'a BTreeMap<String, usize>,
    predictions: Vec<PredictionRecord>,
}

impl Predictions {
    pub fn new(preds: Vec<PredictionContainer>, class_idxs: BTreeMap<String, usize>) -> Self {
        Self { preds, class_idxs }
    }

    pub fn list_data(&self) -> Vec<PredictionRecord> {
        self.preds.iter().map(PredictionContainer::default_record).collect()
    }

    /// Column names and rows of the tabular form.
    pub fn table(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let width = self.preds.iter().map(|p| p.prediction.len()).max().unwrap_or(0);
        let mut columns: Vec<String> = ["filename", "class_idx", "class_name"]
            .into_iter()
            .map(String::from)
            .collect();
        columns.extend((0..width).map(|idx| format!("pred_{idx:04}")));

        let rows = self.preds.iter().map(|p| p.table_row(width)).collect();
        (columns, rows)
    }

    /// Target and predicted class index for every prediction.
    pub fn class_and_pred_idxs(&self) -> Result<(Vec<usize>, Vec<usize>)> {
        let targets = self.preds.iter().map(PredictionContainer::target_index).collect();
        let predicted = self
            .preds
            .iter()
            .map(PredictionContainer::predicted_index)
            .collect::<Result<_>>()?;
        Ok((targets, predicted))
    }

    /// Columnar form: `filename`, `class_idx`, `class_name`, then one nullable
    /// `pred_NNNN` column per prediction index.
    pub fn record_batch(&self) -> Result<RecordBatch> {
        let width = self.preds.iter().map(|p| p.prediction.len()).max().unwrap_or(0);
        let mut fields = vec![
            Field::new("filename", DataType::Utf8, false),
            Field::new("class_idx", DataType::UInt64, false),
            Field::new("class_name", DataType::Utf8, true),
        ];
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                self.preds.iter().map(|p| p.filename.as_str()),
            )),
            Arc::new(UInt64Array::from_iter_values(
                self.preds.iter().map(|p| p.class_idx as u64),
            )),
            Arc::new(
                self.preds
                    .iter()
                    .map(|p| p.class_name.as_deref())
                    .collect::<StringArray>(),
            ),
        ];
        for idx in 0..width {
            fields.push(Field::new(format!("pred_{idx:04}"), DataType::Float64, true));
            columns.push(Arc::new(
                self.preds
                    .iter()
                    .map(|p| p.prediction.get(idx).copied())
                    .collect::<Float64Array>(),
            ));
        }
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }

    /// Write the table as a parquet file.
    pub fn save_table(&self, path: &Path) -> Result<()> {
        let batch = self.record_batch()?;
        let file = std::fs::File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    pub fn save_yaml(&self, path: &Path) -> Result<()> {
        let doc = PredictionsYaml {
            class_idxs: &self.class_idxs,
            predictions: self.list_data(),
        };
        std::fs::write(path, serde_yaml::to_string(&doc)?)?;
        Ok(())
    }
}

/// Zip raw predictions with their files and target classes.
pub fn prediction_factory(
    preds: Vec<Vec<f64>>,
    filenames: Vec<String>,
    classes: Vec<usize>,
    class_indices: BTreeMap<String, usize>,
) -> Result<Predictions> {
    if preds.len() != filenames.len() || preds.len() != classes.len() {
        return Err(CcmlError::config(format!(
            "{} predictions, {} filenames and {} classes must have the same length",
            preds.len(),
            filenames.len(),
            classes.len()
        )));
    }
    let names: BTreeMap<usize, &String> = class_indices.iter().map(|(k, v)| (*v, k)).collect();
    let pred_list = preds
        .into_iter()
        .zip(filenames)
        .zip(classes)
        .map(|((prediction, filename), class_idx)| {
            let class_name = names.get(&class_idx).map(|n| n.to_string()).ok_or_else(|| {
                CcmlError::config(format!("class index {class_idx} of {filename} has no class name"))
            })?;
            Ok(PredictionContainer {
                filename,
                class_idx,
                class_name: Some(class_name),
                prediction,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Predictions::new(pred_list, class_indices))
}

/// Write whichever of the table and YAML files are named, under `store_path`.
pub fn save_predictions(
    predictions: &Predictions,
    store_path: &Path,
    table_filename: Option<&str>,
    yaml_filename: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if let Some(name) = table_filename {
        let path = store_path.join(name);
        predictions.save_table(&path)?;
        written.push(path);
    }
    if let Some(name) = yaml_filename {
        let path = store_path.join(name);
        predictions.save_yaml(&path)?;
        written.push(path);
    }
    info!(store = %store_path.display(), files = written.len(), count = predictions.preds.len(), "Saved predictions");
    Ok(written)
}

/// Provision the templated store path, then save. Produces no node outputs.
pub fn save_predictions_node(
    ctx: &RunContext,
    predictions: &Predictions,
    store_path: &str,
    table_filename: Option<&str>,
    yaml_filename: Option<&str>,
) -> Result<NodeOutput> {
    let store = provision_dir(ctx, store_path)?;
    save_predictions(predictions, &store, table_filename, yaml_filename)?;
    Ok(NodeOutput::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use pretty_assertions::assert_eq;

    fn classes() -> BTreeMap<String, usize> {
        BTreeMap::from([("cat".to_string(), 0), ("dog".to_string(), 1)])
    }

    fn sample() -> Predictions {
        prediction_factory(
            vec![vec![0.2, 0.8], vec![0.9, 0.1]],
            vec!["a.png".into(), "b.png".into()],
            vec![1, 1],
            classes(),
        )
        .unwrap()
    }

    #[test]
    fn test_factory_names_classes() {
        let preds = sample();
        assert_eq!(preds.preds[0].class_name.as_deref(), Some("dog"));
        assert_eq!(preds.class_idxs, classes());
    }

    #[test]
    fn test_factory_unknown_class() {
        let err = prediction_factory(vec![vec![1.0]], vec!["x".into()], vec![7], classes()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_predicted_index() {
        let single = PredictionContainer {
            filename: "s".into(),
            class_idx: 1,
            class_name: None,
            prediction: vec![0.7],
        };
        assert_eq!(single.predicted_index().unwrap(), 1);

        let empty = PredictionContainer {
            prediction: vec![],
            ..single.clone()
        };
        assert!(matches!(empty.predicted_index(), Err(CcmlError::Prediction(_))));

        let (targets, predicted) = sample().class_and_pred_idxs().unwrap();
        assert_eq!(targets, vec![1, 1]);
        assert_eq!(predicted, vec![1, 0]);
    }

    #[test]
    fn test_pred_columns() {
        let preds = sample();
        assert_eq!(
            preds.preds[0].pred_columns(),
            vec![("pred_0000".to_string(), 0.2), ("pred_0001".to_string(), 0.8)]
        );
    }

    #[test]
    fn test_table_row_pads_short_predictions() {
        let preds = sample();
        assert_eq!(
            preds.preds[1].table_row(3),
            vec!["b.png", "1", "dog", "0.9", "0.1", ""]
        );
    }

    fn read_parquet(path: &Path) -> RecordBatch {
        let file = std::fs::File::open(path).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        reader.next().unwrap().unwrap()
    }

    #[test]
    fn test_table_and_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        let preds = sample();
        let written =
            save_predictions(&preds, dir.path(), Some("preds.parquet"), Some("preds.yml")).unwrap();
        assert_eq!(written.len(), 2);

        let batch = read_parquet(&dir.path().join("preds.parquet"));
        let schema = batch.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["filename", "class_idx", "class_name", "pred_0000", "pred_0001"]);
        assert_eq!(batch.num_rows(), 2);

        let filenames = batch
            .column_by_name("filename")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(filenames.value(1), "b.png");
        let class_idx = batch
            .column_by_name("class_idx")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(class_idx.value(0), 1);
        let pred_1 = batch
            .column_by_name("pred_0001")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(pred_1.value(0), 0.8);

        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(dir.path().join("preds.yml")).unwrap()).unwrap();
        assert_eq!(yaml["class_idxs"]["dog"].as_u64(), Some(1));
        assert_eq!(yaml["predictions"][1]["filename"].as_str(), Some("b.png"));
    }

    #[test]
    fn test_save_nothing_when_no_filenames() {
        let dir = tempfile::tempdir().unwrap();
        assert!(save_predictions(&sample(), dir.path(), None, None).unwrap().is_empty());
    }

    #[test]
    fn test_node_provisions_templated_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new().with_run_id("r7");
        let store = format!("{}/runs/$RUN_ID/preds", dir.path().display());
        let out = save_predictions_node(&ctx, &sample(), &store, None, Some("p.yml")).unwrap();
        assert!(out.is_empty());
        assert!(dir.path().join("runs/r7/preds/p.yml").is_file());
    }

    #[test]
    fn test_ragged_predictions_leave_nulls() {
        let preds = Predictions::new(
            vec![
                PredictionContainer {
                    filename: "short.png".into(),
                    class_idx: 0,
                    class_name: None,
                    prediction: vec![0.3],
                },
                PredictionContainer {
                    filename: "long.png".into(),
                    class_idx: 1,
                    class_name: Some("dog".into()),
                    prediction: vec![0.1, 0.9],
                },
            ],
            classes(),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.parquet");
        preds.save_table(&path).unwrap();

        let batch = read_parquet(&path);
        assert!(batch.column_by_name("class_name").unwrap().is_null(0));
        assert!(batch.column_by_name("pred_0001").unwrap().is_null(0));
        assert!(!batch.column_by_name("pred_0001").unwrap().is_null(1));
    }

    #[test]
    fn test_factory_length_mismatch() {
        let err = prediction_factory(
            vec![vec![0.1], vec![0.9]],
            vec!["a.png".into()],
            vec![0, 1],
            classes(),
        )
        .unwrap_err();
        assert!(err.is_configuration());

        let err = prediction_factory(vec![vec![0.1]], vec!["a.png".into()], vec![], classes()).unwrap_err();
        assert!(err.is_configuration());
    }
}
