//! Configuration for ccml.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.
//! Configuration is read from the user config dir (`ccml/config.toml`) and/or
//! `.ccml/config.toml` in the workspace directory.

use crate::error::{CcmlError, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CcmlConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

/// Where artifacts go. Paths may contain `$RUN_ID` / `$SHORT_ID`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory predictions are stored in.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Columnar prediction table file name.
    #[serde(default = "default_table_filename")]
    pub table_filename: Option<String>,
    /// YAML prediction sidecar file name.
    #[serde(default = "default_yaml_filename")]
    pub yaml_filename: Option<String>,
    /// Chart output path.
    #[serde(default = "default_chart_path")]
    pub chart_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            table_filename: default_table_filename(),
            yaml_filename: default_yaml_filename(),
            chart_path: default_chart_path(),
        }
    }
}

fn default_store_path() -> String {
    "runs/$RUN_ID/predictions".to_string()
}

fn default_table_filename() -> Option<String> {
    Some("predictions.parquet".to_string())
}

fn default_yaml_filename() -> Option<String> {
    Some("predictions.yml".to_string())
}

fn default_chart_path() -> String {
    "runs/$RUN_ID/charts/$SHORT_ID.json".to_string()
}

/// Interactive prompt settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_exp_name_prompt")]
    pub experiment_name: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            experiment_name: default_exp_name_prompt(),
        }
    }
}

fn default_exp_name_prompt() -> String {
    "Enter the experiment name".to_string()
}

/// User-level config file location.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ccml", "ccml").map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (prefixed with `CCML_`, `__` separating sections)
/// 3. Workspace-local config (`.ccml/config.toml`)
/// 4. User config
/// 5. Built-in defaults
pub fn load_config(workspace: Option<&Path>, overrides: Option<&CcmlConfig>) -> Result<CcmlConfig> {
    let mut figment = Figment::from(Serialized::defaults(CcmlConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".ccml").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CCML_OUTPUT__STORE_PATH, CCML_PROMPT__EXPERIMENT_NAME, ...
    figment = figment.merge(Env::prefixed("CCML_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
        .extract()
        .map_err(|e| CcmlError::config(format!("invalid configuration: {e}")))
}

/// Read a YAML or JSON document (descriptor lists, loss mappings, ...) as a JSON value.
pub fn read_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yml" | "yaml") => Ok(serde_yaml::from_str(&content)?),
        Some("json") => Ok(serde_json::from_str(&content)?),
        _ => Err(CcmlError::config(format!(
            "unsupported document type: {} (expected .yml, .yaml or .json)",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CcmlConfig::default();
        assert_eq!(config.output.store_path, "runs/$RUN_ID/predictions");
        assert_eq!(config.output.table_filename.as_deref(), Some("predictions.parquet"));
        assert_eq!(config.prompt.experiment_name, "Enter the experiment name");
    }

    #[test]
    fn test_workspace_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".ccml")).unwrap();
        std::fs::write(
            dir.path().join(".ccml/config.toml"),
            "[output]\nstore_path = \"out/$SHORT_ID\"\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.output.store_path, "out/$SHORT_ID");
        assert_eq!(config.output.yaml_filename.as_deref(), Some("predictions.yml"));

        let mut overrides = CcmlConfig::default();
        overrides.output.chart_path = "charts/x.json".into();
        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.output.chart_path, "charts/x.json");
    }

    #[test]
    fn test_read_document() {
        let dir = tempfile::tempdir().unwrap();
        let yml = dir.path().join("callbacks.yml");
        std::fs::write(&yml, "- type: ccml.callbacks.EarlyStopping\n  params:\n    patience: 2\n").unwrap();
        let doc = read_document(&yml).unwrap();
        assert_eq!(doc[0]["params"]["patience"], 2);

        let json = dir.path().join("loss.json");
        std::fs::write(&json, "\"mse\"").unwrap();
        assert_eq!(read_document(&json).unwrap(), Value::from("mse"));

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "").unwrap();
        assert!(read_document(&txt).unwrap_err().is_configuration());
    }
}
