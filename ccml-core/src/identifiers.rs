//! Run and experiment identifiers.
//!
//! The host orchestrator exports `RUN_ID`, `SHORT_ID`, `PIPELINE` and
//! `EXPERIMENT_NAME` before the process starts. They are captured once into a
//! [`RunContext`] which is then handed to everything that names or places
//! experiment artifacts.

use crate::error::{CcmlError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const RUN_ID_KEY: &str = "RUN_ID";
pub const SHORT_ID_KEY: &str = "SHORT_ID";
pub const PIPELINE_KEY: &str = "PIPELINE";
pub const EXP_NAME_KEY: &str = "EXPERIMENT_NAME";
/// Reserved for orchestrators that prefix experiment names. Not read.
pub const EXP_PREFIX_KEY: &str = "EXPERIMENT_PREFIX";

const SHORT_ID_LEN: usize = 8;

/// Source of an experiment name when none was exported.
pub trait ExperimentNamePrompt {
    fn ask(&mut self) -> Result<String>;
}

/// Asks on the terminal.
pub struct TerminalPrompt {
    pub message: String,
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self {
            message: "Enter the experiment name".to_string(),
        }
    }
}

impl ExperimentNamePrompt for TerminalPrompt {
    fn ask(&mut self) -> Result<String> {
        dialoguer::Input::<String>::new()
            .with_prompt(&self.message)
            .interact_text()
            .map_err(|e| CcmlError::config(format!("failed to read experiment name: {e}")))
    }
}

/// Identifiers of the current run. Each one is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    short_id: Option<String>,
    #[serde(default)]
    pipeline: Option<String>,
    #[serde(default)]
    experiment_name: Option<String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the identifiers from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Capture the identifiers from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ctx = Self {
            run_id: lookup(RUN_ID_KEY),
            short_id: lookup(SHORT_ID_KEY),
            pipeline: lookup(PIPELINE_KEY),
            experiment_name: lookup(EXP_NAME_KEY),
        };
        debug!(
            run_id = ?ctx.run_id,
            short_id = ?ctx.short_id,
            pipeline = ?ctx.pipeline,
            experiment = ?ctx.experiment_name,
            "Captured run identifiers"
        );
        ctx
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_short_id(mut self, short_id: impl Into<String>) -> Self {
        self.short_id = Some(short_id.into());
        self
    }

    pub fn with_exp_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = Some(name.into());
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn short_id(&self) -> Option<&str> {
        self.short_id.as_deref()
    }

    pub fn exp_name(&self) -> Option<&str> {
        self.experiment_name.as_deref()
    }

    pub fn pipeline_name(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    /// Return the experiment name, asking for it if it was never set.
    ///
    /// The flag is `true` when the name was already present and no prompt
    /// was shown.
    pub fn ensure_exp_name(
        &mut self,
        prompt: &mut dyn ExperimentNamePrompt,
    ) -> Result<(String, bool)> {
        if let Some(name) = &self.experiment_name {
            return Ok((name.clone(), true));
        }
        let name = prompt.ask()?;
        info!(experiment = %name, "Experiment name set");
        self.experiment_name = Some(name.clone());
        Ok((name, false))
    }

    /// Set the pipeline name unless one is already set.
    pub fn set_pipeline_name_once(&mut self, name: impl Into<String>) {
        if self.pipeline.is_none() {
            self.pipeline = Some(name.into());
        }
    }

    /// Fill in missing run and short ids with fresh values.
    pub fn generate_ids(&mut self) {
        let run_id = self
            .run_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string());
        if self.short_id.is_none() {
            self.short_id = Some(run_id.chars().take(SHORT_ID_LEN).collect());
        }
    }

    /// Replace `$SHORT_ID` and `$RUN_ID` in `template`.
    pub fn substitute_identifiers(&self, template: &str) -> Result<String> {
        let out = substitute(template, SHORT_ID_KEY, self.short_id())?;
        substitute(&out, RUN_ID_KEY, self.run_id())
    }

    /// The identifiers that are set, as environment key/value pairs.
    pub fn env_pairs(&self) -> Vec<(&'static str, String)> {
        [
            (RUN_ID_KEY, &self.run_id),
            (SHORT_ID_KEY, &self.short_id),
            (PIPELINE_KEY, &self.pipeline),
            (EXP_NAME_KEY, &self.experiment_name),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
        .collect()
    }
}

fn substitute(template: &str, key: &str, value: Option<&str>) -> Result<String> {
    let placeholder = format!("${key}");
    if !template.contains(&placeholder) {
        return Ok(template.to_string());
    }
    let value = value.ok_or_else(|| {
        CcmlError::config(format!(
            "template '{template}' uses {placeholder} but {key} is not set"
        ))
    })?;
    Ok(template.replace(&placeholder, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedPrompt {
        answer: String,
        asked: usize,
    }

    impl ExperimentNamePrompt for FixedPrompt {
        fn ask(&mut self) -> Result<String> {
            self.asked += 1;
            Ok(self.answer.clone())
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> RunContext {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunContext::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_absent_identifiers_are_none() {
        let ctx = lookup(&[]);
        assert_eq!(ctx.run_id(), None);
        assert_eq!(ctx.short_id(), None);
        assert_eq!(ctx.exp_name(), None);
        assert_eq!(ctx.pipeline_name(), None);
    }

    #[test]
    fn test_reads_all_keys() {
        let ctx = lookup(&[
            ("RUN_ID", "abc"),
            ("SHORT_ID", "123"),
            ("PIPELINE", "train"),
            ("EXPERIMENT_NAME", "resnet"),
            ("EXPERIMENT_PREFIX", "ignored"),
        ]);
        assert_eq!(ctx.run_id(), Some("abc"));
        assert_eq!(ctx.short_id(), Some("123"));
        assert_eq!(ctx.pipeline_name(), Some("train"));
        assert_eq!(ctx.exp_name(), Some("resnet"));
    }

    #[test]
    fn test_substitute_both() {
        let ctx = RunContext::new().with_run_id("abc").with_short_id("123");
        assert_eq!(
            ctx.substitute_identifiers("run-$RUN_ID-$SHORT_ID").unwrap(),
            "run-abc-123"
        );
    }

    #[test]
    fn test_substitute_missing_short_id() {
        let ctx = RunContext::new().with_run_id("abc");
        let err = ctx.substitute_identifiers("run-$RUN_ID-$SHORT_ID").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("SHORT_ID"));
    }

    #[test]
    fn test_substitute_without_placeholders_needs_nothing() {
        let ctx = RunContext::new();
        assert_eq!(ctx.substitute_identifiers("out/plain").unwrap(), "out/plain");
    }

    #[test]
    fn test_pipeline_name_first_writer_wins() {
        let mut ctx = RunContext::new();
        ctx.set_pipeline_name_once("first");
        ctx.set_pipeline_name_once("second");
        assert_eq!(ctx.pipeline_name(), Some("first"));
    }

    #[test]
    fn test_ensure_exp_name_prompts_once() {
        let mut ctx = RunContext::new();
        let mut prompt = FixedPrompt {
            answer: "baseline".into(),
            asked: 0,
        };
        let (name, already_set) = ctx.ensure_exp_name(&mut prompt).unwrap();
        assert_eq!(name, "baseline");
        assert!(!already_set);

        let (name, already_set) = ctx.ensure_exp_name(&mut prompt).unwrap();
        assert_eq!(name, "baseline");
        assert!(already_set);
        assert_eq!(prompt.asked, 1);
    }

    #[test]
    fn test_ensure_exp_name_preset_never_prompts() {
        let mut ctx = RunContext::new().with_exp_name("preset");
        let mut prompt = FixedPrompt {
            answer: "other".into(),
            asked: 0,
        };
        assert_eq!(
            ctx.ensure_exp_name(&mut prompt).unwrap(),
            ("preset".to_string(), true)
        );
        assert_eq!(prompt.asked, 0);
    }

    #[test]
    fn test_generate_ids_keeps_existing() {
        let mut ctx = RunContext::new().with_run_id("fixed-run");
        ctx.generate_ids();
        assert_eq!(ctx.run_id(), Some("fixed-run"));
        assert_eq!(ctx.short_id(), Some("fixed-ru"));

        let mut fresh = RunContext::new();
        fresh.generate_ids();
        assert_eq!(fresh.run_id().unwrap().len(), 32);
        assert_eq!(fresh.short_id().unwrap().len(), SHORT_ID_LEN);
    }

    #[test]
    fn test_env_pairs_only_set_values() {
        let mut ctx = RunContext::new().with_run_id("abc");
        ctx.set_pipeline_name_once("eval");
        let pairs = ctx.env_pairs();
        assert_eq!(
            pairs,
            vec![("RUN_ID", "abc".to_string()), ("PIPELINE", "eval".to_string())]
        );
    }
}
