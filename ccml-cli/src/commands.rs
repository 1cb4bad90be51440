//! CLI subcommand handlers.
//!
//! Handlers return the text to print so they can be exercised without a terminal.

use crate::Commands;
use crate::ConfigAction;
use crate::GitAction;
use anyhow::Context;
use ccml_core::charts::{metric_chart, save_chart};
use ccml_core::config::{CcmlConfig, load_config, read_document};
use ccml_core::identifiers::{ExperimentNamePrompt, TerminalPrompt};
use ccml_core::paths::provision_dir;
use ccml_core::provenance::{fast_commit, git_revision_hash};
use ccml_core::training::History;
use ccml_core::{ObjectDescriptor, ObjectRegistry, RunContext, provision_path};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Handle a CLI subcommand with identifiers taken from the process environment.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<String> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let mut ctx = RunContext::from_env();
    let mut prompt = TerminalPrompt {
        message: config.prompt.experiment_name.clone(),
    };
    run(command, workspace, &config, &mut ctx, &mut prompt)
}

fn run(
    command: Commands,
    workspace: &Path,
    config: &CcmlConfig,
    ctx: &mut RunContext,
    prompt: &mut dyn ExperimentNamePrompt,
) -> anyhow::Result<String> {
    match command {
        Commands::Env {
            generate,
            ensure_exp_name,
            pipeline,
        } => handle_env(ctx, generate, ensure_exp_name, pipeline, prompt),
        Commands::Path { template, dir } => handle_path(ctx, workspace, &template, dir),
        Commands::Resolve { file } => handle_resolve(ctx, &in_workspace(workspace, &file)),
        Commands::Git { action } => handle_git(action, workspace),
        Commands::Chart {
            history,
            metric,
            name,
            output,
        } => {
            let template = output.unwrap_or_else(|| config.output.chart_path.clone());
            handle_chart(ctx, workspace, &history, &metric, &name, &template)
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn in_workspace(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn template_in_workspace(workspace: &Path, template: &str) -> String {
    in_workspace(workspace, Path::new(template))
        .display()
        .to_string()
}

fn handle_env(
    ctx: &mut RunContext,
    generate: bool,
    ensure_exp_name: bool,
    pipeline: Option<String>,
    prompt: &mut dyn ExperimentNamePrompt,
) -> anyhow::Result<String> {
    if generate {
        ctx.generate_ids();
    }
    if let Some(pipeline) = pipeline {
        ctx.set_pipeline_name_once(pipeline);
    }
    if ensure_exp_name {
        let (name, already_set) = ctx.ensure_exp_name(prompt)?;
        debug!(experiment = %name, already_set, "Experiment name resolved");
    }
    Ok(ctx
        .env_pairs()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn handle_path(
    ctx: &RunContext,
    workspace: &Path,
    template: &str,
    dir: bool,
) -> anyhow::Result<String> {
    let template = template_in_workspace(workspace, template);
    let path = if dir {
        provision_dir(ctx, &template)?
    } else {
        provision_path(ctx, &template)?
    };
    Ok(path.display().to_string())
}

fn handle_resolve(ctx: &RunContext, file: &Path) -> anyhow::Result<String> {
    let registry = ObjectRegistry::with_builtins(ctx)?;
    let document = read_document(file)?;
    let descriptors = match document {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut lines = Vec::with_capacity(descriptors.len());
    for (i, value) in descriptors.iter().enumerate() {
        let descriptor = ObjectDescriptor::from_value(value)
            .with_context(|| format!("descriptor #{i} in {}", file.display()))?;
        let resolved = registry
            .resolve(&descriptor)
            .with_context(|| format!("descriptor #{i} in {}", file.display()))?;
        let kind = if resolved.is_instance() {
            "instance"
        } else {
            "member"
        };
        lines.push(format!("{}\t{kind}", descriptor.path()));
    }
    Ok(lines.join("\n"))
}

fn handle_git(action: GitAction, workspace: &Path) -> anyhow::Result<String> {
    match action {
        GitAction::Hash { path } => Ok(git_revision_hash(&in_workspace(workspace, &path))?),
        GitAction::Commit { message, files } => Ok(fast_commit(&files, &message, workspace)?),
    }
}

fn handle_chart(
    ctx: &RunContext,
    workspace: &Path,
    history: &Path,
    metric: &str,
    name: &str,
    template: &str,
) -> anyhow::Result<String> {
    let history = History::load(&in_workspace(workspace, history))
        .with_context(|| format!("failed to load history {}", history.display()))?;
    if history.metric(metric).is_none() {
        anyhow::bail!("metric '{metric}' is not in the history");
    }
    let chart = metric_chart(&history.chart_rows(name), metric);
    let path = save_chart(ctx, &chart, &template_in_workspace(workspace, template))?;
    Ok(path.display().to_string())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<String> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".ccml");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                return Ok(format!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                ));
            }

            let toml_str = toml::to_string_pretty(&CcmlConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            Ok(format!(
                "Created default configuration at: {}",
                config_path.display()
            ))
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            Ok(toml::to_string_pretty(&config)?)
        }
    }
}
