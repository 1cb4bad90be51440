//! ccml CLI — run identifiers, artifact paths, descriptor checks, charts and
//! git provenance from the shell.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// ccml: helpers for ML training experiments
#[derive(Parser, Debug)]
#[command(name = "ccml", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (relative templates and `.ccml/config.toml` are read from here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the run identifiers as KEY=value lines
    Env {
        /// Fill in a missing RUN_ID / SHORT_ID
        #[arg(long)]
        generate: bool,
        /// Ask for EXPERIMENT_NAME if it is not set
        #[arg(long)]
        ensure_exp_name: bool,
        /// Pipeline name, used only if PIPELINE is not already set
        #[arg(long)]
        pipeline: Option<String>,
    },
    /// Substitute identifiers into a path template and create its directories
    Path {
        /// Template containing $RUN_ID and/or $SHORT_ID
        template: String,
        /// Create the path itself as a directory, not just its parent
        #[arg(long)]
        dir: bool,
    },
    /// Resolve the object descriptors in a YAML or JSON file
    Resolve {
        /// Descriptor document (a single descriptor or a list)
        file: PathBuf,
    },
    /// Git provenance helpers
    Git {
        #[command(subcommand)]
        action: GitAction,
    },
    /// Write a Vega-Lite chart of one metric from a saved training history
    Chart {
        /// History JSON written by the HistoryLogger callback
        history: PathBuf,
        /// Metric to plot
        #[arg(short, long)]
        metric: String,
        /// Series name shown in the legend
        #[arg(short, long, default_value = "run")]
        name: String,
        /// Output path template (defaults to `output.chart_path` from config)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum GitAction {
    /// Print the HEAD commit of the repository containing a path
    Hash {
        /// Path inside the repository
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Stage files and commit them to the repository containing the workspace
    Commit {
        /// Commit message
        #[arg(short, long, default_value = "")]
        message: String,
        /// Files to stage
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default config file in the workspace
    Init,
    /// Show the current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "ccml", "ccml")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ccml.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let output = commands::handle_command(cli.command, &workspace)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
