//! CLI argument parsing
//!
//! ```bash
//! recordar train config.yaml
//! recordar train config.yaml --output-dir ./result --epochs 5
//! recordar validate config.yaml
//! recordar info config.yaml --format json
//! ```

use super::schema::{BiasRect, IncrementalSpec, MemoryType};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Recordar: class-incremental training with rehearsal and bias rectification
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "recordar")]
#[command(version)]
#[command(about = "Class-incremental training with rehearsal memory, bias rectification and distillation")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run every incremental stage of a YAML configuration
    Train(TrainArgs),

    /// Validate a configuration file without training
    Validate(ValidateArgs),

    /// Display the stage plan and output layout of a configuration
    Info(InfoArgs),
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override the result root
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Override epochs per stage
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Override base learning rate
    #[arg(short, long)]
    pub lr: Option<f32>,

    /// Override the bias rectification strategy
    #[arg(long)]
    pub bias_rect: Option<BiasRect>,

    /// Override the rehearsal memory budget (enables episodic memory)
    #[arg(long)]
    pub memory_budget: Option<usize>,

    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,

    /// Dry run (validate config and print the stage plan, don't train)
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Show the resolved configuration
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for `info`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(format!("Unknown format: {s}. Valid formats: text, json, yaml")),
        }
    }
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply command-line overrides to a spec
pub fn apply_overrides(spec: &mut IncrementalSpec, args: &TrainArgs) {
    if let Some(output_dir) = &args.output_dir {
        spec.output.root = output_dir.clone();
    }
    if let Some(epochs) = args.epochs {
        spec.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        spec.data.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        spec.optimizer.base_lr = lr;
    }
    if let Some(bias_rect) = args.bias_rect {
        spec.rectification.bias_rect = bias_rect;
    }
    if let Some(budget) = args.memory_budget {
        spec.memory.memory_type = MemoryType::Episodic;
        spec.memory.budget = budget;
    }
    if let Some(seed) = args.seed {
        spec.training.seed = seed;
    }
}
