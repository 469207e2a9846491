//! Validate command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_config, validate_config, DataSource, IncrementalSpec, MemoryType, RegType, ValidateArgs};

/// Format data configuration as a string
pub fn format_data_info(spec: &IncrementalSpec) -> String {
    let data = &spec.data;
    let source = match &data.source {
        DataSource::Synthetic { num_classes, feature_dim, .. } => {
            format!("synthetic ({num_classes} classes, {feature_dim} features)")
        }
        DataSource::Json { train, test } => {
            format!("{} / {}", train.display(), test.display())
        }
    };
    [
        format!("  Dataset: {} [{source}]", data.name),
        format!("  Base classes: {}, increment: {}", data.base_classes, data.increment),
        format!("  Batch size: {}", data.batch_size),
        format!("  Augmentation: {}", if data.no_aug { "off" } else { "on" }),
    ]
    .join("\n")
}

/// Format optimizer and schedule as a string
pub fn format_training_info(spec: &IncrementalSpec) -> String {
    let training = &spec.training;
    let mut lines = vec![
        format!("  Optimizer: {}", spec.optimizer.name),
        format!("  Learning rate: {}", spec.optimizer.base_lr),
        format!("  Epochs: {} (milestones {:?})", training.epochs, training.lr_milestones),
    ];
    if let Some(base_epochs) = training.base_epochs {
        lines.push(format!("  Base epochs: {base_epochs}"));
    }
    lines.push(format!("  Seed: {}", training.seed));
    lines.join("\n")
}

/// Format memory, rectification and distillation as a string
pub fn format_incremental_info(spec: &IncrementalSpec) -> String {
    let mut lines = vec![match spec.memory.memory_type {
        MemoryType::Episodic => format!("  Memory: episodic, budget {}", spec.memory.budget),
        MemoryType::None => "  Memory: none".to_string(),
    }];
    lines.push(format!("  Bias rectification: {}", spec.rectification.bias_rect));
    if spec.rectification.bias_rect.uses_holdout() {
        lines.push(format!("    Held-out ratio: {}", spec.rectification.val_exemplars_ratio));
    }
    if spec.distillation.reg_type == RegType::Lwf {
        lines.push(format!(
            "  Distillation: lwf (T={}, weight={})",
            spec.distillation.lwf_loss_temp, spec.distillation.reg_loss_weight
        ));
    }
    lines.join("\n")
}

/// Print detailed configuration summary
pub fn print_detailed_summary(spec: &IncrementalSpec) {
    println!();
    println!("Configuration Summary:");
    println!("{}", format_data_info(spec));
    println!();
    println!("{}", format_training_info(spec));
    println!();
    println!("{}", format_incremental_info(spec));
    println!();
    println!("  Output: {}", spec.run_dir().display());
}

pub fn run_validate(args: ValidateArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Validating config: {}", args.config.display()),
    );

    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;

    validate_config(&spec).map_err(|e| format!("Validation failed: {e}"))?;

    log(level, LogLevel::Normal, "Configuration is valid");

    if args.detailed {
        print_detailed_summary(&spec);
    }

    Ok(())
}
