//! Train command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{apply_overrides, load_config, validate_config, TrainArgs};
use crate::runner::{build_model, build_task, IncrementalRunner};

pub fn run_train(args: TrainArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Recordar: Training from {}", args.config.display()),
    );

    let mut spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    apply_overrides(&mut spec, &args);
    validate_config(&spec).map_err(|e| format!("Invalid overrides: {e}"))?;

    let task = build_task(&spec).map_err(|e| format!("Data error: {e}"))?;
    let input_dim = task
        .stage(0)
        .map_err(|e| format!("Data error: {e}"))?
        .train
        .feature_dim();

    if args.dry_run {
        log(level, LogLevel::Normal, "Dry run - config validated successfully");
        log(level, LogLevel::Verbose, &format!("  Run dir: {}", spec.run_dir().display()));
        log(
            level,
            LogLevel::Verbose,
            &format!(
                "  Classes: {} in {} groups",
                task.num_classes(),
                task.nb_groups()
            ),
        );
        log(
            level,
            LogLevel::Verbose,
            &format!(
                "  Optimizer: {} (lr={})",
                spec.optimizer.name, spec.optimizer.base_lr
            ),
        );
        log(level, LogLevel::Verbose, &format!("  Bias rectification: {}", spec.rectification.bias_rect));
        return Ok(());
    }

    let model = build_model(&spec, input_dim);
    let mut runner = IncrementalRunner::new(spec, model).map_err(|e| format!("Setup error: {e}"))?;
    let outcome = runner.run_all(&task).map_err(|e| format!("Training error: {e}"))?;

    if let Some(report) = outcome.final_report() {
        log(
            level,
            LogLevel::Normal,
            &format!(
                "Final: top-1 {:.2}, top-5 {:.2}, harmonic mean {:.2}",
                report.top1_acc, report.top5_acc, report.harmonic_mean
            ),
        );
    }
    log(
        level,
        LogLevel::Normal,
        &format!("Training complete! Results in {}", outcome.run_dir.display()),
    );
    Ok(())
}
