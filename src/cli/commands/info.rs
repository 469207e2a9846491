//! Info command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_config, InfoArgs, OutputFormat};
use crate::runner::build_task;

pub fn run_info(args: InfoArgs, level: LogLevel) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;

    match args.format {
        OutputFormat::Text => {
            log(level, LogLevel::Normal, "Configuration Info:");
            println!();
            println!("Dataset: {}", spec.dataset_str());
            println!(
                "Optimizer: {} (lr={})",
                spec.optimizer.name, spec.optimizer.base_lr
            );
            println!("Epochs: {}", spec.training.epochs);
            println!("Batch size: {}", spec.data.batch_size);
            println!("Bias rectification: {}", spec.rectification.bias_rect);
            println!("Run dir: {}", spec.run_dir().display());

            let task = build_task(&spec).map_err(|e| format!("Data error: {e}"))?;
            println!();
            println!("Stages:");
            for stage in task.stages() {
                let stage = stage.map_err(|e| format!("Data error: {e}"))?;
                println!(
                    "  {}: classes {:?}, {} train / {} test examples",
                    stage.folder_name(),
                    stage.cur_classes,
                    stage.train.len(),
                    stage.test.len()
                );
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&spec)
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&spec)
                .map_err(|e| format!("YAML serialization error: {e}"))?;
            println!("{yaml}");
        }
    }

    Ok(())
}
