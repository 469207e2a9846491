//! Recordar: class-incremental training
//!
//! Trains a classifier over a sequence of stages, each introducing new
//! classes, with:
//! - Episodic rehearsal memory (herding or random exemplar selection)
//! - Rehearsal mixing with resampling or held-out exemplars
//! - Learning-without-forgetting distillation from the previous stage
//! - Bias rectification (class reweighting, weight aligning, BiC)
//! - Resumable runs through checkpoint probing
//!
//! # Example
//!
//! ```no_run
//! use recordar::config::load_config;
//! use recordar::runner::{build_model, build_task, IncrementalRunner};
//!
//! let spec = load_config("config.yaml")?;
//! let task = build_task(&spec)?;
//! let input_dim = task.stage(0)?.train.feature_dim();
//! let model = build_model(&spec, input_dim);
//!
//! let mut runner = IncrementalRunner::new(spec, model)?;
//! let outcome = runner.run_all(&task)?;
//! if let Some(report) = outcome.final_report() {
//!     println!("top-1 {:.2}", report.top1_acc);
//! }
//! # Ok::<(), recordar::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod gate;
pub mod model;
pub mod optim;
pub mod rectify;
pub mod rehearsal;
pub mod resample;
pub mod runner;
pub mod stats;
pub mod telemetry;
pub mod train;

pub use error::{Error, Result};
pub use gate::{ExecutionMode, StageCheckpointGate};
pub use runner::{IncrementalRunner, RunOutcome, StageOutcome};
