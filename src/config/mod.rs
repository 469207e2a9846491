//! Declarative configuration of incremental runs
//!
//! A run is described by one YAML document ([`IncrementalSpec`]). It is
//! parsed into typed enums, validated as a whole and may be adjusted by CLI
//! overrides before any stage executes.

mod cli;
mod loader;
mod schema;
pub mod validate;

pub use cli::{
    apply_overrides, parse_args, Cli, Command, InfoArgs, OutputFormat, TrainArgs, ValidateArgs,
};
pub use loader::{load_config, parse_config};
pub use schema::{
    AugmentSpec, BiasRect, DataSource, DataSpec, DistillSpec, EvalSpec, ExemplarSelection,
    IncrementalSpec, MemorySpec, MemoryType, ModelSpec, OptimSpec, OptimizerKind, OutputSpec,
    RectificationSpec, RegType, TrainingParams,
};
pub use validate::{validate_config, ValidationError};
