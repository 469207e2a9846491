//! Evaluation metrics and the stage evaluator

mod confusion;
mod evaluator;
mod metrics;

pub use confusion::ConfusionMatrix;
pub use evaluator::{read_report, write_report, EvalReport, Evaluator, StageEvaluator};
pub use metrics::{argmax_rows, harmonic_mean, top_k_accuracy};
