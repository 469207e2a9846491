//! Optimizers and learning-rate schedules

mod adam;
mod optimizer;
mod scheduler;
mod sgd;

pub use adam::Adam;
pub use optimizer::{build_optimizer, Optimizer};
pub use scheduler::{stage_learning_rates, LRScheduler, MultiStepLR};
pub use sgd::SGD;
