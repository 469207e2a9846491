//! Stage training: class weights, composite loss and the epoch loop
//!
//! A stage trains the current model on its mixed dataset with
//! `classification + regularization (+ distillation)` loss, one learning
//! rate per epoch. All mutable loop state lives in [`TrainerState`].

mod balance;
mod loss;
mod stage_trainer;
mod state;
mod summary;

pub use balance::{compute_class_weights, ClassWeights};
pub use loss::{class_scores, classification_loss, distillation_loss, sigmoid, softmax_2d, LossOutput};
pub use stage_trainer::{
    Distillation, EpochEvaluation, LossSettings, StageTrainResult, StageTrainer,
};
pub use state::{EpochMetrics, RunningMean, StepLosses, TrainerState};
pub use summary::{sparkline, LossCurve};
