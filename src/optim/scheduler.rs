//! Learning rate schedules
//!
//! Every stage consumes a precomputed per-epoch learning-rate sequence.
//! [`stage_learning_rates`] builds that sequence from the run's multi-step
//! decay settings, with a separate epoch count and milestones for the first
//! stage when configured.

use super::Optimizer;
use crate::config::{OptimSpec, TrainingParams};

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f32;

    /// Step the scheduler (called after each epoch)
    fn step(&mut self);
}

/// Multi-step decay
///
/// Multiplies the learning rate by `gamma` at every milestone epoch.
///
/// Formula: lr_t = lr_initial * gamma^(number of milestones <= t)
pub struct MultiStepLR {
    lr_initial: f32,
    gamma: f32,
    milestones: Vec<usize>,
    current_epoch: usize,
}

impl MultiStepLR {
    pub fn new(lr_initial: f32, milestones: Vec<usize>, gamma: f32) -> Self {
        Self { lr_initial, gamma, milestones, current_epoch: 0 }
    }

    /// Apply the current learning rate to an optimizer
    pub fn apply(&self, optimizer: &mut dyn Optimizer) {
        optimizer.set_lr(self.get_lr());
    }
}

impl LRScheduler for MultiStepLR {
    fn get_lr(&self) -> f32 {
        let decays = self.milestones.iter().filter(|&&m| m <= self.current_epoch).count();
        self.lr_initial * self.gamma.powi(decays as i32)
    }

    fn step(&mut self) {
        self.current_epoch += 1;
    }
}

/// Per-epoch learning rates of one stage
pub fn stage_learning_rates(
    training: &TrainingParams,
    optim: &OptimSpec,
    first_stage: bool,
) -> Vec<f32> {
    let (epochs, milestones) = if first_stage {
        (
            training.base_epochs.unwrap_or(training.epochs),
            training.base_lr_milestones.clone().unwrap_or_else(|| training.lr_milestones.clone()),
        )
    } else {
        (training.epochs, training.lr_milestones.clone())
    };

    let mut scheduler = MultiStepLR::new(optim.base_lr, milestones, training.lr_gamma);
    (0..epochs)
        .map(|_| {
            let lr = scheduler.get_lr();
            scheduler.step();
            lr
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::SGD;
    use approx::assert_relative_eq;

    #[test]
    fn test_multi_step_decay() {
        let mut s = MultiStepLR::new(1.0, vec![2, 4], 0.1);
        let lrs: Vec<f32> = (0..6)
            .map(|_| {
                let lr = s.get_lr();
                s.step();
                lr
            })
            .collect();
        assert_relative_eq!(lrs[1], 1.0);
        assert_relative_eq!(lrs[2], 0.1);
        assert_relative_eq!(lrs[3], 0.1);
        assert_relative_eq!(lrs[5], 0.01, epsilon = 1e-7);
    }

    #[test]
    fn test_apply_sets_optimizer_lr() {
        let s = MultiStepLR::new(0.5, vec![], 0.1);
        let mut opt = SGD::new(0.0, 0.0);
        s.apply(&mut opt);
        assert_eq!(opt.lr(), 0.5);
    }

    #[test]
    fn test_first_stage_override() {
        let training = TrainingParams {
            epochs: 4,
            lr_milestones: vec![2],
            base_epochs: Some(6),
            base_lr_milestones: Some(vec![3, 5]),
            ..TrainingParams::default()
        };
        let optim = OptimSpec { base_lr: 1.0, ..OptimSpec::default() };

        let base = stage_learning_rates(&training, &optim, true);
        assert_eq!(base.len(), 6);
        assert_relative_eq!(base[2], 1.0);
        assert_relative_eq!(base[3], 0.1);

        let later = stage_learning_rates(&training, &optim, false);
        assert_eq!(later.len(), 4);
        assert_relative_eq!(later[2], 0.1);
    }
}
