//! Optimizer trait

use super::{Adam, SGD};
use crate::config::{OptimSpec, OptimizerKind};
use crate::model::Param;
use ndarray::Array2;

/// Trait for optimization algorithms
///
/// Parameters are passed in a stable order on every step. Per-parameter
/// state is reset when a parameter changes shape (a grown classifier head).
pub trait Optimizer: Send {
    /// Perform a single optimization step
    fn step(&mut self, params: &mut [&mut Param]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &mut [&mut Param]) {
        for param in params.iter_mut() {
            param.zero_grad();
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);

    fn name(&self) -> &'static str;
}

/// Build the optimizer named in the run specification
pub fn build_optimizer(spec: &OptimSpec) -> Box<dyn Optimizer> {
    match spec.name {
        OptimizerKind::Adam => Box::new(Adam::default_params(spec.base_lr)),
        OptimizerKind::Sgd => Box::new(SGD::new(spec.base_lr, spec.momentum)),
    }
}

/// Per-parameter state slot, zeroed when missing or mis-shaped
pub(super) fn state_slot<'a>(
    slots: &'a mut Vec<Option<Array2<f32>>>,
    idx: usize,
    like: &Array2<f32>,
) -> &'a mut Array2<f32> {
    if slots.len() <= idx {
        slots.resize(idx + 1, None);
    }
    let slot = &mut slots[idx];
    let stale = slot.as_ref().map_or(true, |state| state.raw_dim() != like.raw_dim());
    if stale {
        *slot = Some(Array2::zeros(like.raw_dim()));
    }
    slot.get_or_insert_with(|| Array2::zeros(like.raw_dim()))
}
