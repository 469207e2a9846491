//! Stochastic Gradient Descent optimizer

use super::optimizer::state_slot;
use super::Optimizer;
use crate::model::Param;
use ndarray::Array2;

/// SGD optimizer with optional momentum
pub struct SGD {
    lr: f32,
    momentum: f32,
    velocities: Vec<Option<Array2<f32>>>,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self { lr, momentum, velocities: Vec::new() }
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: &mut [&mut Param]) {
        let (lr, momentum) = (self.lr, self.momentum);
        for (i, param) in params.iter_mut().enumerate() {
            if momentum > 0.0 {
                // v = momentum * v - lr * grad; param += v
                let velocity = state_slot(&mut self.velocities, i, &param.grad);
                velocity.zip_mut_with(&param.grad, |v, &g| *v = momentum * *v - lr * g);
                param.value += &*velocity;
            } else {
                param.value.scaled_add(-lr, &param.grad);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "sgd"
    }
}
