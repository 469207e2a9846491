//! Adam optimizer

use super::optimizer::state_slot;
use super::Optimizer;
use crate::model::Param;
use ndarray::{Array2, Zip};

/// Adam optimizer
///
/// Weight decay is not applied here; the classifier contributes its own L2
/// penalty to the loss.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<Option<Array2<f32>>>, // First moment
    v: Vec<Option<Array2<f32>>>, // Second moment
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self { lr, beta1, beta2, epsilon, t: 0, m: Vec::new(), v: Vec::new() }
    }

    /// Adam with beta1 = 0.9, beta2 = 0.999, epsilon = 1e-7
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-7)
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Param]) {
        self.t += 1;

        // Bias correction folded into the step size
        let lr_t = self.lr
            * ((1.0 - self.beta2.powi(self.t as i32)).sqrt()
                / (1.0 - self.beta1.powi(self.t as i32)));
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);

        for (i, param) in params.iter_mut().enumerate() {
            let m = state_slot(&mut self.m, i, &param.grad);
            let v = state_slot(&mut self.v, i, &param.grad);
            let param = &mut **param;
            Zip::from(&mut param.value).and(&param.grad).and(m).and(v).for_each(
                |p, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + eps);
                },
            );
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "adam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_lr() {
        let mut opt = Adam::default_params(0.01);
        let mut p = Param::new("w", array![[1.0, -1.0]]);
        p.grad = array![[3.0, -0.2]];
        opt.step(&mut [&mut p]);
        // first bias-corrected step is lr * sign(grad)
        assert_abs_diff_eq!(p.value[[0, 0]], 0.99, epsilon = 1e-4);
        assert_abs_diff_eq!(p.value[[0, 1]], -0.99, epsilon = 1e-4);
        assert_eq!(opt.step_count(), 1);
    }

    #[test]
    fn test_converges_on_quadratic() {
        let mut opt = Adam::default_params(0.1);
        let mut p = Param::new("w", array![[4.0, -2.0]]);
        for _ in 0..500 {
            p.grad = p.value.mapv(|v| 2.0 * v);
            opt.step(&mut [&mut p]);
        }
        assert!(p.value.iter().all(|v| v.abs() < 0.1));
    }

    #[test]
    fn test_set_lr() {
        let mut opt = Adam::default_params(0.1);
        opt.set_lr(0.01);
        assert_eq!(opt.lr(), 0.01);
    }
}
