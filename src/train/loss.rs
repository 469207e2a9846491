//! Composite stage loss with analytic gradients
//!
//! Every function returns the scalar loss together with its gradient with
//! respect to the logits it was given, so the trainer can run one backward
//! pass through the classifier for the summed objective.

use ndarray::{Array2, ArrayView2, Axis};

/// Scalar loss and `d loss / d logits`
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub value: f32,
    pub grad: Array2<f32>,
}

impl LossOutput {
    /// Multiply loss and gradient by `factor`
    pub fn scaled(mut self, factor: f32) -> Self {
        self.value *= factor;
        self.grad *= factor;
        self
    }
}

/// Row-wise softmax
pub fn softmax_2d(logits: &ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Per-class scores: sigmoid in multi-label mode, softmax otherwise
pub fn class_scores(logits: &Array2<f32>, multi_label: bool) -> Array2<f32> {
    if multi_label {
        logits.mapv(sigmoid)
    } else {
        softmax_2d(&logits.view())
    }
}

/// `log(sigmoid(x))`, stable for large |x|
fn log_sigmoid(x: f32) -> f32 {
    -(1.0 + (-x.abs()).exp()).ln() + x.min(0.0)
}

/// Binary cross-entropy from logits against soft or hard targets,
/// averaged over classes then over the batch
fn bce_from_logits(
    logits: &ArrayView2<'_, f32>,
    targets: &Array2<f32>,
    sample_weights: Option<&[f32]>,
) -> LossOutput {
    let (n, c) = logits.dim();
    let mut value = 0.0;
    let mut grad = Array2::zeros((n, c));
    for i in 0..n {
        let w = sample_weights.map_or(1.0, |ws| ws[i]);
        let mut row_loss = 0.0;
        for j in 0..c {
            let z = logits[[i, j]];
            let t = targets[[i, j]];
            row_loss -= t * log_sigmoid(z) + (1.0 - t) * log_sigmoid(-z);
            grad[[i, j]] = w * (sigmoid(z) - t) / (c as f32 * n as f32);
        }
        value += w * row_loss / c as f32;
    }
    LossOutput { value: value / n.max(1) as f32, grad }
}

/// Softmax cross-entropy from logits against a target distribution,
/// averaged over the batch
fn softmax_ce(
    logits: &ArrayView2<'_, f32>,
    targets: &Array2<f32>,
    sample_weights: Option<&[f32]>,
) -> LossOutput {
    let n = logits.nrows();
    let probs = softmax_2d(logits);
    let mut value = 0.0;
    let mut grad = &probs - targets;
    for (i, mut row) in grad.axis_iter_mut(Axis(0)).enumerate() {
        let w = sample_weights.map_or(1.0, |ws| ws[i]);
        let ce: f32 = targets
            .row(i)
            .iter()
            .zip(probs.row(i))
            .map(|(&t, &p)| -t * p.max(1e-12).ln())
            .sum();
        value += w * ce;
        row.mapv_inplace(|g| w * g / n as f32);
    }
    LossOutput { value: value / n.max(1) as f32, grad }
}

fn one_hot(labels: &[usize], num_classes: usize) -> Array2<f32> {
    let mut out = Array2::zeros((labels.len(), num_classes));
    for (i, &label) in labels.iter().enumerate() {
        out[[i, label]] = 1.0;
    }
    out
}

/// Weighted classification loss
///
/// Sparse categorical cross-entropy, or binary cross-entropy against one-hot
/// targets in multi-label mode. Each example contributes with its class
/// weight; the sum is divided by the batch size.
pub fn classification_loss(
    logits: &Array2<f32>,
    labels: &[usize],
    sample_weights: &[f32],
    multi_label: bool,
) -> LossOutput {
    let targets = one_hot(labels, logits.ncols());
    if multi_label {
        bce_from_logits(&logits.view(), &targets, Some(sample_weights))
    } else {
        softmax_ce(&logits.view(), &targets, Some(sample_weights))
    }
}

/// Learning-without-forgetting distillation term
///
/// The frozen model's outputs softened by `temperature` are the targets for
/// the current model's old-class logits divided by the same temperature.
/// The returned gradient covers only the first `old_logits.ncols()` columns
/// of the current logits.
pub fn distillation_loss(
    old_logits: &ArrayView2<'_, f32>,
    frozen_logits: &Array2<f32>,
    temperature: f32,
    multi_label: bool,
) -> LossOutput {
    let student = old_logits.mapv(|z| z / temperature);
    let scaled_frozen = frozen_logits / temperature;
    let targets = class_scores(&scaled_frozen, multi_label);

    let out = if multi_label {
        bce_from_logits(&student.view(), &targets, None)
    } else {
        softmax_ce(&student.view(), &targets, None)
    };
    // chain rule through z / T
    LossOutput { value: out.value, grad: out.grad / temperature }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s};

    fn numeric_grad<F: Fn(&Array2<f32>) -> f32>(f: F, x: &Array2<f32>) -> Array2<f32> {
        let eps = 1e-2;
        let mut out = Array2::zeros(x.dim());
        for (pos, _) in x.indexed_iter() {
            let mut plus = x.clone();
            plus[pos] += eps;
            let mut minus = x.clone();
            minus[pos] -= eps;
            out[pos] = (f(&plus) - f(&minus)) / (2.0 * eps);
        }
        out
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let p = softmax_2d(&array![[1.0, 2.0, 3.0], [1000.0, 0.0, -1000.0]].view());
        for row in p.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(p[[1, 0]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_uniform_logits_cross_entropy_is_log_c() {
        let logits = Array2::zeros((2, 4));
        let out = classification_loss(&logits, &[0, 3], &[1.0, 1.0], false);
        assert_abs_diff_eq!(out.value, 4f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_sample_weights_scale_contribution() {
        let logits = array![[2.0, 0.0], [0.0, 2.0]];
        let base = classification_loss(&logits, &[1, 1], &[1.0, 1.0], false);
        let weighted = classification_loss(&logits, &[1, 1], &[3.0, 1.0], false);
        let first_only = classification_loss(&logits.slice(s![0..1, ..]).to_owned(), &[1], &[1.0], false);
        // weighted mean: (3 * l0 + l1) / 2
        assert_abs_diff_eq!(
            weighted.value - base.value,
            first_only.value,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_ce_gradient_matches_numeric() {
        let logits = array![[0.5, -1.0, 2.0], [0.1, 0.2, -0.3]];
        let labels = [2, 0];
        let weights = [0.5, 2.0];
        let out = classification_loss(&logits, &labels, &weights, false);
        let numeric =
            numeric_grad(|z| classification_loss(z, &labels, &weights, false).value, &logits);
        for (a, b) in out.grad.iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_bce_gradient_matches_numeric() {
        let logits = array![[0.5, -1.0, 2.0], [0.1, 0.2, -0.3]];
        let labels = [2, 0];
        let weights = [1.0, 0.25];
        let out = classification_loss(&logits, &labels, &weights, true);
        let numeric =
            numeric_grad(|z| classification_loss(z, &labels, &weights, true).value, &logits);
        for (a, b) in out.grad.iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_distillation_gradient_matches_numeric() {
        let frozen = array![[1.0, -0.5], [0.3, 0.9]];
        let current = array![[0.2, 0.4], [-1.0, 1.5]];
        for multi_label in [false, true] {
            let out = distillation_loss(&current.view(), &frozen, 2.0, multi_label);
            let numeric = numeric_grad(
                |z| distillation_loss(&z.view(), &frozen, 2.0, multi_label).value,
                &current,
            );
            for (a, b) in out.grad.iter().zip(numeric.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_distillation_minimized_by_matching_frozen_logits() {
        let frozen = array![[1.0, -0.5, 0.2]];
        let matched = distillation_loss(&frozen.view(), &frozen, 2.0, false);
        let other = distillation_loss(&array![[-1.0, 1.0, 0.0]].view(), &frozen, 2.0, false);
        assert!(matched.value < other.value);
        assert!(matched.grad.iter().all(|g| g.abs() < 1e-6));
    }

    #[test]
    fn test_scaled() {
        let out = LossOutput { value: 2.0, grad: array![[1.0, -1.0]] }.scaled(0.5);
        assert_eq!(out.value, 1.0);
        assert_eq!(out.grad, array![[0.5, -0.5]]);
    }
}
