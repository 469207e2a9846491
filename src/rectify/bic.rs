//! Bias correction layer fitted on held-out exemplars

use super::{BiasRectifier, RectifyContext};
use crate::error::{Error, Result};
use crate::model::Classifier;
use crate::train::classification_loss;
use ndarray::{s, Array2};
use std::ops::Range;
use tracing::info;

/// Two-parameter affine correction `alpha * z + beta` of the new-class logits
///
/// The parameters are fitted by gradient descent on the holdout set with the
/// stage's classification loss, then folded into the head so the corrected
/// model needs no extra layer.
#[derive(Debug, Clone, Copy)]
pub struct BiasCorrection {
    steps: usize,
    lr: f32,
}

impl BiasCorrection {
    pub fn new(steps: usize, lr: f32) -> Self {
        Self { steps, lr }
    }

    /// Fit `(alpha, beta)` for the logit columns `new`
    pub fn fit(
        &self,
        logits: &Array2<f32>,
        labels: &[usize],
        new: Range<usize>,
        multi_label: bool,
    ) -> (f32, f32) {
        let weights = vec![1.0; labels.len()];
        let original = logits.slice(s![.., new.clone()]);
        let (mut alpha, mut beta) = (1.0f32, 0.0f32);

        for _ in 0..self.steps {
            let corrected = correct(logits, new.clone(), alpha, beta);
            let out = classification_loss(&corrected, labels, &weights, multi_label);
            let grad = out.grad.slice(s![.., new.clone()]);
            let d_alpha = (&grad * &original).sum();
            let d_beta = grad.sum();
            alpha -= self.lr * d_alpha;
            beta -= self.lr * d_beta;
        }
        (alpha, beta)
    }
}

fn correct(logits: &Array2<f32>, new: Range<usize>, alpha: f32, beta: f32) -> Array2<f32> {
    let mut z = logits.clone();
    z.slice_mut(s![.., new]).mapv_inplace(|v| alpha * v + beta);
    z
}

impl BiasRectifier for BiasCorrection {
    fn rectify(&self, ctx: &RectifyContext<'_>, model: &mut dyn Classifier) -> Result<()> {
        let stage = ctx.stage;
        if stage.is_first_stage() {
            return Ok(());
        }
        let holdout = ctx
            .holdout
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Data("bias correction needs held-out exemplars".to_string()))?;

        let (x, y) = holdout.to_matrix();
        let new = stage.num_old()..stage.num_cumulative();
        let (alpha, beta) = self.fit(&model.forward(&x), &y, new.clone(), ctx.multi_label);
        info!(group = stage.group_idx, alpha, beta, holdout = y.len(), "Fitted bias correction");
        model.rescale_head(new, alpha, beta);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "bic"
    }
}
