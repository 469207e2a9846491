//! Weight aligning: equalize the mean head norm of new and old classes

use super::{BiasRectifier, RectifyContext};
use crate::data::Stage;
use crate::error::Result;
use crate::model::Classifier;
use tracing::info;

/// `mean(|w_old|) / mean(|w_new|)` over the head's class weight vectors
///
/// `None` at the first stage or when the new-class norms vanish.
pub fn norm_ratio(model: &dyn Classifier, stage: &Stage) -> Option<f32> {
    let num_old = stage.num_old();
    let num_cum = stage.num_cumulative();
    if num_old == 0 || num_cum <= num_old || model.num_classes() < num_cum {
        return None;
    }
    let norms = model.head_norms();
    let old_mean = norms.slice(ndarray::s![..num_old]).mean()?;
    let new_mean = norms.slice(ndarray::s![num_old..num_cum]).mean()?;
    (new_mean > 0.0).then(|| old_mean / new_mean)
}

/// Scale the new-class logits by the old/new norm ratio
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightAligning;

impl BiasRectifier for WeightAligning {
    fn rectify(&self, ctx: &RectifyContext<'_>, model: &mut dyn Classifier) -> Result<()> {
        let stage = ctx.stage;
        if stage.is_first_stage() {
            return Ok(());
        }
        let Some(gamma) = ctx.calibration.or_else(|| norm_ratio(model, stage)) else {
            return Ok(());
        };
        info!(group = stage.group_idx, gamma, "Aligning new-class weights");
        model.rescale_head(stage.num_old()..stage.num_cumulative(), gamma, 0.0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "weight_aligning"
    }
}
