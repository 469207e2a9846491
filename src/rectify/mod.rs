//! Post-training bias rectification
//!
//! After a stage is trained, a rectifier may correct the preference of the
//! classifier head for the new classes. Rectifiers mutate the model in place
//! and run at most once per stage.

mod bic;
mod weight_aligning;

pub use bic::BiasCorrection;
pub use weight_aligning::{norm_ratio, WeightAligning};

use crate::config::{BiasRect, IncrementalSpec};
use crate::data::{Dataset, Stage};
use crate::error::Result;
use crate::model::Classifier;

/// Inputs available to a rectifier at the end of a stage
#[derive(Debug, Clone, Copy)]
pub struct RectifyContext<'a> {
    pub stage: &'a Stage,
    /// Frozen model of the previous stage
    pub old_model: Option<&'a dyn Classifier>,
    /// Exemplars replayed during the stage
    pub rehearsal: Option<&'a Dataset>,
    /// Examples withheld from training by the holdout strategy
    pub holdout: Option<&'a Dataset>,
    /// Old/new head-norm ratio stored by the orchestrator
    pub calibration: Option<f32>,
    pub multi_label: bool,
}

/// Corrects a trained model's bias towards new classes
pub trait BiasRectifier: std::fmt::Debug {
    fn rectify(&self, ctx: &RectifyContext<'_>, model: &mut dyn Classifier) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Leaves the model untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRectification;

impl BiasRectifier for NoRectification {
    fn rectify(&self, _ctx: &RectifyContext<'_>, _model: &mut dyn Classifier) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Rectifier of the configured strategy
///
/// Data-level strategies (reweighting, resampling, undersampling) have no
/// model-level step and map to [`NoRectification`].
pub fn rectifier_for(spec: &IncrementalSpec) -> Box<dyn BiasRectifier> {
    let rect = &spec.rectification;
    match rect.bias_rect {
        BiasRect::WeightAligningNoBias => Box::new(WeightAligning),
        BiasRect::Bic => Box::new(BiasCorrection::new(rect.bic_steps, rect.bic_lr)),
        _ => Box::new(NoRectification),
    }
}
