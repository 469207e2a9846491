//! Optimization loop of one incremental stage

use super::balance::ClassWeights;
use super::loss::{class_scores, classification_loss, distillation_loss};
use super::state::{StepLosses, TrainerState};
use super::summary::LossCurve;
use crate::config::{IncrementalSpec, RegType};
use crate::data::{Batch, Pipeline, Stage};
use crate::error::{Error, Result};
use crate::eval::{argmax_rows, top_k_accuracy, ConfusionMatrix};
use crate::model::Classifier;
use crate::optim::Optimizer;
use ndarray::s;
use rand::rngs::StdRng;
use std::time::Instant;
use tracing::{debug, info};

/// Learning-without-forgetting settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distillation {
    pub temperature: f32,
    pub weight: f32,
}

/// How the composite loss of a step is assembled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSettings {
    /// Sigmoid scores and binary cross-entropy instead of softmax
    pub multi_label: bool,
    /// `Some` when distillation is enabled for the run
    pub distillation: Option<Distillation>,
    /// Rescale the classification term by `|cur|/|cum|` and the
    /// distillation term by `|old|/|cum|`
    pub adjust_weights: bool,
}

impl LossSettings {
    pub fn from_spec(spec: &IncrementalSpec) -> Self {
        let distill = &spec.distillation;
        Self {
            multi_label: spec.model.sigmoid,
            distillation: (distill.reg_type == RegType::Lwf).then_some(Distillation {
                temperature: distill.lwf_loss_temp,
                weight: distill.reg_loss_weight,
            }),
            adjust_weights: distill.adjust_lwf_w,
        }
    }

    fn ce_factor(&self, stage: &Stage) -> f32 {
        if self.distillation.is_some() && self.adjust_weights {
            stage.num_cur() as f32 / stage.num_cumulative() as f32
        } else {
            1.0
        }
    }

    fn lwf_factor(&self, stage: &Stage) -> f32 {
        if self.adjust_weights {
            stage.num_old() as f32 / stage.num_cumulative() as f32
        } else {
            1.0
        }
    }
}

/// Held-out evaluation run between epochs
#[derive(Debug, Clone, PartialEq)]
pub struct EpochEvaluation {
    /// One-based epoch number
    pub epoch: usize,
    /// Mean per-class accuracy in percent
    pub test_acc: f32,
    pub top5_acc: f32,
}

/// Outcome of a stage's optimization loop
#[derive(Debug, Clone)]
pub struct StageTrainResult {
    pub epochs: usize,
    pub steps: usize,
    /// Mean total loss of the last epoch
    pub final_loss: f32,
    pub evaluations: Vec<EpochEvaluation>,
    pub elapsed_secs: f64,
}

/// Runs the learning-rate schedule of one stage over its training pipeline
pub struct StageTrainer {
    optimizer: Box<dyn Optimizer>,
    settings: LossSettings,
    state: TrainerState,
    curve: LossCurve,
}

impl StageTrainer {
    pub fn new(optimizer: Box<dyn Optimizer>, settings: LossSettings) -> Self {
        let state = TrainerState::new(optimizer.lr(), settings.distillation.is_some());
        Self { optimizer, settings, state, curve: LossCurve::new() }
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// Per-step running means collected so far
    pub fn curve_mut(&mut self) -> &mut LossCurve {
        &mut self.curve
    }

    /// Evaluate after the first five epochs and every fifth epoch after that
    pub fn should_evaluate(epoch: usize) -> bool {
        epoch < 5 || (epoch + 1) % 5 == 0
    }

    /// Train `model` for `lrs.len()` epochs, one learning rate per epoch
    ///
    /// `old_model` is the frozen model of the previous stage; its logits
    /// cover exactly the old classes of `stage`.
    pub fn train(
        &mut self,
        model: &mut dyn Classifier,
        old_model: Option<&dyn Classifier>,
        stage: &Stage,
        pipeline: &Pipeline,
        weights: &ClassWeights,
        lrs: &[f32],
        rng: &mut StdRng,
    ) -> Result<StageTrainResult> {
        self.check_models(model, old_model, stage)?;
        let start = Instant::now();
        let mut evaluations = Vec::new();
        let mut final_loss = 0.0;

        for (epoch, &lr) in lrs.iter().enumerate() {
            if lr != self.optimizer.lr() {
                info!(lr, "New learning rate: {lr}");
            }
            self.optimizer.set_lr(lr);
            self.state.lr = lr;
            self.state.begin_epoch(epoch);

            let epoch_start = Instant::now();
            for batch in pipeline.epoch(rng) {
                let losses = self.train_step(model, old_model, stage, &batch, weights)?;
                self.state.record(&losses);
                self.record_curve();
            }
            final_loss = self.state.metrics.train_loss.result();

            if Self::should_evaluate(epoch) {
                let eval_start = Instant::now();
                let (test_acc, top5_acc) = evaluate_current(model, stage, self.settings.multi_label);
                self.report(epoch, test_acc, top5_acc, epoch_start, eval_start);
                evaluations.push(EpochEvaluation { epoch: epoch + 1, test_acc, top5_acc });
            }
        }

        Ok(StageTrainResult {
            epochs: lrs.len(),
            steps: self.state.step,
            final_loss,
            evaluations,
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// One optimization step on `batch`
    ///
    /// Gradients of every loss term are fully accumulated before the
    /// optimizer updates the parameters.
    pub fn train_step(
        &mut self,
        model: &mut dyn Classifier,
        old_model: Option<&dyn Classifier>,
        stage: &Stage,
        batch: &Batch,
        weights: &ClassWeights,
    ) -> Result<StepLosses> {
        let logits = model.forward(&batch.inputs);
        let sample_weights = weights.gather(&batch.labels);

        let ce = classification_loss(&logits, &batch.labels, &sample_weights, self.settings.multi_label)
            .scaled(self.settings.ce_factor(stage));
        let mut grad_logits = ce.grad;
        let reg = model.regularization_loss();

        let mut lwf = 0.0;
        if let Some(distill) = self.settings.distillation {
            if !stage.is_first_stage() {
                let frozen = old_model
                    .ok_or_else(|| {
                        Error::ConfigError(
                            "distillation requires the model of the previous stage".to_string(),
                        )
                    })?
                    .forward(&batch.inputs);
                let num_old = stage.num_old();
                let out = distillation_loss(
                    &logits.slice(s![.., ..num_old]),
                    &frozen,
                    distill.temperature,
                    self.settings.multi_label,
                )
                .scaled(distill.weight * self.settings.lwf_factor(stage));
                let mut old_cols = grad_logits.slice_mut(s![.., ..num_old]);
                old_cols += &out.grad;
                lwf = out.value;
            }
        }

        model.zero_grad();
        model.backward(&batch.inputs, &grad_logits);
        model.regularization_backward();
        self.optimizer.step(&mut model.params_mut());
        self.state.updates += 1;

        let correct = argmax_rows(&logits)
            .iter()
            .zip(&batch.labels)
            .filter(|(pred, label)| pred == label)
            .count();

        Ok(StepLosses {
            total: ce.value + reg + lwf,
            ce: ce.value,
            reg,
            lwf,
            correct,
            batch_size: batch.size(),
        })
    }

    fn check_models(
        &self,
        model: &dyn Classifier,
        old_model: Option<&dyn Classifier>,
        stage: &Stage,
    ) -> Result<()> {
        if model.num_classes() != stage.num_cumulative() {
            return Err(Error::Data(format!(
                "model has {} outputs but stage {} has {} classes",
                model.num_classes(),
                stage.group_idx,
                stage.num_cumulative()
            )));
        }
        if let (Some(_), Some(old)) = (self.settings.distillation, old_model) {
            if !stage.is_first_stage() && old.num_classes() != stage.num_old() {
                return Err(Error::Data(format!(
                    "previous model has {} outputs, expected {} old classes",
                    old.num_classes(),
                    stage.num_old()
                )));
            }
        }
        Ok(())
    }

    fn record_curve(&mut self) {
        let step = self.state.step;
        let metrics = &self.state.metrics;
        self.curve.add("train_loss", step, metrics.train_loss.result());
        self.curve.add("ce_loss", step, metrics.ce_loss.result());
        self.curve.add("reg_loss", step, metrics.reg_loss.result());
        self.curve.add("train_acc", step, metrics.accuracy.result());
        if let Some(lwf) = metrics.lwf_loss {
            self.curve.add("lwf_loss", step, lwf.result());
        }
    }

    fn report(&self, epoch: usize, test_acc: f32, top5_acc: f32, epoch_start: Instant, eval_start: Instant) {
        let m = &self.state.metrics;
        let lwf_str = m.lwf_loss.map(|l| format!("lwf {:.4}, ", l.result())).unwrap_or_default();
        info!(
            epoch = epoch + 1,
            loss = m.train_loss.result(),
            test_acc,
            "Epoch {}: Loss {:.4} (ce {:.4}, {}reg {:.4}), Train Acc {:.2}, Test Acc {:.2}, Top-5 Acc {:.2}, Time {:.2} ({:.2})",
            epoch + 1,
            m.train_loss.result(),
            m.ce_loss.result(),
            lwf_str,
            m.reg_loss.result(),
            m.accuracy.result(),
            test_acc,
            top5_acc,
            epoch_start.elapsed().as_secs_f32(),
            eval_start.elapsed().as_secs_f32(),
        );
    }
}

/// Mean per-class and top-5 accuracy on the stage's held-out set
fn evaluate_current(model: &dyn Classifier, stage: &Stage, multi_label: bool) -> (f32, f32) {
    if stage.test.is_empty() {
        debug!(group = stage.group_idx, "Empty test set, skipping evaluation");
        return (0.0, 0.0);
    }
    let (x, y) = stage.test.to_matrix();
    let scores = class_scores(&model.forward(&x), multi_label);
    let preds = argmax_rows(&scores);
    let num_classes = stage.num_cumulative();
    let confusion = ConfusionMatrix::from_predictions(&preds, &y, num_classes);
    let mean_acc = confusion.mean_class_accuracy(0..num_classes).unwrap_or(0.0);
    (mean_acc, top_k_accuracy(&scores, &y, 5))
}
