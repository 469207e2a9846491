//! Stage-level evaluation on the held-out data of all cumulative classes

use super::confusion::ConfusionMatrix;
use super::metrics::{argmax_rows, harmonic_mean, top_k_accuracy};
use crate::data::Stage;
use crate::error::{Error, Result};
use crate::model::Classifier;
use crate::rehearsal::{l2_normalize_rows, RehearsalMemory};
use crate::train::class_scores;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Accuracies of one evaluation, in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    /// Mean per-class accuracy over the cumulative classes
    pub top1_acc: f32,
    pub top5_acc: f32,
    pub harmonic_mean: f32,
    /// `None` at the first stage
    pub old_acc: Option<f32>,
    pub new_acc: f32,
    pub per_class_acc: Vec<Option<f32>>,
    /// Nearest-mean-of-exemplars classification was used
    pub nme: bool,
}

/// Evaluation of a model at the end of a stage
pub trait Evaluator {
    /// Evaluate `model` on `stage.test`
    ///
    /// With `memory`, classification uses the nearest mean of the stored
    /// exemplars instead of the model's head. With `stage_folder`, the report
    /// is written to `<stage_folder>/eval.json` below the evaluator's output.
    fn evaluate(
        &self,
        model: &dyn Classifier,
        stage: &Stage,
        stage_folder: Option<&str>,
        memory: Option<&dyn RehearsalMemory>,
    ) -> Result<EvalReport>;
}

/// Default evaluator: top-1, top-5 and old/new harmonic mean
#[derive(Debug, Clone)]
pub struct StageEvaluator {
    multi_label: bool,
    output_dir: Option<PathBuf>,
}

impl StageEvaluator {
    pub fn new(multi_label: bool) -> Self {
        Self { multi_label, output_dir: None }
    }

    /// Persist reports below `dir`
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    fn scores(
        &self,
        model: &dyn Classifier,
        x: &Array2<f32>,
        stage: &Stage,
        memory: Option<&dyn RehearsalMemory>,
    ) -> Result<Array2<f32>> {
        match memory {
            None => Ok(class_scores(&model.forward(x), self.multi_label)),
            Some(memory) => nme_scores(model, x, stage.num_cumulative(), memory),
        }
    }

    fn persist(&self, folder: &str, report: &EvalReport) -> Result<()> {
        let Some(root) = &self.output_dir else {
            return Ok(());
        };
        let dir = root.join(folder);
        std::fs::create_dir_all(&dir)?;
        write_report(&dir.join("eval.json"), report)
    }
}

impl Evaluator for StageEvaluator {
    fn evaluate(
        &self,
        model: &dyn Classifier,
        stage: &Stage,
        stage_folder: Option<&str>,
        memory: Option<&dyn RehearsalMemory>,
    ) -> Result<EvalReport> {
        if stage.test.is_empty() {
            return Err(Error::Data(format!("stage {} has no test examples", stage.group_idx)));
        }
        let num_classes = stage.num_cumulative();
        let (x, y) = stage.test.to_matrix();
        let scores = self.scores(model, &x, stage, memory)?;
        let preds = argmax_rows(&scores);
        let confusion = ConfusionMatrix::from_predictions(&preds, &y, num_classes);

        let top1_acc = confusion.mean_class_accuracy(0..num_classes).unwrap_or(0.0);
        let old_acc = if stage.is_first_stage() {
            None
        } else {
            Some(confusion.mean_class_accuracy(0..stage.num_old()).unwrap_or(0.0))
        };
        let new_acc = confusion.mean_class_accuracy(stage.num_old()..num_classes).unwrap_or(0.0);

        let report = EvalReport {
            top1_acc,
            top5_acc: top_k_accuracy(&scores, &y, 5),
            harmonic_mean: harmonic_mean(old_acc, new_acc),
            old_acc,
            new_acc,
            per_class_acc: confusion.per_class_accuracy(),
            nme: memory.is_some(),
        };
        info!(
            group = stage.group_idx,
            folder = stage_folder.unwrap_or("-"),
            "Test Acc {:.2}, Top-5 Acc {:.2}, Harmonic Mean {:.2}",
            report.top1_acc,
            report.top5_acc,
            report.harmonic_mean
        );
        if let Some(folder) = stage_folder {
            self.persist(folder, &report)?;
        }
        Ok(report)
    }
}

/// Negative distances to the L2-normalized exemplar mean of every class
fn nme_scores(
    model: &dyn Classifier,
    x: &Array2<f32>,
    num_classes: usize,
    memory: &dyn RehearsalMemory,
) -> Result<Array2<f32>> {
    let features = l2_normalize_rows(model.embed(x));
    let mut means = Array2::<f32>::zeros((num_classes, features.ncols()));
    for (class, mut mean) in means.axis_iter_mut(Axis(0)).enumerate() {
        let exemplars = memory
            .exemplars_of(class)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::Data(format!("no exemplars stored for class {class}")))?;
        let (ex, _) = exemplars.to_matrix();
        let embedded = l2_normalize_rows(model.embed(&ex));
        if let Some(m) = embedded.mean_axis(Axis(0)) {
            mean.assign(&m);
        }
    }
    let means = l2_normalize_rows(means);

    let mut scores = Array2::zeros((x.nrows(), num_classes));
    for (i, f) in features.axis_iter(Axis(0)).enumerate() {
        for (c, m) in means.axis_iter(Axis(0)).enumerate() {
            let d = &f - &m;
            scores[[i, c]] = -d.dot(&d);
        }
    }
    Ok(scores)
}

/// Write a report as pretty JSON
pub fn write_report(path: &Path, report: &EvalReport) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Read a report written by [`write_report`]
pub fn read_report(path: &Path) -> Result<EvalReport> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
