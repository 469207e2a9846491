//! Stage orchestration
//!
//! Every stage of a class-incremental run goes through the same sequence:
//!
//! 1. Probe the checkpoint gate (reuse, bootstrap from a base run, or train)
//! 2. Mix rehearsal exemplars into the new-class data
//! 3. Compute class weights
//! 4. Build the input pipeline (cache, shuffle, augment, batch, prefetch)
//! 5. Train, persisting the loss curve
//! 6. Save the `1st_stage` checkpoint
//! 7. Evaluate before rectification
//! 8. Compute the weight-aligning calibration at the final stage
//! 9. Probe the rectification gate
//! 10. Rectify and save the `2nd_stage` checkpoint
//! 11. Update the rehearsal memory
//! 12. Evaluate after rectification
//! 13. Record and persist the stage statistics
//!
//! Stages run strictly in order: stage `i + 1` starts from the model, memory
//! and stats left by stage `i`.

use crate::config::{BiasRect, DataSource, IncrementalSpec, MemoryType};
use crate::data::{
    load_json_dataset, ClassIncrementalTask, Compose, Dataset, Pipeline, Stage, SyntheticBlobs,
};
use crate::error::{Error, Result};
use crate::eval::{EvalReport, Evaluator, StageEvaluator};
use crate::gate::{ExecutionMode, StageCheckpointGate, FIRST_STAGE, SECOND_STAGE};
use crate::model::{folder_size, load_weights, save_weights, Classifier, MlpClassifier};
use crate::optim::{build_optimizer, stage_learning_rates};
use crate::rectify::{norm_ratio, rectifier_for, BiasRectifier, RectifyContext};
use crate::rehearsal::{EpisodicMemory, MixedDataset, RehearsalMemory, RehearsalMixer};
use crate::stats::StatsTracker;
use crate::telemetry::{MetricSink, TracingSink};
use crate::train::{compute_class_weights, ClassWeights, LossSettings, StageTrainResult, StageTrainer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// What happened during one stage
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub group_idx: usize,
    pub mode: ExecutionMode,
    /// Effective sample count used as the shuffle buffer
    pub sample_count: usize,
    /// `None` when the optimization loop was skipped
    pub train: Option<StageTrainResult>,
    pub before: EvalReport,
    pub after: EvalReport,
    /// Whether rectification ran (false when `2nd_stage` was reused)
    pub rectified: bool,
}

/// Outcome of every stage of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_dir: PathBuf,
    pub stages: Vec<StageOutcome>,
}

impl RunOutcome {
    /// Accuracy after rectification at the last executed stage
    pub fn final_report(&self) -> Option<&EvalReport> {
        self.stages.last().map(|s| &s.after)
    }
}

/// Runs the stages of a class-incremental task in order
pub struct IncrementalRunner {
    spec: IncrementalSpec,
    model: Box<dyn Classifier>,
    memory: Option<Box<dyn RehearsalMemory>>,
    mixer: Option<RehearsalMixer>,
    rectifier: Box<dyn BiasRectifier>,
    evaluator: Box<dyn Evaluator>,
    sink: Box<dyn MetricSink>,
    stats: StatsTracker,
    calibration: Option<f32>,
    rng: StdRng,
}

impl IncrementalRunner {
    /// Runner for `spec` starting from `model`
    ///
    /// Statistics already stored in the run folder are resumed.
    pub fn new(spec: IncrementalSpec, model: Box<dyn Classifier>) -> Result<Self> {
        let run_dir = spec.run_dir();
        let episodic = spec.memory.memory_type == MemoryType::Episodic;
        let memory: Option<Box<dyn RehearsalMemory>> = episodic.then(|| {
            Box::new(EpisodicMemory::new(
                spec.memory.budget,
                spec.memory.selection,
                spec.training.seed,
            )) as Box<dyn RehearsalMemory>
        });
        let mixer = episodic.then(|| {
            RehearsalMixer::new(spec.rectification.bias_rect, spec.rectification.val_exemplars_ratio)
        });
        Ok(Self {
            rectifier: rectifier_for(&spec),
            evaluator: Box::new(StageEvaluator::new(spec.model.sigmoid).with_output_dir(&run_dir)),
            sink: Box::new(TracingSink),
            stats: StatsTracker::open(run_dir.join("stats.json"))?,
            calibration: None,
            rng: StdRng::seed_from_u64(spec.training.seed),
            memory,
            mixer,
            model,
            spec,
        })
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn MetricSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn spec(&self) -> &IncrementalSpec {
        &self.spec
    }

    pub fn model(&self) -> &dyn Classifier {
        &*self.model
    }

    pub fn memory(&self) -> Option<&dyn RehearsalMemory> {
        self.memory.as_deref()
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    /// Calibration factor stored at the final stage for weight aligning
    pub fn calibration(&self) -> Option<f32> {
        self.calibration
    }

    /// Run every stage of `task`
    ///
    /// A base-model run stops after the first stage.
    pub fn run_all(&mut self, task: &ClassIncrementalTask) -> Result<RunOutcome> {
        let nb_stages = if self.spec.training.base_model { 1 } else { task.nb_groups() };
        let mut stages = Vec::with_capacity(nb_stages);
        for stage in task.stages().take(nb_stages) {
            stages.push(self.run_stage(&stage?)?);
        }
        Ok(RunOutcome { run_dir: self.spec.run_dir(), stages })
    }

    /// Run one stage, which must follow the previously run one
    pub fn run_stage(&mut self, stage: &Stage) -> Result<StageOutcome> {
        let start = Instant::now();
        let is_final = stage.is_final_stage();
        let bias_rect = self.spec.rectification.bias_rect;
        let group_dir = self.spec.run_dir().join(stage.folder_name());
        let gate = StageCheckpointGate::for_stage(&self.spec, stage);
        info!(
            group = stage.group_idx + 1,
            nb_groups = stage.nb_groups,
            old = stage.num_old(),
            new = stage.num_cur(),
            "Starting incremental group {}/{}",
            stage.group_idx + 1,
            stage.nb_groups
        );

        let old_model = (!stage.is_first_stage()).then(|| self.model.box_clone());
        self.prepare_model(stage)?;
        let mode = gate.resolve()?;

        let previous = self.memory.as_ref().and_then(|m| m.load_prev());
        let mixed = match &self.mixer {
            Some(mixer) => mixer.mix(stage, previous.as_ref(), &*self.model, &mut self.rng)?,
            None => MixedDataset::unmixed(stage.train.clone()),
        };
        let sample_count = mixed.sample_count.value();
        let weights =
            compute_class_weights(bias_rect, &mixed.dataset.labels(), stage.num_cumulative());
        let pipeline = self.pipeline(mixed.dataset.clone(), sample_count);
        info!(sample_count, batches = pipeline.num_batches(), "Training set ready");

        let train = match &mode {
            ExecutionMode::Reuse { checkpoint } => {
                load_weights(&mut *self.model, checkpoint)?;
                None
            }
            ExecutionMode::Bootstrap { checkpoint, stats } => {
                load_weights(&mut *self.model, checkpoint)?;
                self.stats.load(stats)?;
                None
            }
            ExecutionMode::Train => Some(self.train(
                stage,
                old_model.as_deref(),
                &pipeline,
                &weights,
                &group_dir,
            )?),
        };
        if !matches!(mode, ExecutionMode::Reuse { .. }) {
            save_weights(&*self.model, &gate.first_stage_dir(), self.metadata(stage, FIRST_STAGE))?;
        }

        let folder = |sub: &str| format!("{}/{sub}", stage.folder_name());
        let before =
            self.evaluator.evaluate(&*self.model, stage, Some(&folder(FIRST_STAGE)), None)?;
        self.report(&before, "_before", is_final);

        if is_final && bias_rect == BiasRect::WeightAligningNoBias {
            self.calibration = norm_ratio(&*self.model, stage);
            info!(calibration = ?self.calibration, "Weight aligning calibration");
        }

        let rectified = match gate.resolve_rectification() {
            ExecutionMode::Reuse { checkpoint } => {
                load_weights(&mut *self.model, &checkpoint)?;
                false
            }
            _ => {
                let ctx = RectifyContext {
                    stage,
                    old_model: old_model.as_deref(),
                    rehearsal: previous.as_ref(),
                    holdout: mixed.holdout.as_ref().map(|h| &h.dataset),
                    calibration: self.calibration,
                    multi_label: self.spec.model.sigmoid,
                };
                info!(rectifier = self.rectifier.name(), "Rectifying bias");
                self.rectifier.rectify(&ctx, &mut *self.model)?;
                save_weights(
                    &*self.model,
                    &gate.second_stage_dir(),
                    self.metadata(stage, SECOND_STAGE),
                )?;
                true
            }
        };

        if let Some(memory) = self.memory.as_mut() {
            memory.save(&*self.model, stage)?;
        }

        let nme = if self.spec.evaluation.embedding { self.memory.as_deref() } else { None };
        let after = self.evaluator.evaluate(&*self.model, stage, Some(&folder(SECOND_STAGE)), nme)?;
        self.report(&after, "", is_final);

        self.record_stats(stage, start, &gate)?;

        Ok(StageOutcome {
            group_idx: stage.group_idx,
            mode,
            sample_count,
            train,
            before,
            after,
            rectified,
        })
    }

    /// Grow the head to the stage's cumulative classes
    fn prepare_model(&mut self, stage: &Stage) -> Result<()> {
        let feature_dim = stage.train.feature_dim();
        if self.model.input_dim() != feature_dim {
            return Err(Error::Data(format!(
                "model expects {} features, stage {} provides {feature_dim}",
                self.model.input_dim(),
                stage.group_idx
            )));
        }
        let current = self.model.num_classes();
        let target = stage.num_cumulative();
        if current > target {
            return Err(Error::ConfigError(format!(
                "model already has {current} classes, stage {} needs {target}",
                stage.group_idx
            )));
        }
        self.model.grow_classes(target - current, &mut self.rng);
        Ok(())
    }

    fn pipeline(&self, dataset: Dataset, sample_count: usize) -> Pipeline {
        let data = &self.spec.data;
        let mut pipeline = Pipeline::from_dataset(dataset).cache().shuffle(sample_count.max(1));
        if !data.no_aug {
            let augment = Compose::from_spec(&data.augment);
            if !augment.is_empty() {
                pipeline = pipeline.map(Arc::new(augment));
            }
        }
        pipeline.batch(data.batch_size).prefetch(data.prefetch)
    }

    fn train(
        &mut self,
        stage: &Stage,
        old_model: Option<&dyn Classifier>,
        pipeline: &Pipeline,
        weights: &ClassWeights,
        group_dir: &Path,
    ) -> Result<StageTrainResult> {
        let lrs = stage_learning_rates(
            &self.spec.training,
            &self.spec.optimizer,
            stage.is_first_stage(),
        );
        let optimizer = build_optimizer(&self.spec.optimizer);
        let mut trainer = StageTrainer::new(optimizer, LossSettings::from_spec(&self.spec));
        let result = trainer.train(
            &mut *self.model,
            old_model,
            stage,
            pipeline,
            weights,
            &lrs,
            &mut self.rng,
        )?;
        trainer.curve_mut().vis(&group_dir.join("loss.json"))?;
        info!(
            epochs = result.epochs,
            steps = result.steps,
            loss = result.final_loss,
            "Training finished in {:.1}s",
            result.elapsed_secs
        );
        Ok(result)
    }

    fn metadata(&self, stage: &Stage, sub_stage: &str) -> HashMap<String, String> {
        HashMap::from([
            ("group".to_string(), stage.group_idx.to_string()),
            ("stage".to_string(), sub_stage.to_string()),
            ("params".to_string(), self.spec.params_str()),
        ])
    }

    fn report(&mut self, report: &EvalReport, suffix: &str, is_final: bool) {
        self.sink.log(&format!("top1_acc{suffix}"), f64::from(report.top1_acc), is_final);
        self.sink.log(&format!("top5_acc{suffix}"), f64::from(report.top5_acc), is_final);
        self.sink.log(&format!("harmonic_mean{suffix}"), f64::from(report.harmonic_mean), is_final);
    }

    fn record_stats(
        &mut self,
        stage: &Stage,
        start: Instant,
        gate: &StageCheckpointGate,
    ) -> Result<()> {
        let idx = stage.group_idx;
        let memory_size = self.memory.as_ref().map_or(0, |m| m.size());
        self.stats.put("time", idx, start.elapsed().as_secs_f64());
        self.stats.put("rehearsal_memory_size", idx, memory_size as f64);
        self.stats.put("model_size", idx, folder_size(&gate.second_stage_dir())? as f64);
        self.stats.put("internal_memory", idx, resident_memory_bytes() as f64);
        self.stats.save()
    }
}

/// Resident set size of this process in bytes (0 where unavailable)
pub fn resident_memory_bytes() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map_or(0, |kb| kb * 1024)
}

/// Load the configured datasets and split them into incremental stages
pub fn build_task(spec: &IncrementalSpec) -> Result<ClassIncrementalTask> {
    let data = &spec.data;
    let (train, test) = match &data.source {
        DataSource::Synthetic { num_classes, train_per_class, test_per_class, feature_dim, spread } => {
            SyntheticBlobs {
                num_classes: *num_classes,
                train_per_class: *train_per_class,
                test_per_class: *test_per_class,
                feature_dim: *feature_dim,
                spread: *spread,
            }
            .generate(spec.training.seed, data.feature_shape.as_deref())?
        }
        DataSource::Json { train, test } => (
            load_json_dataset(train, data.feature_shape.as_deref())?,
            load_json_dataset(test, data.feature_shape.as_deref())?,
        ),
    };
    ClassIncrementalTask::new(
        train,
        test,
        data.base_classes,
        data.increment,
        data.shuffle_classes.then_some(spec.training.seed),
    )
}

/// Reference classifier over `input_dim` features with no output classes yet
pub fn build_model(spec: &IncrementalSpec, input_dim: usize) -> Box<dyn Classifier> {
    let mut rng = StdRng::seed_from_u64(spec.training.seed);
    Box::new(MlpClassifier::new(
        input_dim,
        spec.model.hidden,
        0,
        spec.model.weight_decay,
        &mut rng,
    ))
}
