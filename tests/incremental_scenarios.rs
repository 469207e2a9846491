//! End-to-end scenarios of class-incremental runs
//!
//! Covers the observable contracts of a run: effective sample counts,
//! class weights, distillation gating, checkpoint reuse and persistence.

use approx::assert_relative_eq;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use recordar::config::{
    BiasRect, DataSource, IncrementalSpec, MemoryType, OptimizerKind, RegType,
};
use recordar::data::{Batch, Dataset, Example, Pipeline, Stage, SyntheticBlobs};
use recordar::eval::{Evaluator, StageEvaluator};
use recordar::model::{load_weights, save_weights, Classifier, MlpClassifier};
use recordar::optim::{Adam, SGD};
use recordar::rehearsal::{RehearsalMixer, SampleCount};
use recordar::runner::{build_model, build_task, IncrementalRunner};
use recordar::telemetry::MemorySink;
use recordar::train::{compute_class_weights, ClassWeights, Distillation, LossSettings, StageTrainer};
use recordar::ExecutionMode;
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

/// `per_class[c]` examples of class `c` with a distinct 2-d input each
fn dataset(per_class: &[(usize, usize)]) -> Dataset {
    let mut examples = Vec::new();
    for &(class, count) in per_class {
        for i in 0..count {
            examples.push(Example::new(Array1::from(vec![class as f32, i as f32]), class));
        }
    }
    Dataset::new(examples, vec![2]).unwrap()
}

fn stage(group_idx: usize, old: usize, cur: usize, train: Dataset) -> Stage {
    Stage {
        group_idx,
        nb_groups: group_idx + 2,
        old_classes: (0..old).collect(),
        cur_classes: (old..old + cur).collect(),
        test: train.clone(),
        train,
    }
}

fn linear_model(classes: usize) -> MlpClassifier {
    MlpClassifier::new(2, 0, classes, 0.0, &mut StdRng::seed_from_u64(0))
}

fn blob_spec(root: &Path) -> IncrementalSpec {
    let mut spec = IncrementalSpec::default();
    spec.output.root = root.to_path_buf();
    spec.data.source = DataSource::Synthetic {
        num_classes: 6,
        train_per_class: 24,
        test_per_class: 8,
        feature_dim: 4,
        spread: 0.3,
    };
    spec.data.base_classes = 2;
    spec.data.increment = 2;
    spec.data.batch_size = 16;
    spec.optimizer.name = OptimizerKind::Sgd;
    spec.optimizer.base_lr = 0.05;
    spec.training.epochs = 2;
    spec.training.lr_milestones = vec![];
    spec.training.no_skip_base_training = true;
    spec
}

// =============================================================================
// Rehearsal mixing
// =============================================================================

#[test]
fn test_without_memory_sample_count_is_stage_cardinality() {
    let dir = TempDir::new().unwrap();
    let spec = blob_spec(dir.path());
    let task = build_task(&spec).unwrap();
    let input_dim = task.stage(0).unwrap().train.feature_dim();
    let mut runner = IncrementalRunner::new(spec.clone(), build_model(&spec, input_dim)).unwrap();

    let outcome = runner.run_all(&task).unwrap();
    for (i, stage) in outcome.stages.iter().enumerate() {
        assert_eq!(stage.sample_count, task.stage(i).unwrap().train.len());
    }
}

#[test]
fn test_holdout_skips_ten_per_cumulative_class() {
    // 3 old classes with 100 exemplars each, 2 new classes with 100 examples each
    let memory = dataset(&[(0, 100), (1, 100), (2, 100)]);
    let train = dataset(&[(3, 100), (4, 100)]);
    let stage = stage(1, 3, 2, train);
    let mixer = RehearsalMixer::new(BiasRect::Bic, 0.1);

    let mixed = mixer
        .mix(&stage, Some(&memory), &linear_model(5), &mut StdRng::seed_from_u64(0))
        .unwrap();

    let holdout = mixed.holdout.expect("bic keeps a holdout");
    assert_eq!(holdout.skipped_per_class, 10);
    assert_eq!(holdout.dataset.len(), 10 * 5);
    assert_eq!(mixed.sample_count.value(), 500 - 10 * 5);
    assert_eq!(mixed.dataset.len(), 500 - 10 * 5);
}

#[test]
fn test_undersampling_targets_old_class_size() {
    // Stage 2: 10 old classes with 50 exemplars each, 5 new classes
    let old: Vec<(usize, usize)> = (0..10).map(|c| (c, 50)).collect();
    let new: Vec<(usize, usize)> = (10..15).map(|c| (c, 120)).collect();
    let stage = stage(2, 10, 5, dataset(&new));
    let mixer = RehearsalMixer::new(BiasRect::Undersampling, 0.1);

    let mixed = mixer
        .mix(&stage, Some(&dataset(&old)), &linear_model(15), &mut StdRng::seed_from_u64(0))
        .unwrap();

    assert!(matches!(mixed.sample_count, SampleCount::EqualizedToOld { .. }));
    assert_eq!(mixed.sample_count.value(), 750);
    assert_eq!(mixed.dataset.len(), 1100);
}

// =============================================================================
// Class weights and loss composition
// =============================================================================

#[test]
fn test_reweighting_is_inverse_frequency() {
    let mut labels = vec![0; 900];
    labels.extend(vec![1; 100]);
    let weights = compute_class_weights(BiasRect::Reweighting, &labels, 2);
    assert_relative_eq!(weights.get(1) / weights.get(0), 9.0, epsilon = 1e-4);

    let uniform = compute_class_weights(BiasRect::Bic, &labels, 2);
    assert_eq!(uniform.as_slice(), &[1.0, 1.0]);
}

#[test]
fn test_distillation_absent_at_first_stage() {
    let train = dataset(&[(0, 8), (1, 8)]);
    let first = stage(0, 0, 2, train.clone());
    let settings = LossSettings {
        multi_label: false,
        distillation: Some(Distillation { temperature: 2.0, weight: 5.0 }),
        adjust_weights: true,
    };
    let mut trainer = StageTrainer::new(Box::new(SGD::new(0.01, 0.9)), settings);
    let mut model = linear_model(2);
    let (x, y) = train.to_matrix();

    let losses = trainer
        .train_step(&mut model, None, &first, &Batch::new(x, y), &ClassWeights::uniform(2))
        .unwrap();
    assert_eq!(losses.lwf, 0.0);
    assert_relative_eq!(losses.total, losses.ce + losses.reg, epsilon = 1e-5);
}

#[test]
fn test_three_epoch_first_stage_evaluates_every_epoch() {
    let (train, test) = SyntheticBlobs {
        num_classes: 10,
        train_per_class: 20,
        test_per_class: 5,
        feature_dim: 6,
        spread: 0.3,
    }
    .generate(11, None)
    .unwrap();
    let first = Stage {
        group_idx: 0,
        nb_groups: 1,
        old_classes: vec![],
        cur_classes: (0..10).collect(),
        train: train.clone(),
        test,
    };
    let mut model = MlpClassifier::new(6, 0, 10, 0.0, &mut StdRng::seed_from_u64(1));
    let pipeline = Pipeline::from_dataset(train).cache().shuffle(200).batch(32);
    let settings = LossSettings { multi_label: false, distillation: None, adjust_weights: false };
    let mut trainer = StageTrainer::new(Box::new(Adam::default_params(0.01)), settings);

    let result = trainer
        .train(
            &mut model,
            None,
            &first,
            &pipeline,
            &ClassWeights::uniform(10),
            &[0.01, 0.01, 0.001],
            &mut StdRng::seed_from_u64(2),
        )
        .unwrap();

    let epochs: Vec<usize> = result.evaluations.iter().map(|e| e.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3]);
    assert_eq!(result.steps, 3 * pipeline.num_batches());
    // accumulators hold only the last epoch
    assert_eq!(trainer.state().metrics.train_loss.count(), pipeline.num_batches() as u64);
}

// =============================================================================
// Checkpoints
// =============================================================================

#[test]
fn test_existing_first_stage_checkpoint_skips_training() {
    let dir = TempDir::new().unwrap();
    let spec = blob_spec(dir.path());
    let task = build_task(&spec).unwrap();
    let first = task.stage(0).unwrap();
    let input_dim = first.train.feature_dim();

    let mut trained = MlpClassifier::new(
        input_dim,
        spec.model.hidden,
        2,
        spec.model.weight_decay,
        &mut StdRng::seed_from_u64(99),
    );
    trained.rescale_head(0..2, 3.0, 0.5);
    let checkpoint = spec.run_dir().join("group_1/checkpoints/1st_stage");
    save_weights(&trained, &checkpoint, HashMap::new()).unwrap();

    let mut runner = IncrementalRunner::new(spec.clone(), build_model(&spec, input_dim)).unwrap();
    let outcome = runner.run_stage(&first).unwrap();

    assert_eq!(outcome.mode, ExecutionMode::Reuse { checkpoint });
    assert!(outcome.train.is_none());
    assert!(!spec.run_dir().join("group_1/loss.json").exists());
    let (x, _) = first.test.to_matrix();
    assert_eq!(runner.model().forward(&x), trained.forward(&x));
}

fn episodic_bic(spec: &mut IncrementalSpec) {
    spec.memory.memory_type = MemoryType::Episodic;
    spec.memory.budget = 24;
    spec.rectification.bias_rect = BiasRect::Bic;
    spec.rectification.val_exemplars_ratio = 0.25;
}

fn adjusted_distillation(spec: &mut IncrementalSpec) {
    spec.distillation.reg_type = RegType::Lwf;
    spec.distillation.adjust_lwf_w = true;
}

fn multi_label(spec: &mut IncrementalSpec) {
    spec.model.sigmoid = true;
    spec.distillation.reg_type = RegType::Lwf;
}

#[test]
fn test_rerun_reuses_checkpoints_for_every_configuration() {
    let variants: [(&str, fn(&mut IncrementalSpec)); 3] = [
        ("episodic_bic", episodic_bic),
        ("adjusted_distillation", adjusted_distillation),
        ("multi_label", multi_label),
    ];
    for (name, configure) in variants {
        let dir = TempDir::new().unwrap();
        let mut spec = blob_spec(dir.path());
        configure(&mut spec);
        let task = build_task(&spec).unwrap();
        let input_dim = task.stage(0).unwrap().train.feature_dim();

        let first = IncrementalRunner::new(spec.clone(), build_model(&spec, input_dim))
            .unwrap()
            .run_all(&task)
            .unwrap();
        assert!(first.stages.iter().all(|s| s.train.is_some()), "{name}: first run trains");

        let mut rerun = IncrementalRunner::new(spec.clone(), build_model(&spec, input_dim)).unwrap();
        let second = rerun.run_all(&task).unwrap();

        for (a, b) in first.stages.iter().zip(&second.stages) {
            assert!(matches!(b.mode, ExecutionMode::Reuse { .. }), "{name}: stage {}", b.group_idx);
            assert!(b.train.is_none(), "{name}: stage {} trained again", b.group_idx);
            assert!(!b.rectified, "{name}: stage {} rectified again", b.group_idx);
            // evaluated right after loading 1st_stage
            assert_eq!(a.before, b.before, "{name}: stage {}", b.group_idx);
        }

        let last = task.stage(task.nb_groups() - 1).unwrap();
        let mut restored = MlpClassifier::new(
            input_dim,
            spec.model.hidden,
            last.num_cumulative(),
            spec.model.weight_decay,
            &mut StdRng::seed_from_u64(7),
        );
        let checkpoint = spec.run_dir().join(last.folder_name()).join("checkpoints/2nd_stage");
        load_weights(&mut restored, &checkpoint).unwrap();
        let (x, _) = last.test.to_matrix();
        assert_eq!(rerun.model().forward(&x), restored.forward(&x), "{name}: final weights");
    }
}

#[test]
fn test_save_load_reproduces_evaluation() {
    let dir = TempDir::new().unwrap();
    let (train, test) = SyntheticBlobs {
        num_classes: 4,
        train_per_class: 10,
        test_per_class: 10,
        feature_dim: 3,
        spread: 0.5,
    }
    .generate(5, None)
    .unwrap();
    let stage = Stage {
        group_idx: 1,
        nb_groups: 2,
        old_classes: vec![0, 1],
        cur_classes: vec![2, 3],
        train,
        test,
    };
    let model = MlpClassifier::new(3, 8, 4, 1e-4, &mut StdRng::seed_from_u64(3));
    let evaluator = StageEvaluator::new(false);
    let before = evaluator.evaluate(&model, &stage, None, None).unwrap();

    save_weights(&model, dir.path(), HashMap::new()).unwrap();
    let mut restored = MlpClassifier::new(3, 8, 4, 1e-4, &mut StdRng::seed_from_u64(4));
    load_weights(&mut restored, dir.path()).unwrap();
    let after = evaluator.evaluate(&restored, &stage, None, None).unwrap();

    assert_eq!(before, after);
}

// =============================================================================
// Full runs
// =============================================================================

#[test]
fn test_rehearsal_run_with_bias_correction_and_distillation() {
    let dir = TempDir::new().unwrap();
    let mut spec = blob_spec(dir.path());
    spec.memory.memory_type = MemoryType::Episodic;
    spec.memory.budget = 36;
    spec.rectification.bias_rect = BiasRect::Bic;
    spec.rectification.val_exemplars_ratio = 0.25;
    spec.distillation.reg_type = RegType::Lwf;
    spec.distillation.adjust_lwf_w = true;
    spec.evaluation.embedding = true;

    let task = build_task(&spec).unwrap();
    let input_dim = task.stage(0).unwrap().train.feature_dim();
    let sink = MemorySink::new();
    let mut runner = IncrementalRunner::new(spec.clone(), build_model(&spec, input_dim))
        .unwrap()
        .with_sink(Box::new(sink.clone()));

    let outcome = runner.run_all(&task).unwrap();

    assert_eq!(outcome.stages.len(), 3);
    // stage 1: 48 new examples plus 36 exemplars, 4 held out of each of 4 classes
    assert_eq!(outcome.stages[1].sample_count, 48 + 36 - 4 * 4);
    for stage in &outcome.stages {
        assert!(stage.rectified);
        assert!(stage.after.nme);
        assert!((0.0..=100.0).contains(&stage.after.top1_acc));
        assert!(stage.after.top5_acc >= stage.after.top1_acc - 1e-3);
    }
    assert!(outcome.stages[2].after.old_acc.is_some());
    assert!(sink.last("final_harmonic_mean").is_some());
    assert!(spec.run_dir().join("stats.json").is_file());
}
