//! Merge replayed exemplars into the new-class data of a stage

use crate::config::BiasRect;
use crate::data::{Dataset, Stage};
use crate::error::{Error, Result};
use crate::model::Classifier;
use crate::resample::resampler_for;
use rand::rngs::StdRng;
use std::time::Instant;
use tracing::{debug, info};

/// Effective number of training samples, used as the shuffle buffer size
///
/// Each variant records how it was derived, so the holdout and
/// undersampling formulas stay distinguishable from the plain count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleCount {
    /// Cardinality of the (possibly resampled) training set
    Cardinality(usize),
    /// Cardinality before the holdout split minus `skipped_per_class * num_cumulative`
    HoldoutAdjusted { cardinality: usize, skipped_per_class: usize, num_cumulative: usize },
    /// `old_per_class * num_cumulative`, the size of a set balanced to the old classes
    EqualizedToOld { old_per_class: f32, num_cumulative: usize },
}

impl SampleCount {
    pub fn value(&self) -> usize {
        match *self {
            SampleCount::Cardinality(n) => n,
            SampleCount::HoldoutAdjusted { cardinality, skipped_per_class, num_cumulative } => {
                cardinality.saturating_sub(skipped_per_class * num_cumulative)
            }
            SampleCount::EqualizedToOld { old_per_class, num_cumulative } => {
                (old_per_class * num_cumulative as f32) as usize
            }
        }
    }
}

/// Average number of samples per class on each side of the mix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixCounts {
    pub old_per_class: f32,
    pub new_per_class: f32,
}

/// Examples withheld from training for the bias-correction fit
#[derive(Debug, Clone)]
pub struct Holdout {
    pub dataset: Dataset,
    pub skipped_per_class: usize,
}

/// Training set of one stage, ready for the input pipeline
#[derive(Debug, Clone)]
pub struct MixedDataset {
    pub dataset: Dataset,
    pub sample_count: SampleCount,
    /// `None` when no rehearsal data took part
    pub counts: Option<MixCounts>,
    /// `Some` only for the holdout strategy
    pub holdout: Option<Holdout>,
}

impl MixedDataset {
    /// New-class data used as is
    pub fn unmixed(dataset: Dataset) -> Self {
        let n = dataset.len();
        Self { dataset, sample_count: SampleCount::Cardinality(n), counts: None, holdout: None }
    }
}

/// Combines stage data with rehearsal exemplars and applies the
/// data-level part of a bias rectification strategy
#[derive(Debug, Clone, Copy)]
pub struct RehearsalMixer {
    strategy: BiasRect,
    holdout_ratio: f32,
}

impl RehearsalMixer {
    pub fn new(strategy: BiasRect, holdout_ratio: f32) -> Self {
        Self { strategy, holdout_ratio }
    }

    pub fn strategy(&self) -> BiasRect {
        self.strategy
    }

    /// Build the training set of `stage`
    ///
    /// Without exemplars (first stage, memory disabled or empty) the new-class
    /// data passes through untouched. Otherwise the exemplars are appended
    /// after the new data and the strategy is applied to the merged set.
    pub fn mix(
        &self,
        stage: &Stage,
        memory: Option<&Dataset>,
        model: &dyn Classifier,
        rng: &mut StdRng,
    ) -> Result<MixedDataset> {
        let rehearsal = match memory {
            Some(m) if !stage.is_first_stage() && !m.is_empty() => m,
            _ => return Ok(MixedDataset::unmixed(stage.train.clone())),
        };
        if stage.num_old() == 0 || stage.num_cur() == 0 {
            return Err(Error::Data(format!(
                "stage {} has {} old and {} new classes, cannot mix exemplars",
                stage.group_idx,
                stage.num_old(),
                stage.num_cur()
            )));
        }

        let num_cumulative = stage.num_cumulative();
        let mut merged = stage.train.concatenate(rehearsal)?;
        if let Some(bad) = merged.iter().find(|e| e.label >= num_cumulative) {
            return Err(Error::Data(format!(
                "label {} outside the {num_cumulative} cumulative classes of stage {}",
                bad.label, stage.group_idx
            )));
        }

        let counts = MixCounts {
            old_per_class: rehearsal.len() as f32 / stage.num_old() as f32,
            new_per_class: stage.train.len() as f32 / stage.num_cur() as f32,
        };
        debug!(
            group = stage.group_idx,
            old_per_class = counts.old_per_class,
            new_per_class = counts.new_per_class,
            "Mixed rehearsal exemplars"
        );

        if let Some(resampler) = resampler_for(self.strategy, model) {
            let start = Instant::now();
            let (x, y) = merged.to_matrix();
            let (xr, yr) = resampler.fit_resample(&x, &y, rng)?;
            merged = Dataset::from_matrix(&xr, &yr, merged.feature_shape().to_vec())?;
            info!(
                strategy = resampler.name(),
                before = y.len(),
                after = yr.len(),
                "Time for {}: {:.2}s",
                resampler.name(),
                start.elapsed().as_secs_f32()
            );
        }

        let mixed = match self.strategy {
            BiasRect::Bic => {
                let skipped_per_class = (self.holdout_ratio * counts.old_per_class).floor() as usize;
                let (train, held) = split_per_class(&merged, num_cumulative, skipped_per_class);
                MixedDataset {
                    sample_count: SampleCount::HoldoutAdjusted {
                        cardinality: merged.len(),
                        skipped_per_class,
                        num_cumulative,
                    },
                    dataset: train,
                    counts: Some(counts),
                    holdout: Some(Holdout { dataset: held, skipped_per_class }),
                }
            }
            BiasRect::Undersampling => MixedDataset {
                sample_count: SampleCount::EqualizedToOld {
                    old_per_class: counts.old_per_class,
                    num_cumulative,
                },
                dataset: merged,
                counts: Some(counts),
                holdout: None,
            },
            _ => MixedDataset {
                sample_count: SampleCount::Cardinality(merged.len()),
                dataset: merged,
                counts: Some(counts),
                holdout: None,
            },
        };
        Ok(mixed)
    }
}

/// Split off the first `n` examples of every class
///
/// Returns `(rest, held)`; both keep class-major order.
fn split_per_class(data: &Dataset, num_classes: usize, n: usize) -> (Dataset, Dataset) {
    let mut rest = Vec::with_capacity(data.len());
    let mut held = Vec::new();
    for class in 0..num_classes {
        let positions = (0..data.len()).filter(|&i| data.get(i).label == class);
        for (k, i) in positions.enumerate() {
            if k < n {
                held.push(i);
            } else {
                rest.push(i);
            }
        }
    }
    (data.select(&rest).cache(), data.select(&held).cache())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Example;
    use crate::model::MlpClassifier;
    use ndarray::array;
    use rand::SeedableRng;

    fn dataset(per_class: &[(usize, usize)]) -> Dataset {
        let mut examples = Vec::new();
        for &(label, n) in per_class {
            for i in 0..n {
                examples.push(Example::new(array![label as f32, i as f32 * 0.01], label));
            }
        }
        Dataset::new(examples, vec![2]).unwrap()
    }

    /// Stage with `num_old` old classes of `old_n` exemplars and `num_new` new
    /// classes of `new_n` examples
    fn stage(num_old: usize, old_n: usize, num_new: usize, new_n: usize) -> (Stage, Dataset) {
        let new: Vec<(usize, usize)> = (num_old..num_old + num_new).map(|c| (c, new_n)).collect();
        let old: Vec<(usize, usize)> = (0..num_old).map(|c| (c, old_n)).collect();
        let stage = Stage {
            group_idx: 2,
            nb_groups: 3,
            old_classes: (0..num_old).collect(),
            cur_classes: (num_old..num_old + num_new).collect(),
            train: dataset(&new),
            test: dataset(&[]),
        };
        (stage, dataset(&old))
    }

    fn model(classes: usize) -> MlpClassifier {
        MlpClassifier::new(2, 0, classes, 0.0, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn test_without_memory_count_is_cardinality() {
        let (stage, _) = stage(10, 20, 5, 30);
        let mixer = RehearsalMixer::new(BiasRect::Undersampling, 0.1);
        let mixed = mixer.mix(&stage, None, &model(15), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(mixed.sample_count, SampleCount::Cardinality(150));
        assert_eq!(mixed.sample_count.value(), stage.train.len());
        assert!(mixed.counts.is_none());
        assert!(mixed.holdout.is_none());
    }

    #[test]
    fn test_first_stage_ignores_memory() {
        let (mut stage, memory) = stage(10, 20, 5, 30);
        stage.group_idx = 0;
        let mixer = RehearsalMixer::new(BiasRect::None, 0.1);
        let mixed = mixer.mix(&stage, Some(&memory), &model(15), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(mixed.dataset.len(), 150);
    }

    #[test]
    fn test_exemplars_follow_new_data() {
        let (stage, memory) = stage(2, 3, 1, 4);
        let mixer = RehearsalMixer::new(BiasRect::None, 0.1);
        let mixed = mixer.mix(&stage, Some(&memory), &model(3), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(mixed.dataset.labels(), vec![2, 2, 2, 2, 0, 0, 0, 1, 1, 1]);
        assert_eq!(mixed.sample_count.value(), 10);
        let counts = mixed.counts.unwrap();
        assert_eq!(counts.old_per_class, 3.0);
        assert_eq!(counts.new_per_class, 4.0);
    }

    #[test]
    fn test_holdout_skips_ratio_of_old_count_per_class() {
        let (stage, memory) = stage(10, 100, 5, 200);
        let mixer = RehearsalMixer::new(BiasRect::Bic, 0.1);
        let mixed = mixer.mix(&stage, Some(&memory), &model(15), &mut StdRng::seed_from_u64(0)).unwrap();
        let before = 10 * 100 + 5 * 200;
        assert_eq!(mixed.sample_count.value(), before - 10 * 15);
        assert_eq!(mixed.dataset.len(), before - 10 * 15);
        let holdout = mixed.holdout.unwrap();
        assert_eq!(holdout.skipped_per_class, 10);
        assert_eq!(holdout.dataset.len(), 150);
        assert!(holdout.dataset.class_counts().values().all(|&n| n == 10));
    }

    #[test]
    fn test_undersampling_targets_old_equalized_size() {
        let (stage, memory) = stage(10, 50, 5, 120);
        let mixer = RehearsalMixer::new(BiasRect::Undersampling, 0.1);
        let mixed = mixer.mix(&stage, Some(&memory), &model(15), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(mixed.sample_count.value(), 750);
        assert!(matches!(mixed.sample_count, SampleCount::EqualizedToOld { .. }));
        // the count only sizes the shuffle buffer; every example is still trained on
        assert_eq!(mixed.dataset.len(), 10 * 50 + 5 * 120);
        assert_eq!(mixed.dataset.class_counts().get(&10), Some(&120));
    }

    #[test]
    fn test_resampling_rebuilds_balanced_set() {
        let (stage, memory) = stage(2, 10, 1, 30);
        let mixer = RehearsalMixer::new(BiasRect::RandomOversampling, 0.1);
        let mixed = mixer.mix(&stage, Some(&memory), &model(3), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(mixed.sample_count, SampleCount::Cardinality(90));
        assert!(mixed.dataset.class_counts().values().all(|&n| n == 30));
    }

    #[test]
    fn test_label_outside_cumulative_set() {
        let (stage, _) = stage(2, 10, 1, 10);
        let memory = dataset(&[(0, 5), (7, 5)]);
        let mixer = RehearsalMixer::new(BiasRect::None, 0.1);
        let err = mixer.mix(&stage, Some(&memory), &model(3), &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }
}
