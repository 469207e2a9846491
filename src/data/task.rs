//! Class-incremental task driver
//!
//! Splits a labelled train/test pair into an ordered sequence of stages.
//! Labels are remapped to incremental order, so the classes of stage `i`
//! are always `cumulative(i-1)..cumulative(i)` and the logits of old classes
//! precede those of new ones.

use super::dataset::Dataset;
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// One incremental stage
///
/// Immutable once built. `train` holds new-class data only; `test` holds the
/// held-out data of every cumulative class.
#[derive(Debug, Clone)]
pub struct Stage {
    pub group_idx: usize,
    pub nb_groups: usize,
    /// Classes seen in earlier stages
    pub old_classes: Vec<usize>,
    /// Classes introduced by this stage
    pub cur_classes: Vec<usize>,
    pub train: Dataset,
    pub test: Dataset,
}

impl Stage {
    /// `old_classes ∪ cur_classes`, in logit order
    pub fn cumulative_classes(&self) -> Vec<usize> {
        self.old_classes.iter().chain(&self.cur_classes).copied().collect()
    }

    pub fn num_old(&self) -> usize {
        self.old_classes.len()
    }

    pub fn num_cur(&self) -> usize {
        self.cur_classes.len()
    }

    pub fn num_cumulative(&self) -> usize {
        self.old_classes.len() + self.cur_classes.len()
    }

    pub fn is_first_stage(&self) -> bool {
        self.group_idx == 0
    }

    pub fn is_final_stage(&self) -> bool {
        self.group_idx + 1 == self.nb_groups
    }

    /// Whether `label` belongs to a class of an earlier stage
    pub fn is_old(&self, label: usize) -> bool {
        label < self.num_old()
    }

    /// Folder name of the stage in the run layout (one-based)
    pub fn folder_name(&self) -> String {
        format!("group_{}", self.group_idx + 1)
    }
}

/// Class order and stage boundaries of an incremental run
#[derive(Debug, Clone)]
pub struct ClassIncrementalTask {
    train: Dataset,
    test: Dataset,
    /// `class_order[i]` is the original label of incremental class `i`
    class_order: Vec<usize>,
    boundaries: Vec<Range<usize>>,
}

impl ClassIncrementalTask {
    /// Build the task from datasets with arbitrary original labels
    ///
    /// The class order is the sorted label set of `train`, shuffled with
    /// `shuffle_seed` when one is given. The first stage holds `base_classes`
    /// classes; every later stage holds `increment` (the last may hold fewer).
    pub fn new(
        train: Dataset,
        test: Dataset,
        base_classes: usize,
        increment: usize,
        shuffle_seed: Option<u64>,
    ) -> Result<Self> {
        if base_classes == 0 || increment == 0 {
            return Err(Error::ConfigError(format!(
                "base_classes ({base_classes}) and increment ({increment}) must be > 0"
            )));
        }
        if train.feature_shape() != test.feature_shape() {
            return Err(Error::Data(format!(
                "train shape {:?} differs from test shape {:?}",
                train.feature_shape(),
                test.feature_shape()
            )));
        }

        let labels: BTreeSet<usize> = train.iter().map(|ex| ex.label).collect();
        let mut class_order: Vec<usize> = labels.into_iter().collect();
        if class_order.len() < base_classes {
            return Err(Error::Data(format!(
                "{} classes in the training data, fewer than base_classes={base_classes}",
                class_order.len()
            )));
        }
        if let Some(seed) = shuffle_seed {
            class_order.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        let total = class_order.len();
        let mut boundaries = vec![0..base_classes];
        let mut start = base_classes;
        while start < total {
            let end = (start + increment).min(total);
            boundaries.push(start..end);
            start = end;
        }

        let position: HashMap<usize, usize> =
            class_order.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let unknown = test.iter().find(|ex| !position.contains_key(&ex.label));
        if let Some(ex) = unknown {
            return Err(Error::Data(format!(
                "test label {} does not occur in the training data",
                ex.label
            )));
        }

        let remap = |ds: &Dataset| ds.relabel(|label| position.get(&label).copied());
        let train = remap(&train);
        let test = remap(&test);

        tracing::info!(
            classes = total,
            groups = boundaries.len(),
            base_classes,
            increment,
            "class-incremental task"
        );
        Ok(Self { train, test, class_order, boundaries })
    }

    pub fn nb_groups(&self) -> usize {
        self.boundaries.len()
    }

    pub fn num_classes(&self) -> usize {
        self.class_order.len()
    }

    pub fn class_order(&self) -> &[usize] {
        &self.class_order
    }

    /// Build stage `group_idx`
    pub fn stage(&self, group_idx: usize) -> Result<Stage> {
        let cur = self.boundaries.get(group_idx).ok_or_else(|| {
            Error::ConfigError(format!(
                "stage {group_idx} out of range, task has {} stages",
                self.nb_groups()
            ))
        })?;
        let cur = cur.clone();
        let cumulative_end = cur.end;

        Ok(Stage {
            group_idx,
            nb_groups: self.nb_groups(),
            old_classes: (0..cur.start).collect(),
            cur_classes: cur.clone().collect(),
            train: self.train.filter(|ex| cur.contains(&ex.label)).cache(),
            test: self.test.filter(|ex| ex.label < cumulative_end).cache(),
        })
    }

    /// Every stage in order
    pub fn stages(&self) -> impl Iterator<Item = Result<Stage>> + '_ {
        (0..self.nb_groups()).map(move |i| self.stage(i))
    }
}
