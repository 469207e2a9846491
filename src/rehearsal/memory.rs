//! Episodic memory with a fixed total budget

use super::RehearsalMemory;
use crate::config::ExemplarSelection;
use crate::data::{Dataset, Stage};
use crate::error::{Error, Result};
use crate::model::Classifier;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Exemplar store split evenly across all seen classes
///
/// On every save the per-class quota becomes `budget / |cumulative|`. Old
/// classes keep the prefix of their previous selection; new classes are
/// selected from the stage's training data.
#[derive(Debug, Clone)]
pub struct EpisodicMemory {
    budget: usize,
    selection: ExemplarSelection,
    seed: u64,
    exemplars: BTreeMap<usize, Dataset>,
}

impl EpisodicMemory {
    pub fn new(budget: usize, selection: ExemplarSelection, seed: u64) -> Self {
        Self { budget, selection, seed, exemplars: BTreeMap::new() }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Classes with stored exemplars
    pub fn classes(&self) -> impl Iterator<Item = usize> + '_ {
        self.exemplars.keys().copied()
    }

    fn choose_exemplars(
        &self,
        model: &dyn Classifier,
        data: &Dataset,
        quota: usize,
        class: usize,
    ) -> Dataset {
        if data.len() <= quota {
            return data.clone();
        }
        let order = match self.selection {
            ExemplarSelection::Herding => {
                let (x, _) = data.to_matrix();
                herding_order(&model.embed(&x), quota)
            }
            ExemplarSelection::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed ^ class as u64);
                let mut idx: Vec<usize> = (0..data.len()).collect();
                idx.shuffle(&mut rng);
                idx.truncate(quota);
                idx
            }
        };
        data.select(&order).cache()
    }
}

pub(crate) fn l2_normalize_rows(mut x: Array2<f32>) -> Array2<f32> {
    for mut row in x.axis_iter_mut(Axis(0)) {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    x
}

/// iCaRL herding: indices of `m` rows whose running mean best tracks the
/// mean of all (L2-normalized) features, in selection order
pub fn herding_order(features: &Array2<f32>, m: usize) -> Vec<usize> {
    let n = features.nrows();
    let feats = l2_normalize_rows(features.clone());
    let Some(mu) = feats.mean_axis(Axis(0)) else {
        return Vec::new();
    };

    let mut selected = Vec::with_capacity(m.min(n));
    let mut taken = vec![false; n];
    let mut running = Array1::<f32>::zeros(feats.ncols());
    for k in 1..=m.min(n) {
        let mut best = None;
        let mut best_dist = f32::INFINITY;
        for i in (0..n).filter(|&i| !taken[i]) {
            let dist: f32 = mu
                .iter()
                .zip(running.iter().zip(feats.row(i)))
                .map(|(&mu, (&r, &f))| {
                    let d = mu - (r + f) / k as f32;
                    d * d
                })
                .sum();
            if dist < best_dist {
                best_dist = dist;
                best = Some(i);
            }
        }
        let Some(i) = best else { break };
        taken[i] = true;
        running += &feats.row(i);
        selected.push(i);
    }
    selected
}

impl RehearsalMemory for EpisodicMemory {
    fn load_prev(&self) -> Option<Dataset> {
        let mut iter = self.exemplars.values();
        let first = iter.next()?.clone();
        let merged = iter.try_fold(first, |acc, ds| acc.concatenate(ds)).ok()?;
        (!merged.is_empty()).then(|| merged.cache())
    }

    fn save(&mut self, model: &dyn Classifier, stage: &Stage) -> Result<()> {
        let cumulative = stage.num_cumulative();
        if cumulative == 0 {
            return Ok(());
        }
        let quota = self.budget / cumulative;
        if quota == 0 {
            return Err(Error::ConfigError(format!(
                "memory budget {} is smaller than the {cumulative} classes seen",
                self.budget
            )));
        }

        for ds in self.exemplars.values_mut() {
            *ds = ds.take(quota).cache();
        }
        for &class in &stage.cur_classes {
            let data = stage.train.filter_class(class);
            let chosen = self.choose_exemplars(model, &data, quota, class);
            self.exemplars.insert(class, chosen);
        }

        tracing::info!(
            group = stage.group_idx,
            per_class = quota,
            size = self.size(),
            "rehearsal memory updated"
        );
        Ok(())
    }

    fn size(&self) -> usize {
        self.exemplars.values().map(Dataset::len).sum()
    }

    fn exemplars_of(&self, class: usize) -> Option<&Dataset> {
        self.exemplars.get(&class)
    }
}
