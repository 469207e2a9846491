//! Undersampling: shrink every class to the minority count

use super::cluster::{kmeans_centroids, KMedoids};
use super::neighbors::{k_farthest, k_nearest, pairwise_sq_dists};
use super::{assemble, check_input, class_indices, Resampled, Resampler};
use crate::error::{Error, Result};
use crate::model::Classifier;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;

fn minority_count(classes: &std::collections::BTreeMap<usize, Vec<usize>>) -> usize {
    classes.values().map(Vec::len).min().unwrap_or(0)
}

/// Keep a uniform random subset of every class
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUnderSampler;

impl Resampler for RandomUnderSampler {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let classes = class_indices(y);
        let target = minority_count(&classes);

        let mut parts = Vec::with_capacity(classes.len());
        for (&label, rows) in &classes {
            let mut keep: Vec<usize> =
                index::sample(rng, rows.len(), target).into_iter().map(|i| rows[i]).collect();
            keep.sort_unstable();
            parts.push((x.select(Axis(0), &keep), vec![label; target]));
        }
        Ok(assemble(parts, x.ncols()))
    }

    fn name(&self) -> &'static str {
        "random_undersampling"
    }
}

/// Replace every larger class by the k-means centroids of its samples
#[derive(Debug, Clone, Copy)]
pub struct ClusterCentroids {
    pub random_state: u64,
}

impl Default for ClusterCentroids {
    fn default() -> Self {
        Self { random_state: 0 }
    }
}

impl Resampler for ClusterCentroids {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], _rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let classes = class_indices(y);
        let target = minority_count(&classes);

        let mut parts = Vec::with_capacity(classes.len());
        for (&label, rows) in &classes {
            let class_x = x.select(Axis(0), rows);
            let kept = if rows.len() > target {
                kmeans_centroids(&class_x.view(), target, self.random_state)?
            } else {
                class_x
            };
            parts.push((kept, vec![label; target]));
        }
        Ok(assemble(parts, x.ncols()))
    }

    fn name(&self) -> &'static str {
        "kmeans"
    }
}

/// Keep the k-medoids of every class, clustered in the model's embedding space
///
/// Medoids are real samples, so the kept rows are original inputs.
#[derive(Debug)]
pub struct MedoidUnderSampler {
    embedder: Box<dyn Classifier>,
}

impl MedoidUnderSampler {
    pub fn new(embedder: Box<dyn Classifier>) -> Self {
        Self { embedder }
    }
}

impl Resampler for MedoidUnderSampler {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        if x.ncols() != self.embedder.input_dim() {
            return Err(Error::Data(format!(
                "embedding model expects {} features, got {}",
                self.embedder.input_dim(),
                x.ncols()
            )));
        }
        let classes = class_indices(y);
        let target = minority_count(&classes);

        let mut parts = Vec::with_capacity(classes.len());
        for (&label, rows) in &classes {
            let class_x = x.select(Axis(0), rows);
            let features = self.embedder.embed(&class_x);
            let seed = rng.random_range(0..rows.len() as u64);
            let mut medoids = KMedoids::new(target).with_random_state(seed).fit(&features.view())?;
            medoids.sort_unstable();
            parts.push((class_x.select(Axis(0), &medoids), vec![label; target]));
        }
        Ok(assemble(parts, x.ncols()))
    }

    fn name(&self) -> &'static str {
        "kmedoids"
    }
}

/// Selection rule of [`NearMiss`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NearMissVersion {
    /// Smallest mean distance to the nearest minority samples
    One,
    /// Smallest mean distance to the farthest minority samples
    Two,
    /// Shortlist the neighbours of every minority sample, keep the farthest
    Three,
}

/// NearMiss undersampling
#[derive(Debug, Clone, Copy)]
pub struct NearMiss {
    version: NearMissVersion,
    n_neighbors: usize,
    n_neighbors_ver3: usize,
}

impl NearMiss {
    pub fn new(version: NearMissVersion) -> Self {
        Self { version, n_neighbors: 3, n_neighbors_ver3: 3 }
    }

    pub fn version(&self) -> NearMissVersion {
        self.version
    }

    /// Mean euclidean distance of every row of `d` to its selected minority samples
    fn mean_distances(&self, d: &Array2<f32>) -> Vec<f32> {
        let k = self.n_neighbors.min(d.ncols());
        d.axis_iter(Axis(0))
            .map(|row| {
                let picked = match self.version {
                    NearMissVersion::Two => k_farthest(row, k),
                    NearMissVersion::One | NearMissVersion::Three => k_nearest(row, k, None),
                };
                picked.iter().map(|&j| row[j].sqrt()).sum::<f32>() / k.max(1) as f32
            })
            .collect()
    }
}

impl Resampler for NearMiss {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], _rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let classes = class_indices(y);
        let Some((&minority, minority_rows)) = classes.iter().min_by_key(|(_, rows)| rows.len()) else {
            return Err(Error::Data("cannot resample an empty dataset".to_string()));
        };
        let target = minority_rows.len();
        let minority_x = x.select(Axis(0), minority_rows);

        let mut parts = Vec::with_capacity(classes.len());
        for (&label, rows) in &classes {
            if label == minority {
                parts.push((minority_x.clone(), vec![label; target]));
                continue;
            }

            let candidates: Vec<usize> = if self.version == NearMissVersion::Three {
                let class_x = x.select(Axis(0), rows);
                let d = pairwise_sq_dists(&minority_x.view(), &class_x.view())?;
                let mut shortlist: Vec<usize> = d
                    .axis_iter(Axis(0))
                    .flat_map(|row| k_nearest(row, self.n_neighbors_ver3, None))
                    .collect();
                shortlist.sort_unstable();
                shortlist.dedup();
                shortlist.into_iter().map(|i| rows[i]).collect()
            } else {
                rows.clone()
            };

            let cand_x = x.select(Axis(0), &candidates);
            let d = pairwise_sq_dists(&cand_x.view(), &minority_x.view())?;
            let scores = self.mean_distances(&d);
            let mut order: Vec<usize> = (0..candidates.len()).collect();
            if self.version == NearMissVersion::Three {
                order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
            } else {
                order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
            }
            order.truncate(target);
            let mut keep: Vec<usize> = order.into_iter().map(|i| candidates[i]).collect();
            keep.sort_unstable();
            let n = keep.len();
            parts.push((x.select(Axis(0), &keep), vec![label; n]));
        }
        Ok(assemble(parts, x.ncols()))
    }

    fn name(&self) -> &'static str {
        match self.version {
            NearMissVersion::One => "near_miss_1",
            NearMissVersion::Two => "near_miss_2",
            NearMissVersion::Three => "near_miss_3",
        }
    }
}
