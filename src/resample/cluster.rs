//! Clustering for the undersamplers
//!
//! K-means delegates to aprender. Aprender has no k-medoids, so the
//! Voronoi-iteration variant is kept here on top of the shared distances.

use super::neighbors::{from_matrix, pairwise_sq_dists, to_matrix};
use crate::error::{Error, Result};
use aprender::cluster::KMeans;
use aprender::traits::UnsupervisedEstimator;
use ndarray::{Array2, ArrayView2};

/// K-means centroids of the rows of `x`, fitted with aprender's k-means++ Lloyd
pub fn kmeans_centroids(x: &ArrayView2<'_, f32>, n_clusters: usize, seed: u64) -> Result<Array2<f32>> {
    if n_clusters == 0 || x.nrows() < n_clusters {
        return Err(Error::Data(format!(
            "cannot form {n_clusters} clusters from {} samples",
            x.nrows()
        )));
    }
    let mut kmeans = KMeans::new(n_clusters).with_random_state(seed);
    kmeans
        .fit(&to_matrix(x)?)
        .map_err(|e| Error::Data(format!("k-means: {e}")))?;
    from_matrix(kmeans.centroids())
}

/// Voronoi-iteration k-medoids
///
/// Medoids are actual samples; returns their row indices.
#[derive(Debug, Clone)]
pub struct KMedoids {
    n_clusters: usize,
    max_iter: usize,
    random_state: u64,
}

impl KMedoids {
    pub fn new(n_clusters: usize) -> Self {
        Self { n_clusters, max_iter: 100, random_state: 0 }
    }

    #[must_use]
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit and return the medoid row indices
    pub fn fit(&self, x: &ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        let n = x.nrows();
        if n < self.n_clusters || self.n_clusters == 0 {
            return Err(Error::Data(format!(
                "cannot select {} medoids from {n} samples",
                self.n_clusters
            )));
        }
        let dists = pairwise_sq_dists(x, x)?;
        let mut medoids = farthest_point_init(&dists, self.n_clusters, self.random_state);

        for _ in 0..self.max_iter {
            let labels: Vec<usize> = (0..n)
                .map(|i| {
                    (0..medoids.len())
                        .min_by(|&a, &b| dists[[i, medoids[a]]].total_cmp(&dists[[i, medoids[b]]]))
                        .unwrap_or(0)
                })
                .collect();

            let mut changed = false;
            for (k, medoid) in medoids.iter_mut().enumerate() {
                let members: Vec<usize> = (0..n).filter(|&i| labels[i] == k).collect();
                let best = members.iter().copied().min_by(|&a, &b| {
                    let cost = |c: usize| members.iter().map(|&m| dists[[c, m]]).sum::<f32>();
                    cost(a).total_cmp(&cost(b))
                });
                if let Some(best) = best {
                    if best != *medoid {
                        *medoid = best;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        Ok(medoids)
    }
}

/// Distinct seed rows: one chosen from `seed`, then repeatedly the row
/// farthest from the chosen set
fn farthest_point_init(dists: &Array2<f32>, k: usize, seed: u64) -> Vec<usize> {
    let n = dists.nrows();
    let first = (seed as usize) % n;
    let mut chosen = vec![first];
    let mut min_dist = dists.column(first).to_vec();
    while chosen.len() < k {
        let next = (0..n)
            .filter(|i| !chosen.contains(i))
            .max_by(|&a, &b| min_dist[a].total_cmp(&min_dist[b]).then(b.cmp(&a)))
            .unwrap_or(first);
        chosen.push(next);
        for (m, &v) in min_dist.iter_mut().zip(dists.column(next)) {
            *m = m.min(v);
        }
    }
    chosen
}
