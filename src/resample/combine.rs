//! SMOTE followed by a cleaning pass

use super::neighbors::{k_nearest, pairwise_sq_dists};
use super::over::Smote;
use super::{check_input, Resampled, Resampler};
use crate::error::Result;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;

/// SMOTE, then drop both ends of every Tomek link
///
/// A Tomek link is a pair of samples of different classes that are each
/// other's nearest neighbour.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmoteTomek {
    pub smote: Smote,
}

impl Resampler for SmoteTomek {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let (x, y) = self.smote.fit_resample(x, y, rng)?;
        let d = pairwise_sq_dists(&x.view(), &x.view())?;
        let nearest: Vec<Option<usize>> =
            (0..y.len()).map(|i| k_nearest(d.row(i), 1, Some(i)).first().copied()).collect();

        let keep: Vec<usize> = (0..y.len())
            .filter(|&i| match nearest[i] {
                Some(j) => !(y[i] != y[j] && nearest[j] == Some(i)),
                None => true,
            })
            .collect();
        Ok(select(&x, &y, &keep))
    }

    fn name(&self) -> &'static str {
        "smote_tomek"
    }
}

/// SMOTE, then edited nearest neighbours
///
/// A sample is removed unless all of its `n_neighbors` nearest neighbours
/// share its class.
#[derive(Debug, Clone, Copy)]
pub struct SmoteEnn {
    pub smote: Smote,
    pub n_neighbors: usize,
}

impl Default for SmoteEnn {
    fn default() -> Self {
        Self { smote: Smote::default(), n_neighbors: 3 }
    }
}

impl Resampler for SmoteEnn {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let (x, y) = self.smote.fit_resample(x, y, rng)?;
        let d = pairwise_sq_dists(&x.view(), &x.view())?;
        let keep: Vec<usize> = (0..y.len())
            .filter(|&i| k_nearest(d.row(i), self.n_neighbors, Some(i)).iter().all(|&j| y[j] == y[i]))
            .collect();
        Ok(select(&x, &y, &keep))
    }

    fn name(&self) -> &'static str {
        "smote_enn"
    }
}

fn select(x: &Array2<f32>, y: &[usize], keep: &[usize]) -> Resampled {
    (x.select(Axis(0), keep), keep.iter().map(|&i| y[i]).collect())
}
