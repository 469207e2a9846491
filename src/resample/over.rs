//! Oversampling: duplicate or synthesize minority-class samples

use super::neighbors::{k_nearest, pairwise_sq_dists};
use super::{assemble, check_input, class_indices, Resampled, Resampler};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::Rng;

/// Raise every class to the majority count by drawing with replacement
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOverSampler;

impl Resampler for RandomOverSampler {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let classes = class_indices(y);
        let majority = classes.values().map(Vec::len).max().unwrap_or(0);

        let mut extra = Vec::new();
        let mut extra_labels = Vec::new();
        for (&label, rows) in &classes {
            for _ in rows.len()..majority {
                extra.push(rows[rng.random_range(0..rows.len())]);
                extra_labels.push(label);
            }
        }
        let parts = vec![(x.clone(), y.to_vec()), (x.select(Axis(0), &extra), extra_labels)];
        Ok(assemble(parts, x.ncols()))
    }

    fn name(&self) -> &'static str {
        "random_oversampling"
    }
}

/// SMOTE: interpolate between a sample and one of its `k` same-class neighbours
#[derive(Debug, Clone, Copy)]
pub struct Smote {
    pub k_neighbors: usize,
}

impl Default for Smote {
    fn default() -> Self {
        Self { k_neighbors: 5 }
    }
}

impl Smote {
    /// Synthesize `n_new` samples of one class whose rows are `rows`
    pub(crate) fn synthesize(
        &self,
        x: &Array2<f32>,
        rows: &[usize],
        n_new: usize,
        rng: &mut StdRng,
    ) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((n_new, x.ncols()));
        if n_new == 0 {
            return Ok(out);
        }
        let neighbors = same_class_neighbors(x, rows, self.k_neighbors)?;
        for mut target in out.rows_mut() {
            let i = rng.random_range(0..rows.len());
            let nn = &neighbors[i];
            let j = nn[rng.random_range(0..nn.len())];
            target.assign(&interpolate(x.row(rows[i]), x.row(rows[j]), rng.random()));
        }
        Ok(out)
    }
}

impl Resampler for Smote {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let classes = class_indices(y);
        let majority = classes.values().map(Vec::len).max().unwrap_or(0);

        let mut parts = vec![(x.clone(), y.to_vec())];
        for (&label, rows) in &classes {
            let n_new = majority - rows.len();
            if n_new > 0 {
                parts.push((self.synthesize(x, rows, n_new, rng)?, vec![label; n_new]));
            }
        }
        Ok(assemble(parts, x.ncols()))
    }

    fn name(&self) -> &'static str {
        "smote"
    }
}

/// ADASYN on the minority class only
///
/// Samples whose neighbourhood is dominated by other classes receive
/// proportionally more synthetic neighbours.
#[derive(Debug, Clone, Copy)]
pub struct Adasyn {
    pub n_neighbors: usize,
}

impl Default for Adasyn {
    fn default() -> Self {
        Self { n_neighbors: 5 }
    }
}

impl Resampler for Adasyn {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled> {
        check_input(x, y)?;
        let classes = class_indices(y);
        let majority = classes.values().map(Vec::len).max().unwrap_or(0);
        let Some((&minority, rows)) = classes.iter().min_by_key(|(_, rows)| rows.len()) else {
            return Err(Error::Data("cannot resample an empty dataset".to_string()));
        };
        let n_new = majority - rows.len();
        if n_new == 0 {
            return Ok((x.clone(), y.to_vec()));
        }
        if x.nrows() <= self.n_neighbors {
            return Err(Error::Data(format!(
                "adasyn needs more than {} samples, got {}",
                self.n_neighbors,
                x.nrows()
            )));
        }

        let minority_rows = x.select(Axis(0), rows);
        let dists = pairwise_sq_dists(&minority_rows.view(), &x.view())?;
        let ratios: Vec<f32> = rows
            .iter()
            .enumerate()
            .map(|(i, &row)| {
                let nn = k_nearest(dists.row(i), self.n_neighbors, Some(row));
                nn.iter().filter(|&&j| y[j] != minority).count() as f32 / self.n_neighbors as f32
            })
            .collect();
        let total: f32 = ratios.iter().sum();
        if total <= 0.0 {
            return Err(Error::Data(format!(
                "adasyn: no neighbour of class {minority} belongs to another class"
            )));
        }

        let neighbors = same_class_neighbors(x, rows, self.n_neighbors)?;
        let mut synthetic = Vec::new();
        for (i, ratio) in ratios.iter().enumerate() {
            let count = (ratio / total * n_new as f32).round() as usize;
            let nn = &neighbors[i];
            for _ in 0..count {
                let j = nn[rng.random_range(0..nn.len())];
                synthetic.push(interpolate(x.row(rows[i]), x.row(rows[j]), rng.random()));
            }
        }

        let mut generated = Array2::zeros((synthetic.len(), x.ncols()));
        for (mut target, row) in generated.rows_mut().into_iter().zip(&synthetic) {
            target.assign(row);
        }
        let labels = vec![minority; synthetic.len()];
        Ok(assemble(vec![(x.clone(), y.to_vec()), (generated, labels)], x.ncols()))
    }

    fn name(&self) -> &'static str {
        "adasyn"
    }
}

/// `k` nearest same-class neighbours of every row in `rows`, as positions into `rows`
fn same_class_neighbors(x: &Array2<f32>, rows: &[usize], k: usize) -> Result<Vec<Vec<usize>>> {
    if rows.len() <= k {
        return Err(Error::Data(format!(
            "expected more than {k} samples per class for {k} neighbours, got {}",
            rows.len()
        )));
    }
    let class_x = x.select(Axis(0), rows);
    let dists = pairwise_sq_dists(&class_x.view(), &class_x.view())?;
    Ok((0..rows.len()).map(|i| k_nearest(dists.row(i), k, Some(i))).collect())
}

fn interpolate(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>, gap: f32) -> Array1<f32> {
    &a + &((&b - &a) * gap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// 12 samples of class 0 around the origin, 6 of class 1 around (4, 4)
    fn imbalanced() -> (Array2<f32>, Vec<usize>) {
        let mut x = Array2::zeros((18, 2));
        let mut y = Vec::new();
        for i in 0..12 {
            x[[i, 0]] = (i % 4) as f32 * 0.1;
            x[[i, 1]] = (i / 4) as f32 * 0.1;
            y.push(0);
        }
        for i in 0..6 {
            x[[12 + i, 0]] = 4.0 + (i % 3) as f32 * 0.1;
            x[[12 + i, 1]] = 4.0 + (i / 3) as f32 * 0.1;
            y.push(1);
        }
        (x, y)
    }

    fn count(y: &[usize], label: usize) -> usize {
        y.iter().filter(|&&l| l == label).count()
    }

    #[test]
    fn test_random_oversampler_balances() {
        let (x, y) = imbalanced();
        let (xr, yr) = RandomOverSampler.fit_resample(&x, &y, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(xr.nrows(), 24);
        assert_eq!(count(&yr, 1), 12);
        // duplicates only
        for r in xr.rows().into_iter().skip(18) {
            assert!(x.rows().into_iter().any(|o| o == r));
        }
    }

    #[test]
    fn test_smote_synthetic_points_stay_in_class_hull() {
        let (x, y) = imbalanced();
        let (xr, yr) = Smote::default().fit_resample(&x, &y, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(count(&yr, 0), 12);
        assert_eq!(count(&yr, 1), 12);
        for r in xr.rows().into_iter().skip(18) {
            assert!(r[0] >= 4.0 - 1e-5 && r[0] <= 4.2 + 1e-5);
            assert!(r[1] >= 4.0 - 1e-5 && r[1] <= 4.1 + 1e-5);
        }
    }

    #[test]
    fn test_smote_too_few_samples() {
        let x = Array2::zeros((5, 2));
        let y = vec![0, 0, 0, 0, 1];
        let err = Smote::default().fit_resample(&x, &y, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn test_adasyn_requires_mixed_neighbourhoods() {
        let (x, y) = imbalanced();
        let err = Adasyn::default().fit_resample(&x, &y, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn test_adasyn_oversamples_minority_only() {
        // interleaved classes on a line: every neighbourhood is mixed
        let n = 20;
        let mut x = Array2::zeros((n, 1));
        let mut y = Vec::new();
        for i in 0..n {
            x[[i, 0]] = i as f32;
            y.push(if i % 3 == 0 { 1 } else { 0 });
        }
        let before_major = count(&y, 0);
        let (xr, yr) = Adasyn::default().fit_resample(&x, &y, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(xr.nrows(), yr.len());
        assert_eq!(count(&yr, 0), before_major);
        assert!(count(&yr, 1) > count(&y, 1));
    }
}
