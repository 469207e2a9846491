//! Resampling strategies for the mixed old/new training set
//!
//! Every strategy maps a flattened feature matrix and its labels to a new
//! matrix and label vector. Output labels are always drawn from the input
//! label set and `x'.nrows() == y'.len()`; per-class cardinalities change.
//!
//! Target counts follow the usual conventions: oversamplers raise every
//! class to the majority count (ADASYN only the minority class),
//! undersamplers lower every class to the minority count.

mod cluster;
mod combine;
mod neighbors;
mod over;
mod under;

pub use cluster::{kmeans_centroids, KMedoids};
pub use combine::{SmoteEnn, SmoteTomek};
pub use over::{Adasyn, RandomOverSampler, Smote};
pub use under::{ClusterCentroids, MedoidUnderSampler, NearMiss, NearMissVersion, RandomUnderSampler};

use crate::config::BiasRect;
use crate::error::{Error, Result};
use crate::model::Classifier;
use ndarray::Array2;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

/// Resampled feature matrix and labels
pub type Resampled = (Array2<f32>, Vec<usize>);

/// A resampling transform `(X, y) -> (X', y')`
pub trait Resampler: std::fmt::Debug {
    fn fit_resample(&self, x: &Array2<f32>, y: &[usize], rng: &mut StdRng) -> Result<Resampled>;

    fn name(&self) -> &'static str;
}

/// Resampler implementing a resampling strategy
///
/// `model` provides the embedding space of the medoid strategy. Returns
/// `None` for strategies that do not resample.
pub fn resampler_for(strategy: BiasRect, model: &dyn Classifier) -> Option<Box<dyn Resampler>> {
    let resampler: Box<dyn Resampler> = match strategy {
        BiasRect::Smote => Box::new(Smote::default()),
        BiasRect::Adasyn => Box::new(Adasyn::default()),
        BiasRect::RandomOversampling => Box::new(RandomOverSampler),
        BiasRect::Kmeans => Box::new(ClusterCentroids::default()),
        BiasRect::Kmedoids => Box::new(MedoidUnderSampler::new(model.box_clone())),
        BiasRect::RandomUndersampling => Box::new(RandomUnderSampler),
        BiasRect::NearMiss1 => Box::new(NearMiss::new(NearMissVersion::One)),
        BiasRect::NearMiss2 => Box::new(NearMiss::new(NearMissVersion::Two)),
        BiasRect::NearMiss3 => Box::new(NearMiss::new(NearMissVersion::Three)),
        BiasRect::SmoteTomek => Box::new(SmoteTomek::default()),
        BiasRect::SmoteEnn => Box::new(SmoteEnn::default()),
        BiasRect::None
        | BiasRect::Reweighting
        | BiasRect::Bic
        | BiasRect::Undersampling
        | BiasRect::WeightAligningNoBias => return None,
    };
    Some(resampler)
}

/// Row indices of every class, in input order
pub(crate) fn class_indices(y: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut out: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in y.iter().enumerate() {
        out.entry(label).or_default().push(i);
    }
    out
}

/// Reject empty or mismatched input
pub(crate) fn check_input(x: &Array2<f32>, y: &[usize]) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(Error::Data(format!(
            "resampling input has {} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if y.is_empty() {
        return Err(Error::Data("cannot resample an empty dataset".to_string()));
    }
    Ok(())
}

/// Stack per-part rows and labels into one output
pub(crate) fn assemble(parts: Vec<(Array2<f32>, Vec<usize>)>, n_features: usize) -> Resampled {
    let total: usize = parts.iter().map(|(_, y)| y.len()).sum();
    let mut x = Array2::zeros((total, n_features));
    let mut y = Vec::with_capacity(total);
    let mut row = 0;
    for (px, py) in parts {
        for r in px.rows() {
            x.row_mut(row).assign(&r);
            row += 1;
        }
        y.extend(py);
    }
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MlpClassifier;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    #[test]
    fn test_every_resampling_strategy_has_an_implementation() {
        let model = MlpClassifier::new(2, 0, 2, 0.0, &mut StdRng::seed_from_u64(0));
        for strategy in BiasRect::ALL {
            assert_eq!(
                resampler_for(strategy, &model).is_some(),
                strategy.is_resampling(),
                "{strategy}"
            );
        }
    }

    #[test]
    fn test_check_input() {
        assert!(check_input(&Array2::zeros((0, 2)), &[]).is_err());
        assert!(check_input(&Array2::zeros((2, 2)), &[0]).is_err());
        assert!(check_input(&Array2::zeros((1, 2)), &[0]).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_resampled_labels_are_drawn_from_input(
            sizes in proptest::collection::vec(6usize..14, 2..4),
            values in proptest::collection::vec(-3.0f32..3.0, 3 * 13 * 3),
            seed in 0u64..1000,
        ) {
            let n: usize = sizes.iter().sum();
            let mut y = Vec::with_capacity(n);
            for (label, &size) in sizes.iter().enumerate() {
                y.extend(std::iter::repeat(label).take(size));
            }
            let x = Array2::from_shape_vec((n, 3), values[..n * 3].to_vec()).unwrap();
            let model = MlpClassifier::new(3, 4, sizes.len(), 0.0, &mut StdRng::seed_from_u64(seed));
            let input_labels: BTreeSet<usize> = y.iter().copied().collect();

            for strategy in BiasRect::ALL {
                let Some(resampler) = resampler_for(strategy, &model) else { continue };
                let mut rng = StdRng::seed_from_u64(seed);
                match resampler.fit_resample(&x, &y, &mut rng) {
                    Ok((xr, yr)) => {
                        prop_assert_eq!(xr.nrows(), yr.len());
                        prop_assert_eq!(xr.ncols(), 3);
                        prop_assert!(yr.iter().all(|l| input_labels.contains(l)), "{}", strategy);
                    }
                    // density-weighted synthesis has nothing to do for isolated classes
                    Err(Error::Data(_)) if strategy == BiasRect::Adasyn => {}
                    Err(e) => prop_assert!(false, "{strategy}: {e}"),
                }
            }
        }
    }
}
