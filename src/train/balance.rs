//! Class weights for imbalance correction

use crate::config::BiasRect;
use std::collections::BTreeMap;

/// Weight of every class index of the stage
#[derive(Debug, Clone, PartialEq)]
pub struct ClassWeights {
    weights: Vec<f32>,
}

impl ClassWeights {
    /// Weight 1.0 for every class
    pub fn uniform(num_classes: usize) -> Self {
        Self { weights: vec![1.0; num_classes] }
    }

    /// Inverse-frequency ("balanced") weights of the realized labels
    ///
    /// `weight(c) = n_samples / (n_present_classes * count(c))`. Classes
    /// absent from `labels` keep weight 1.0.
    pub fn balanced(labels: &[usize], num_classes: usize) -> Self {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for &label in labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        let mut weights = vec![1.0; num_classes.max(counts.keys().last().map_or(0, |c| c + 1))];
        let present = counts.len() as f32;
        let total = labels.len() as f32;
        for (class, count) in counts {
            weights[class] = total / (present * count as f32);
        }
        Self { weights }
    }

    pub fn get(&self, class: usize) -> f32 {
        self.weights.get(class).copied().unwrap_or(1.0)
    }

    /// Per-example weights of a batch
    pub fn gather(&self, labels: &[usize]) -> Vec<f32> {
        labels.iter().map(|&l| self.get(l)).collect()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }
}

/// Class weights of a stage for the configured strategy
///
/// Only `reweighting` produces non-uniform weights, computed over the whole
/// mixed training set.
pub fn compute_class_weights(
    strategy: BiasRect,
    labels: &[usize],
    num_cumulative: usize,
) -> ClassWeights {
    match strategy {
        BiasRect::Reweighting => ClassWeights::balanced(labels, num_cumulative),
        _ => ClassWeights::uniform(num_cumulative),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_inverse_frequency_ratio() {
        let mut labels = vec![0; 900];
        labels.extend(vec![1; 100]);
        let w = compute_class_weights(BiasRect::Reweighting, &labels, 2);
        assert_relative_eq!(w.get(1) / w.get(0), 9.0, epsilon = 1e-5);
        assert_relative_eq!(w.get(0), 1000.0 / (2.0 * 900.0));
    }

    #[test]
    fn test_other_strategies_are_uniform() {
        let labels = vec![0, 0, 0, 1];
        for strategy in [BiasRect::None, BiasRect::Bic, BiasRect::Smote] {
            let w = compute_class_weights(strategy, &labels, 3);
            assert_eq!(w.as_slice(), &[1.0, 1.0, 1.0]);
        }
    }

    #[test]
    fn test_gather_follows_labels() {
        let w = ClassWeights::balanced(&[0, 0, 0, 1], 2);
        let batch = w.gather(&[1, 0, 1]);
        assert_relative_eq!(batch[0], 2.0);
        assert_relative_eq!(batch[1], 4.0 / 6.0, epsilon = 1e-6);
        assert_eq!(batch[0], batch[2]);
    }

    proptest! {
        #[test]
        fn prop_balanced_weights_equalize_class_mass(
            counts in proptest::collection::vec(1usize..50, 1..6)
        ) {
            let labels: Vec<usize> = counts
                .iter()
                .enumerate()
                .flat_map(|(c, &n)| std::iter::repeat(c).take(n))
                .collect();
            let w = ClassWeights::balanced(&labels, counts.len());
            let total = labels.len() as f32;
            for (c, &n) in counts.iter().enumerate() {
                // every class carries total / k of the weighted mass
                let mass = w.get(c) * n as f32;
                prop_assert!((mass - total / counts.len() as f32).abs() < 1e-3);
            }
        }
    }
}
