//! Score-based accuracy metrics

use ndarray::{Array2, Axis};

/// Index of the highest score of every row
pub fn argmax_rows(scores: &Array2<f32>) -> Vec<usize> {
    scores
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

/// Percentage of rows whose label is among the `k` highest scores
///
/// With fewer than `k` classes every prediction counts as a hit.
pub fn top_k_accuracy(scores: &Array2<f32>, labels: &[usize], k: usize) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let hits = scores
        .axis_iter(Axis(0))
        .zip(labels)
        .filter(|(row, label)| {
            let Some(&target) = row.get(**label) else {
                return false;
            };
            let higher = row.iter().filter(|&&v| v > target).count();
            higher < k
        })
        .count();
    hits as f32 * 100.0 / labels.len() as f32
}

/// Harmonic mean of old-class and new-class accuracy
///
/// Without old classes (the first stage) this is the new-class accuracy.
pub fn harmonic_mean(old_acc: Option<f32>, new_acc: f32) -> f32 {
    match old_acc {
        None => new_acc,
        Some(old) if old + new_acc > 0.0 => 2.0 * old * new_acc / (old + new_acc),
        Some(_) => 0.0,
    }
}
