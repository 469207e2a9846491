//! Batch data structure

use ndarray::Array2;

/// A training batch: one input row per example and its label
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input features `[batch_size, feature_dim]`
    pub inputs: Array2<f32>,
    /// Class labels
    pub labels: Vec<usize>,
}

impl Batch {
    /// Create a new batch
    pub fn new(inputs: Array2<f32>, labels: Vec<usize>) -> Self {
        debug_assert_eq!(inputs.nrows(), labels.len());
        Self { inputs, labels }
    }

    /// Number of examples in the batch
    pub fn size(&self) -> usize {
        self.labels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_creation() {
        let batch = Batch::new(Array2::zeros((3, 4)), vec![0, 1, 2]);
        assert_eq!(batch.size(), 3);
        assert_eq!(batch.inputs.ncols(), 4);
    }
}
