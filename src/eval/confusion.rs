//! Confusion matrix for multi-class classification

use std::fmt;

/// Confusion matrix for multi-class classification
///
/// Element [i][j] represents count of samples with true label i predicted as j
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfusionMatrix {
    /// The matrix data: matrix[true_label][predicted_label] = count
    matrix: Vec<Vec<usize>>,
    n_classes: usize,
}

impl ConfusionMatrix {
    /// Create an empty confusion matrix with given number of classes
    pub fn new(n_classes: usize) -> Self {
        Self { matrix: vec![vec![0; n_classes]; n_classes], n_classes }
    }

    /// Create from predictions and ground truth over `n_classes` classes
    ///
    /// Pairs with a label outside `0..n_classes` are ignored.
    pub fn from_predictions(y_pred: &[usize], y_true: &[usize], n_classes: usize) -> Self {
        debug_assert_eq!(y_pred.len(), y_true.len());
        let mut cm = Self::new(n_classes);
        for (&pred, &true_label) in y_pred.iter().zip(y_true) {
            if pred < n_classes && true_label < n_classes {
                cm.matrix[true_label][pred] += 1;
            }
        }
        cm
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Get element at [true_label][predicted_label]
    pub fn get(&self, true_label: usize, predicted_label: usize) -> usize {
        self.matrix[true_label][predicted_label]
    }

    /// Total true instances of a class (row sum)
    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    /// Overall fraction of correct predictions
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.n_classes).map(|i| self.matrix[i][i]).sum();
        correct as f64 / total as f64
    }

    /// Accuracy of every class in percent (`diag * 100 / row sum`)
    ///
    /// `None` for classes without test examples.
    pub fn per_class_accuracy(&self) -> Vec<Option<f32>> {
        (0..self.n_classes)
            .map(|c| {
                let support = self.support(c);
                (support > 0).then(|| self.matrix[c][c] as f32 * 100.0 / support as f32)
            })
            .collect()
    }

    /// Unweighted mean of the per-class accuracies of `classes`, in percent
    pub fn mean_class_accuracy(&self, classes: impl IntoIterator<Item = usize>) -> Option<f32> {
        let per_class = self.per_class_accuracy();
        let accs: Vec<f32> = classes
            .into_iter()
            .filter_map(|c| per_class.get(c).copied().flatten())
            .collect();
        (!accs.is_empty()).then(|| accs.iter().sum::<f32>() / accs.len() as f32)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Confusion Matrix:")?;

        write!(f, "      ")?;
        for j in 0..self.n_classes {
            write!(f, "Pred {j} ")?;
        }
        writeln!(f)?;

        for i in 0..self.n_classes {
            write!(f, "True {i}")?;
            for j in 0..self.n_classes {
                write!(f, "{:>6} ", self.matrix[i][j])?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
