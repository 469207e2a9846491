//! Ordered, re-iterable example collections
//!
//! A `Dataset` shares its example storage behind an `Arc`. Filtering,
//! skipping and taking produce index views over the same storage; `cache`
//! compacts a view back into contiguous storage.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One input with its integer class label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Flattened input features
    pub input: Array1<f32>,
    /// Class index
    pub label: usize,
}

impl Example {
    pub fn new(input: Array1<f32>, label: usize) -> Self {
        Self { input, label }
    }
}

/// Ordered, finite collection of examples with a fixed feature shape
#[derive(Debug, Clone)]
pub struct Dataset {
    storage: Arc<Vec<Example>>,
    view: Option<Arc<[usize]>>,
    feature_shape: Arc<[usize]>,
}

impl Dataset {
    /// Create a dataset, checking every input against the feature shape
    pub fn new(examples: Vec<Example>, feature_shape: Vec<usize>) -> Result<Self> {
        let dim: usize = feature_shape.iter().product();
        if let Some(bad) = examples.iter().position(|e| e.input.len() != dim) {
            return Err(Error::Data(format!(
                "example {bad} has {} features, expected {dim} for shape {feature_shape:?}",
                examples[bad].input.len()
            )));
        }
        Ok(Self { storage: Arc::new(examples), view: None, feature_shape: feature_shape.into() })
    }

    /// Empty dataset with the given feature shape
    pub fn empty(feature_shape: Vec<usize>) -> Self {
        Self { storage: Arc::new(Vec::new()), view: None, feature_shape: feature_shape.into() }
    }

    /// Rebuild a dataset from a flattened feature matrix and label vector
    pub fn from_matrix(x: &Array2<f32>, y: &[usize], feature_shape: Vec<usize>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(Error::Data(format!(
                "feature matrix has {} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        let examples = x
            .axis_iter(Axis(0))
            .zip(y.iter())
            .map(|(row, &label)| Example::new(row.to_owned(), label))
            .collect();
        Self::new(examples, feature_shape)
    }

    /// Number of examples (the dataset cardinality)
    pub fn len(&self) -> usize {
        self.view.as_ref().map_or(self.storage.len(), |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feature_shape(&self) -> &[usize] {
        &self.feature_shape
    }

    /// Length of a flattened input
    pub fn feature_dim(&self) -> usize {
        self.feature_shape.iter().product()
    }

    /// Example at position `i`
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`
    pub fn get(&self, i: usize) -> &Example {
        match &self.view {
            Some(view) => &self.storage[view[i]],
            None => &self.storage[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Example> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Labels in dataset order
    pub fn labels(&self) -> Vec<usize> {
        self.iter().map(|e| e.label).collect()
    }

    /// Number of examples per label
    pub fn class_counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for e in self.iter() {
            *counts.entry(e.label).or_insert(0) += 1;
        }
        counts
    }

    fn storage_index(&self, i: usize) -> usize {
        self.view.as_ref().map_or(i, |v| v[i])
    }

    fn with_view(&self, indices: Vec<usize>) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            view: Some(indices.into()),
            feature_shape: Arc::clone(&self.feature_shape),
        }
    }

    /// Examples at `positions`, in the given order
    pub fn select(&self, positions: &[usize]) -> Self {
        self.with_view(positions.iter().map(|&i| self.storage_index(i)).collect())
    }

    /// Append `other` after `self`
    pub fn concatenate(&self, other: &Dataset) -> Result<Self> {
        if self.feature_shape != other.feature_shape {
            return Err(Error::Data(format!(
                "cannot concatenate datasets with shapes {:?} and {:?}",
                self.feature_shape, other.feature_shape
            )));
        }
        if Arc::ptr_eq(&self.storage, &other.storage) {
            let indices = (0..self.len())
                .map(|i| self.storage_index(i))
                .chain((0..other.len()).map(|i| other.storage_index(i)))
                .collect();
            return Ok(self.with_view(indices));
        }
        let examples = self.iter().chain(other.iter()).cloned().collect();
        Ok(Self {
            storage: Arc::new(examples),
            view: None,
            feature_shape: Arc::clone(&self.feature_shape),
        })
    }

    /// Keep the examples matching `pred`, preserving order
    pub fn filter<F>(&self, pred: F) -> Self
    where
        F: Fn(&Example) -> bool,
    {
        let indices = (0..self.len())
            .filter(|&i| pred(self.get(i)))
            .map(|i| self.storage_index(i))
            .collect();
        self.with_view(indices)
    }

    /// Examples of a single class, in dataset order
    pub fn filter_class(&self, class: usize) -> Self {
        self.filter(|e| e.label == class)
    }

    /// Drop the first `n` examples
    pub fn skip(&self, n: usize) -> Self {
        let indices = (n.min(self.len())..self.len()).map(|i| self.storage_index(i)).collect();
        self.with_view(indices)
    }

    /// Keep the first `n` examples
    pub fn take(&self, n: usize) -> Self {
        let indices = (0..n.min(self.len())).map(|i| self.storage_index(i)).collect();
        self.with_view(indices)
    }

    /// Map every label through `f`, dropping examples mapped to `None`
    pub fn relabel<F>(&self, f: F) -> Self
    where
        F: Fn(usize) -> Option<usize>,
    {
        let examples = self
            .iter()
            .filter_map(|e| f(e.label).map(|label| Example::new(e.input.clone(), label)))
            .collect();
        Self {
            storage: Arc::new(examples),
            view: None,
            feature_shape: Arc::clone(&self.feature_shape),
        }
    }

    /// Compact an index view into contiguous storage
    pub fn cache(&self) -> Self {
        if self.view.is_none() {
            return self.clone();
        }
        Self {
            storage: Arc::new(self.iter().cloned().collect()),
            view: None,
            feature_shape: Arc::clone(&self.feature_shape),
        }
    }

    /// Flatten every example into one row of a feature matrix
    pub fn to_matrix(&self) -> (Array2<f32>, Vec<usize>) {
        let dim = self.feature_dim();
        let mut x = Array2::zeros((self.len(), dim));
        for (mut row, e) in x.axis_iter_mut(Axis(0)).zip(self.iter()) {
            row.assign(&e.input);
        }
        (x, self.labels())
    }

    /// Stack the inputs of the given positions into a matrix
    pub fn gather_inputs(&self, positions: &[usize]) -> Array2<f32> {
        let views: Vec<ArrayView1<'_, f32>> =
            positions.iter().map(|&i| self.get(i).input.view()).collect();
        stack_rows(&views, self.feature_dim())
    }
}

/// Stack 1-D views as rows of a matrix with `dim` columns
fn stack_rows(rows: &[ArrayView1<'_, f32>], dim: usize) -> Array2<f32> {
    let mut out = Array2::zeros((rows.len(), dim));
    for (mut dst, src) in out.axis_iter_mut(Axis(0)).zip(rows.iter()) {
        dst.assign(src);
    }
    out
}
