//! Classifier interface and the reference MLP
//!
//! The incremental loop only talks to [`Classifier`]. Logits are always
//! ordered by incremental class index: old classes first, then the classes
//! added by [`Classifier::grow_classes`].

mod checkpoint;
mod mlp;
mod param;

pub use checkpoint::{folder_size, index_exists, load_weights, save_weights, CheckpointIndex};
pub use mlp::MlpClassifier;
pub use param::Param;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use std::ops::Range;

/// Trainable classifier with an output head that can grow
pub trait Classifier: Send + std::fmt::Debug {
    /// Current number of output classes
    fn num_classes(&self) -> usize;

    /// Flattened input width
    fn input_dim(&self) -> usize;

    /// Logits `[batch, num_classes]`
    fn forward(&self, inputs: &Array2<f32>) -> Array2<f32>;

    /// Penultimate features `[batch, embed_dim]`
    fn embed(&self, inputs: &Array2<f32>) -> Array2<f32>;

    /// Accumulate parameter gradients for `d loss / d logits`
    fn backward(&mut self, inputs: &Array2<f32>, grad_logits: &Array2<f32>);

    /// Intrinsic penalty of the model (weight decay)
    fn regularization_loss(&self) -> f32;

    /// Accumulate gradients of [`Classifier::regularization_loss`]
    fn regularization_backward(&mut self);

    fn params(&self) -> Vec<&Param>;

    fn params_mut(&mut self) -> Vec<&mut Param>;

    /// Append `n` freshly initialized classes to the head
    fn grow_classes(&mut self, n: usize, rng: &mut StdRng);

    /// L2 norm of every class weight vector of the head
    fn head_norms(&self) -> Array1<f32>;

    /// Fold `scale * z + shift` into the logits of `classes`
    fn rescale_head(&mut self, classes: Range<usize>, scale: f32, shift: f32);

    /// Owned copy, used as the frozen previous-stage model
    fn box_clone(&self) -> Box<dyn Classifier>;

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }
}

impl Clone for Box<dyn Classifier> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
