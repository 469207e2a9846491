//! Named trainable parameters

use ndarray::Array2;

/// A trainable matrix with its accumulated gradient
///
/// Biases are stored as `[1, n]` rows so every parameter shares one shape
/// type.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    pub value: Array2<f32>,
    pub grad: Array2<f32>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: Array2<f32>) -> Self {
        let grad = Array2::zeros(value.raw_dim());
        Self { name: name.into(), value, grad }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.value.nrows(), self.value.ncols()]
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Replace the value, resizing the gradient to match
    pub fn replace(&mut self, value: Array2<f32>) {
        if value.raw_dim() != self.grad.raw_dim() {
            self.grad = Array2::zeros(value.raw_dim());
        }
        self.value = value;
    }

    /// Global L2 norm of the gradient
    pub fn grad_norm(&self) -> f32 {
        self.grad.iter().map(|g| g * g).sum::<f32>().sqrt()
    }
}
