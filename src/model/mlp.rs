//! Reference multilayer perceptron classifier

use super::param::Param;
use super::Classifier;
use crate::data::standard_normal;
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use std::ops::Range;

/// Optional ReLU hidden layer followed by a linear head
///
/// With `hidden == 0` the classifier is a linear model on the raw inputs and
/// its embedding is the input itself.
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    input_dim: usize,
    hidden: Option<(Param, Param)>,
    head_weight: Param,
    head_bias: Param,
    weight_decay: f32,
}

fn he_normal(rows: usize, cols: usize, fan_in: usize, rng: &mut StdRng) -> Array2<f32> {
    let std = (2.0 / fan_in.max(1) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| std * standard_normal(rng))
}

fn relu(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| v.max(0.0))
}

impl MlpClassifier {
    /// New classifier with `num_classes` outputs
    pub fn new(
        input_dim: usize,
        hidden: usize,
        num_classes: usize,
        weight_decay: f32,
        rng: &mut StdRng,
    ) -> Self {
        let hidden_layer = (hidden > 0).then(|| {
            (
                Param::new("hidden.weight", he_normal(input_dim, hidden, input_dim, rng)),
                Param::new("hidden.bias", Array2::zeros((1, hidden))),
            )
        });
        let embed_dim = if hidden > 0 { hidden } else { input_dim };
        Self {
            input_dim,
            hidden: hidden_layer,
            head_weight: Param::new(
                "head.weight",
                he_normal(embed_dim, num_classes, embed_dim, rng),
            ),
            head_bias: Param::new("head.bias", Array2::zeros((1, num_classes))),
            weight_decay,
        }
    }

    pub fn embed_dim(&self) -> usize {
        self.head_weight.value.nrows()
    }

    fn pre_activation(&self, inputs: &Array2<f32>) -> Option<Array2<f32>> {
        self.hidden.as_ref().map(|(w, b)| inputs.dot(&w.value) + &b.value)
    }

    fn weight_matrices(&self) -> impl Iterator<Item = &Param> + '_ {
        self.hidden.iter().map(|(w, _)| w).chain(std::iter::once(&self.head_weight))
    }
}

impl Classifier for MlpClassifier {
    fn num_classes(&self) -> usize {
        self.head_weight.value.ncols()
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn forward(&self, inputs: &Array2<f32>) -> Array2<f32> {
        self.embed(inputs).dot(&self.head_weight.value) + &self.head_bias.value
    }

    fn embed(&self, inputs: &Array2<f32>) -> Array2<f32> {
        match self.pre_activation(inputs) {
            Some(pre) => relu(&pre),
            None => inputs.clone(),
        }
    }

    fn backward(&mut self, inputs: &Array2<f32>, grad_logits: &Array2<f32>) {
        let pre = self.pre_activation(inputs);
        let features = match &pre {
            Some(pre) => relu(pre),
            None => inputs.clone(),
        };

        self.head_weight.grad += &features.t().dot(grad_logits);
        self.head_bias.grad += &grad_logits.sum_axis(Axis(0)).insert_axis(Axis(0));

        if let (Some(pre), Some((w, b))) = (pre, self.hidden.as_mut()) {
            let mut grad_hidden = grad_logits.dot(&self.head_weight.value.t());
            grad_hidden.zip_mut_with(&pre, |g, &z| {
                if z <= 0.0 {
                    *g = 0.0;
                }
            });
            w.grad += &inputs.t().dot(&grad_hidden);
            b.grad += &grad_hidden.sum_axis(Axis(0)).insert_axis(Axis(0));
        }
    }

    fn regularization_loss(&self) -> f32 {
        self.weight_decay
            * self.weight_matrices().map(|p| p.value.iter().map(|v| v * v).sum::<f32>()).sum::<f32>()
    }

    fn regularization_backward(&mut self) {
        if self.weight_decay == 0.0 {
            return;
        }
        let scale = 2.0 * self.weight_decay;
        if let Some((w, _)) = self.hidden.as_mut() {
            w.grad.scaled_add(scale, &w.value);
        }
        let head = &mut self.head_weight;
        head.grad.scaled_add(scale, &head.value);
    }

    fn params(&self) -> Vec<&Param> {
        let mut out = Vec::with_capacity(4);
        if let Some((w, b)) = &self.hidden {
            out.push(w);
            out.push(b);
        }
        out.push(&self.head_weight);
        out.push(&self.head_bias);
        out
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut out = Vec::with_capacity(4);
        if let Some((w, b)) = &mut self.hidden {
            out.push(w);
            out.push(b);
        }
        out.push(&mut self.head_weight);
        out.push(&mut self.head_bias);
        out
    }

    fn grow_classes(&mut self, n: usize, rng: &mut StdRng) {
        if n == 0 {
            return;
        }
        let embed_dim = self.embed_dim();
        let new_w = he_normal(embed_dim, n, embed_dim, rng);
        let weight = concatenate![Axis(1), self.head_weight.value, new_w];
        let bias = concatenate![Axis(1), self.head_bias.value, Array2::<f32>::zeros((1, n))];
        self.head_weight.replace(weight);
        self.head_bias.replace(bias);
    }

    fn head_norms(&self) -> Array1<f32> {
        self.head_weight
            .value
            .axis_iter(Axis(1))
            .map(|col| col.iter().map(|v| v * v).sum::<f32>().sqrt())
            .collect()
    }

    fn rescale_head(&mut self, classes: Range<usize>, scale: f32, shift: f32) {
        let end = classes.end.min(self.num_classes());
        for c in classes.start..end {
            self.head_weight.value.column_mut(c).mapv_inplace(|v| v * scale);
            let b = &mut self.head_bias.value[[0, c]];
            *b = *b * scale + shift;
        }
    }

    fn box_clone(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}
