//! Training-time input augmentation

use crate::config::AugmentSpec;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::Rng;
use std::f32::consts::PI;
use std::fmt;

/// Per-example input transform applied by the pipeline's `map` stage
pub trait Augment: Send + Sync {
    /// Transform one flattened input in place
    fn apply(&self, input: &mut Array1<f32>, shape: &[usize], rng: &mut StdRng);

    /// Name of the augmentation
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn Augment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Augment({})", self.name())
    }
}

/// Draw one standard normal sample (Box-Muller)
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    let u1: f32 = rng.random::<f32>().max(1e-10);
    let u2: f32 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Additive Gaussian noise
#[derive(Debug, Clone)]
pub struct GaussianNoise {
    std: f32,
}

impl GaussianNoise {
    pub fn new(std: f32) -> Self {
        Self { std }
    }
}

impl Augment for GaussianNoise {
    fn apply(&self, input: &mut Array1<f32>, _shape: &[usize], rng: &mut StdRng) {
        input.mapv_inplace(|v| v + self.std * standard_normal(rng));
    }

    fn name(&self) -> &str {
        "GaussianNoise"
    }
}

/// Horizontal flip of `[h, w, c]` inputs with probability one half
#[derive(Debug, Clone, Default)]
pub struct RandomFlip;

impl Augment for RandomFlip {
    fn apply(&self, input: &mut Array1<f32>, shape: &[usize], rng: &mut StdRng) {
        let [h, w, c] = match shape {
            [h, w, c] => [*h, *w, *c],
            _ => return,
        };
        if !rng.random_bool(0.5) {
            return;
        }
        for y in 0..h {
            for x in 0..w / 2 {
                let mirror = w - 1 - x;
                for ch in 0..c {
                    input.swap((y * w + x) * c + ch, (y * w + mirror) * c + ch);
                }
            }
        }
    }

    fn name(&self) -> &str {
        "RandomFlip"
    }
}

/// Apply several augmentations in order
pub struct Compose {
    steps: Vec<Box<dyn Augment>>,
}

impl Compose {
    pub fn new(steps: Vec<Box<dyn Augment>>) -> Self {
        Self { steps }
    }

    /// Augmentations enabled by `spec`, in the order noise then flip
    pub fn from_spec(spec: &AugmentSpec) -> Self {
        let mut steps: Vec<Box<dyn Augment>> = Vec::new();
        if spec.noise_std > 0.0 {
            steps.push(Box::new(GaussianNoise::new(spec.noise_std)));
        }
        if spec.flip {
            steps.push(Box::new(RandomFlip));
        }
        Self::new(steps)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Augment for Compose {
    fn apply(&self, input: &mut Array1<f32>, shape: &[usize], rng: &mut StdRng) {
        for step in &self.steps {
            step.apply(input, shape, rng);
        }
    }

    fn name(&self) -> &str {
        "Compose"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_noise_changes_values_but_keeps_length() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut x = array![1.0, 2.0, 3.0];
        GaussianNoise::new(0.5).apply(&mut x, &[3], &mut rng);
        assert_eq!(x.len(), 3);
        assert!(x.iter().zip([1.0, 2.0, 3.0]).any(|(a, b)| (*a - b).abs() > 1e-6));
    }

    #[test]
    fn test_zero_noise_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut x = array![1.0, 2.0];
        GaussianNoise::new(0.0).apply(&mut x, &[2], &mut rng);
        assert_eq!(x, array![1.0, 2.0]);
    }

    #[test]
    fn test_flip_is_mirror_or_identity() {
        // 1 x 3 x 1 image
        let original = array![1.0, 2.0, 3.0];
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            let mut x = original.clone();
            RandomFlip.apply(&mut x, &[1, 3, 1], &mut rng);
            assert!(x == original || x == array![3.0, 2.0, 1.0]);
        }
    }

    #[test]
    fn test_flip_ignores_flat_inputs() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut x = array![1.0, 2.0, 3.0];
        for _ in 0..10 {
            RandomFlip.apply(&mut x, &[3], &mut rng);
        }
        assert_eq!(x, array![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<f32> = (0..20_000).map(|_| standard_normal(&mut rng)).collect();
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / samples.len() as f32;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_from_spec_selects_steps() {
        let none = Compose::from_spec(&AugmentSpec { noise_std: 0.0, flip: false });
        assert!(none.is_empty());
        let both = Compose::from_spec(&AugmentSpec { noise_std: 0.1, flip: true });
        assert_eq!(both.steps.iter().map(|s| s.name()).collect::<Vec<_>>(), ["GaussianNoise", "RandomFlip"]);
    }
}
