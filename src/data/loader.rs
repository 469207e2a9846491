//! Dataset loaders: JSON example files and seeded synthetic blobs

use super::augment::standard_normal;
use super::dataset::{Dataset, Example};
use crate::error::{Error, Result};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
struct RawExample {
    input: Vec<f32>,
    label: usize,
}

#[derive(Deserialize)]
struct DataFile {
    examples: Vec<RawExample>,
}

/// Load labelled examples from a JSON file
///
/// Accepts `{"examples": [{"input": [...], "label": n}]}` or a bare array of
/// the same objects. Every input must have `product(feature_shape)` values;
/// without a shape, the width of the first example is used.
pub fn load_json_dataset(path: &Path, feature_shape: Option<&[usize]>) -> Result<Dataset> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("Failed to read JSON {}: {e}", path.display())))?;

    let raw = match serde_json::from_str::<DataFile>(&content) {
        Ok(file) => file.examples,
        Err(_) => serde_json::from_str::<Vec<RawExample>>(&content).map_err(|e| {
            Error::Serialization(format!("Unrecognized example file {}: {e}", path.display()))
        })?,
    };

    let shape = match feature_shape {
        Some(shape) => shape.to_vec(),
        None => vec![raw.first().map_or(0, |ex| ex.input.len())],
    };
    let examples = raw.into_iter().map(|ex| Example::new(Array1::from(ex.input), ex.label)).collect();

    let dataset = Dataset::new(examples, shape)?;
    tracing::debug!(path = %path.display(), examples = dataset.len(), "loaded JSON dataset");
    Ok(dataset)
}

/// Parameters of the synthetic Gaussian-blob generator
#[derive(Debug, Clone, Copy)]
pub struct SyntheticBlobs {
    pub num_classes: usize,
    pub train_per_class: usize,
    pub test_per_class: usize,
    pub feature_dim: usize,
    /// Standard deviation of every blob around its center
    pub spread: f32,
}

impl SyntheticBlobs {
    /// Generate `(train, test)` sets, one isotropic blob per class
    ///
    /// Centers are drawn once, so train and test share the class structure.
    /// Examples are emitted class by class.
    pub fn generate(&self, seed: u64, feature_shape: Option<&[usize]>) -> Result<(Dataset, Dataset)> {
        let shape = feature_shape.map_or_else(|| vec![self.feature_dim], <[usize]>::to_vec);
        if shape.iter().product::<usize>() != self.feature_dim {
            return Err(Error::Data(format!(
                "feature shape {shape:?} does not hold {} features",
                self.feature_dim
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let centers: Vec<Array1<f32>> = (0..self.num_classes)
            .map(|_| Array1::from_shape_fn(self.feature_dim, |_| 2.0 * standard_normal(&mut rng)))
            .collect();

        let sample = |count: usize, rng: &mut StdRng| -> Vec<Example> {
            centers
                .iter()
                .enumerate()
                .flat_map(|(label, center)| {
                    (0..count)
                        .map(|_| {
                            let noise = Array1::from_shape_fn(self.feature_dim, |_| {
                                self.spread * standard_normal(rng)
                            });
                            Example::new(center + &noise, label)
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        let train = sample(self.train_per_class, &mut rng);
        let test = sample(self.test_per_class, &mut rng);
        Ok((Dataset::new(train, shape.clone())?, Dataset::new(test, shape)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_structured_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"examples": [{{"input": [1.0, 2.0], "label": 0}}, {{"input": [3.0, 4.0], "label": 1}}]}}"#
        )
        .unwrap();
        let ds = load_json_dataset(file.path(), None).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.feature_dim(), 2);
        assert_eq!(ds.labels(), vec![0, 1]);
    }

    #[test]
    fn test_load_bare_array() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"input": [0.5], "label": 3}}]"#).unwrap();
        let ds = load_json_dataset(file.path(), None).unwrap();
        assert_eq!(ds.get(0).label, 3);
    }

    #[test]
    fn test_load_rejects_ragged_inputs() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"input": [0.5], "label": 0}}, {{"input": [1.0, 2.0], "label": 1}}]"#)
            .unwrap();
        assert!(load_json_dataset(file.path(), None).is_err());
    }

    #[test]
    fn test_load_garbage_is_serialization_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_json_dataset(file.path(), None).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_json_dataset(Path::new("/nonexistent/data.json"), None).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_synthetic_counts_and_determinism() {
        let blobs = SyntheticBlobs {
            num_classes: 4,
            train_per_class: 10,
            test_per_class: 3,
            feature_dim: 5,
            spread: 0.1,
        };
        let (train, test) = blobs.generate(7, None).unwrap();
        assert_eq!(train.len(), 40);
        assert_eq!(test.len(), 12);
        assert_eq!(train.class_counts().get(&3), Some(&10));

        let (again, _) = blobs.generate(7, None).unwrap();
        assert_eq!(train.get(17).input, again.get(17).input);
    }

    #[test]
    fn test_synthetic_shape_must_match_dim() {
        let blobs = SyntheticBlobs {
            num_classes: 2,
            train_per_class: 1,
            test_per_class: 1,
            feature_dim: 12,
            spread: 0.1,
        };
        assert!(blobs.generate(0, Some(&[2, 2, 3])).is_ok());
        assert!(blobs.generate(0, Some(&[2, 2, 2])).is_err());
    }
}
