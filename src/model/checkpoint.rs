//! Stage checkpoints
//!
//! A checkpoint folder holds `final.safetensors` (the weights) and
//! `final.index` (a JSON listing of the stored tensors). The index is written
//! last, so its presence marks a complete checkpoint.

use super::Classifier;
use crate::error::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const WEIGHTS_FILE: &str = "final.safetensors";
const INDEX_FILE: &str = "final.index";

/// Shape entry of one stored tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub name: String,
    pub shape: [usize; 2],
}

/// Contents of `final.index`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub num_classes: usize,
    pub tensors: Vec<TensorEntry>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Whether `dir` holds a complete checkpoint
pub fn index_exists(dir: &Path) -> bool {
    dir.join(INDEX_FILE).is_file()
}

/// Write the model weights to `dir`, creating it if needed
pub fn save_weights(
    model: &dyn Classifier,
    dir: &Path,
    metadata: HashMap<String, String>,
) -> Result<CheckpointIndex> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Io(format!("Failed to create {}: {e}", dir.display())))?;

    let params = model.params();
    let tensor_data: Vec<(String, Vec<u8>, [usize; 2])> = params
        .iter()
        .map(|p| {
            let values: Vec<f32> = p.value.iter().copied().collect();
            (p.name().to_string(), bytemuck::cast_slice(&values).to_vec(), p.shape())
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            safetensors::tensor::TensorView::new(
                safetensors::tensor::Dtype::F32,
                shape.to_vec(),
                bytes,
            )
            .map(|view| (name.as_str(), view))
            .map_err(|e| Error::Serialization(format!("Invalid tensor {name}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let bytes = safetensors::serialize(views, &Some(metadata.clone()))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    std::fs::write(dir.join(WEIGHTS_FILE), bytes)?;

    let index = CheckpointIndex {
        num_classes: model.num_classes(),
        tensors: tensor_data
            .iter()
            .map(|(name, _, shape)| TensorEntry { name: name.clone(), shape: *shape })
            .collect(),
        metadata,
    };
    std::fs::write(dir.join(INDEX_FILE), serde_json::to_string_pretty(&index)?)?;

    tracing::debug!(dir = %dir.display(), tensors = index.tensors.len(), "checkpoint saved");
    Ok(index)
}

/// Load weights from `dir` into `model`
///
/// Every parameter of the model must be present with an identical shape.
pub fn load_weights(model: &mut dyn Classifier, dir: &Path) -> Result<CheckpointIndex> {
    let index_path = dir.join(INDEX_FILE);
    let index_json = std::fs::read_to_string(&index_path)
        .map_err(|e| Error::Io(format!("Failed to read {}: {e}", index_path.display())))?;
    let index: CheckpointIndex = serde_json::from_str(&index_json)?;

    if index.num_classes != model.num_classes() {
        return Err(Error::Checkpoint(format!(
            "checkpoint {} has {} classes, model has {}",
            dir.display(),
            index.num_classes,
            model.num_classes()
        )));
    }

    let weights_path = dir.join(WEIGHTS_FILE);
    let data = std::fs::read(&weights_path)
        .map_err(|e| Error::Io(format!("Failed to read {}: {e}", weights_path.display())))?;
    let tensors = safetensors::SafeTensors::deserialize(&data)
        .map_err(|e| Error::Serialization(format!("Failed to deserialize checkpoint: {e}")))?;

    for param in model.params_mut() {
        let view = tensors.tensor(param.name()).map_err(|e| {
            Error::Checkpoint(format!("missing tensor {} in {}: {e}", param.name(), dir.display()))
        })?;
        let shape = view.shape();
        if shape != param.shape() {
            return Err(Error::Checkpoint(format!(
                "tensor {} has shape {shape:?}, model expects {:?}",
                param.name(),
                param.shape()
            )));
        }
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        let value = Array2::from_shape_vec((shape[0], shape[1]), values)
            .map_err(|e| Error::Checkpoint(format!("tensor {}: {e}", param.name())))?;
        param.replace(value);
        param.zero_grad();
    }

    tracing::debug!(dir = %dir.display(), "checkpoint loaded");
    Ok(index)
}

/// Total size in bytes of the files under `dir` (0 when absent)
pub fn folder_size(dir: &Path) -> Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() { folder_size(&entry.path())? } else { meta.len() };
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MlpClassifier;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn model(seed: u64, classes: usize) -> MlpClassifier {
        MlpClassifier::new(3, 4, classes, 0.0, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_round_trip_reproduces_logits() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("1st_stage");
        let trained = model(1, 5);
        assert!(!index_exists(&dir));
        save_weights(&trained, &dir, HashMap::new()).unwrap();
        assert!(index_exists(&dir));

        let mut restored = model(2, 5);
        load_weights(&mut restored, &dir).unwrap();
        let x = array![[0.2, -0.4, 1.1], [3.0, 0.0, -2.0]];
        assert_eq!(trained.forward(&x), restored.forward(&x));
    }

    #[test]
    fn test_class_count_mismatch_is_checkpoint_error() {
        let tmp = TempDir::new().unwrap();
        save_weights(&model(1, 5), tmp.path(), HashMap::new()).unwrap();
        let err = load_weights(&mut model(1, 6), tmp.path()).unwrap_err();
        assert!(matches!(err, Error::Checkpoint(_)));
    }

    #[test]
    fn test_metadata_is_kept() {
        let tmp = TempDir::new().unwrap();
        let mut meta = HashMap::new();
        meta.insert("group".to_string(), "2".to_string());
        save_weights(&model(1, 2), tmp.path(), meta).unwrap();
        let index = load_weights(&mut model(3, 2), tmp.path()).unwrap();
        assert_eq!(index.metadata.get("group").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_folder_size() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(folder_size(&tmp.path().join("absent")).unwrap(), 0);
        save_weights(&model(1, 2), tmp.path(), HashMap::new()).unwrap();
        assert!(folder_size(tmp.path()).unwrap() > 0);
    }
}
