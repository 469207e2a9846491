//! Configuration validation logic
//!
//! Rejects unsupported option combinations up front so that a stage never
//! fails halfway on a configuration problem.

use super::error::ValidationError;
use crate::config::schema::{BiasRect, DataSource, IncrementalSpec, MemoryType};

/// Validate an incremental run specification
///
/// Checks:
/// - Numeric values are in valid ranges
/// - The class split fits the data source
/// - Strategies that need rehearsal exemplars have episodic memory
pub fn validate_config(spec: &IncrementalSpec) -> Result<(), ValidationError> {
    if spec.data.batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize(spec.data.batch_size));
    }

    let lr = spec.optimizer.base_lr;
    if lr <= 0.0 || lr > 1.0 || !lr.is_finite() {
        return Err(ValidationError::InvalidLearningRate(lr));
    }

    if spec.training.epochs == 0 {
        return Err(ValidationError::InvalidEpochs(spec.training.epochs));
    }
    if let Some(0) = spec.training.base_epochs {
        return Err(ValidationError::InvalidEpochs(0));
    }

    let gamma = spec.training.lr_gamma;
    if gamma <= 0.0 || gamma > 1.0 {
        return Err(ValidationError::InvalidLrGamma(gamma));
    }

    check_milestones(&spec.training.lr_milestones)?;
    if let Some(milestones) = &spec.training.base_lr_milestones {
        check_milestones(milestones)?;
    }

    if spec.data.base_classes == 0 || spec.data.increment == 0 {
        return Err(ValidationError::InvalidClassSplit {
            base: spec.data.base_classes,
            increment: spec.data.increment,
        });
    }

    if let DataSource::Synthetic {
        num_classes,
        train_per_class,
        test_per_class,
        feature_dim,
        spread,
    } = &spec.data.source
    {
        if *num_classes < spec.data.base_classes {
            return Err(ValidationError::TooFewClasses {
                base: spec.data.base_classes,
                total: *num_classes,
            });
        }
        if *train_per_class == 0 || *test_per_class == 0 {
            return Err(ValidationError::InvalidSyntheticData(
                "train_per_class and test_per_class must be > 0".to_string(),
            ));
        }
        if *feature_dim == 0 {
            return Err(ValidationError::InvalidSyntheticData(
                "feature_dim must be > 0".to_string(),
            ));
        }
        if *spread < 0.0 {
            return Err(ValidationError::InvalidSyntheticData(format!(
                "spread must be >= 0.0, got {spread}"
            )));
        }
        if let Some(shape) = &spec.data.feature_shape {
            if shape.iter().product::<usize>() != *feature_dim {
                return Err(ValidationError::InvalidFeatureShape(shape.clone()));
            }
        }
    }

    if let Some(shape) = &spec.data.feature_shape {
        if shape.is_empty() || shape.contains(&0) {
            return Err(ValidationError::InvalidFeatureShape(shape.clone()));
        }
    }
    if spec.data.augment.flip && !matches!(spec.data.feature_shape.as_deref(), Some([_, _, _])) {
        return Err(ValidationError::FlipNeedsImageShape);
    }

    let temp = spec.distillation.lwf_loss_temp;
    if temp <= 0.0 || !temp.is_finite() {
        return Err(ValidationError::InvalidTemperature(temp));
    }
    if spec.distillation.reg_loss_weight < 0.0 {
        return Err(ValidationError::InvalidDistillWeight(spec.distillation.reg_loss_weight));
    }

    let ratio = spec.rectification.val_exemplars_ratio;
    if !(0.0..1.0).contains(&ratio) {
        return Err(ValidationError::InvalidHoldoutRatio(ratio));
    }

    let bias_rect = spec.rectification.bias_rect;
    match spec.memory.memory_type {
        MemoryType::Episodic => {
            if spec.memory.budget == 0 {
                return Err(ValidationError::InvalidMemoryBudget(spec.memory.budget));
            }
        }
        MemoryType::None => {
            if bias_rect.is_resampling()
                || matches!(bias_rect, BiasRect::Bic | BiasRect::Undersampling)
            {
                return Err(ValidationError::RequiresEpisodicMemory(bias_rect.to_string()));
            }
            if spec.evaluation.embedding {
                return Err(ValidationError::EmbeddingNeedsMemory);
            }
        }
    }

    Ok(())
}

fn check_milestones(milestones: &[usize]) -> Result<(), ValidationError> {
    if milestones.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ValidationError::UnorderedMilestones(milestones.to_vec()));
    }
    Ok(())
}
