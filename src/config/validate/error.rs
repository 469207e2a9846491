//! Validation error types
//!
//! Defines all validation error variants for incremental run specifications.

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid learning rate: {0} (must be > 0.0 and <= 1.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid batch size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid learning rate decay factor: {0} (must be in (0.0, 1.0])")]
    InvalidLrGamma(f32),

    #[error("Learning rate milestones must be strictly increasing: {0:?}")]
    UnorderedMilestones(Vec<usize>),

    #[error("Invalid class split: base_classes={base}, increment={increment} (both must be > 0)")]
    InvalidClassSplit { base: usize, increment: usize },

    #[error("Base classes ({base}) exceed the number of classes in the dataset ({total})")]
    TooFewClasses { base: usize, total: usize },

    #[error("Invalid synthetic data option: {0}")]
    InvalidSyntheticData(String),

    #[error("Invalid feature shape {0:?}")]
    InvalidFeatureShape(Vec<usize>),

    #[error("Random flip needs a [h, w, c] feature shape")]
    FlipNeedsImageShape,

    #[error("Invalid distillation temperature: {0} (must be > 0.0)")]
    InvalidTemperature(f32),

    #[error("Invalid distillation weight: {0} (must be >= 0.0)")]
    InvalidDistillWeight(f32),

    #[error("Invalid held-out exemplar ratio: {0} (must be in [0.0, 1.0))")]
    InvalidHoldoutRatio(f32),

    #[error("Invalid memory budget: {0} (must be > 0 with episodic memory)")]
    InvalidMemoryBudget(usize),

    #[error("Bias rectification '{0}' operates on rehearsal exemplars and needs memory_type: episodic")]
    RequiresEpisodicMemory(String),

    #[error("Embedding evaluation needs memory_type: episodic")]
    EmbeddingNeedsMemory,
}
