//! YAML schema for class-incremental training runs
//!
//! Every string-keyed choice (memory type, bias rectification, regularizer,
//! optimizer) is a serde enum, so an unknown name is rejected while the
//! config is parsed instead of deep inside a stage.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Deserialize a bool from either a YAML boolean (`true`) or a quoted string (`"true"`).
fn deserialize_bool_lenient<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Str(s) => match s.to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected 'true' or 'false', got '{other}'"
            ))),
        },
    }
}

/// Rehearsal memory strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Keep a bounded set of exemplars of old classes and replay them
    Episodic,
    /// Train on new-class data only
    #[default]
    None,
}

/// Bias rectification strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasRect {
    #[default]
    None,
    /// Inverse-frequency class weights in the classification loss
    Reweighting,
    Smote,
    Adasyn,
    RandomOversampling,
    /// Cluster-centroid undersampling
    Kmeans,
    /// Medoid exemplars per class on model embeddings
    Kmedoids,
    RandomUndersampling,
    #[serde(rename = "near_miss_1")]
    NearMiss1,
    #[serde(rename = "near_miss_2")]
    NearMiss2,
    #[serde(rename = "near_miss_3")]
    NearMiss3,
    SmoteTomek,
    SmoteEnn,
    /// Bias correction layer fitted on held-out exemplars
    Bic,
    /// Equalize new classes down to the old-class exemplar count
    Undersampling,
    /// Rescale new-class head weights by the old/new weight-norm ratio
    WeightAligningNoBias,
}

impl BiasRect {
    /// All recognized strategies
    pub const ALL: [BiasRect; 16] = [
        BiasRect::None,
        BiasRect::Reweighting,
        BiasRect::Smote,
        BiasRect::Adasyn,
        BiasRect::RandomOversampling,
        BiasRect::Kmeans,
        BiasRect::Kmedoids,
        BiasRect::RandomUndersampling,
        BiasRect::NearMiss1,
        BiasRect::NearMiss2,
        BiasRect::NearMiss3,
        BiasRect::SmoteTomek,
        BiasRect::SmoteEnn,
        BiasRect::Bic,
        BiasRect::Undersampling,
        BiasRect::WeightAligningNoBias,
    ];

    /// Config name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasRect::None => "none",
            BiasRect::Reweighting => "reweighting",
            BiasRect::Smote => "smote",
            BiasRect::Adasyn => "adasyn",
            BiasRect::RandomOversampling => "random_oversampling",
            BiasRect::Kmeans => "kmeans",
            BiasRect::Kmedoids => "kmedoids",
            BiasRect::RandomUndersampling => "random_undersampling",
            BiasRect::NearMiss1 => "near_miss_1",
            BiasRect::NearMiss2 => "near_miss_2",
            BiasRect::NearMiss3 => "near_miss_3",
            BiasRect::SmoteTomek => "smote_tomek",
            BiasRect::SmoteEnn => "smote_enn",
            BiasRect::Bic => "bic",
            BiasRect::Undersampling => "undersampling",
            BiasRect::WeightAligningNoBias => "weight_aligning_no_bias",
        }
    }

    /// Strategies that rebuild the mixed training set through a resampler
    pub fn is_resampling(&self) -> bool {
        matches!(
            self,
            BiasRect::Smote
                | BiasRect::Adasyn
                | BiasRect::RandomOversampling
                | BiasRect::Kmeans
                | BiasRect::Kmedoids
                | BiasRect::RandomUndersampling
                | BiasRect::NearMiss1
                | BiasRect::NearMiss2
                | BiasRect::NearMiss3
                | BiasRect::SmoteTomek
                | BiasRect::SmoteEnn
        )
    }

    /// Strategy reserves a ratio of exemplars as a held-out set
    pub fn uses_holdout(&self) -> bool {
        matches!(self, BiasRect::Bic)
    }

    /// Strategy consumes the old/new head-norm calibration factor
    pub fn uses_norm_calibration(&self) -> bool {
        matches!(self, BiasRect::WeightAligningNoBias)
    }
}

impl fmt::Display for BiasRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BiasRect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_lowercase();
        BiasRect::ALL.iter().copied().find(|b| b.as_str() == name).ok_or_else(|| {
            let valid: Vec<&str> = BiasRect::ALL.iter().map(BiasRect::as_str).collect();
            format!("Unknown bias rectification: {s}. Valid: {}", valid.join(", "))
        })
    }
}

/// Regularization applied on top of the classification loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegType {
    #[default]
    None,
    /// Learning without forgetting (distillation against the previous stage)
    Lwf,
}

/// Optimizer choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            _ => Err(format!("Unknown optimizer: {s}. Supported: adam, sgd")),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Sgd => write!(f, "sgd"),
        }
    }
}

/// Exemplar selection policy of the episodic memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemplarSelection {
    /// iCaRL herding: greedily match the class mean in embedding space
    #[default]
    Herding,
    Random,
}

/// Complete specification of an incremental run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncrementalSpec {
    /// Data source and class split
    #[serde(default)]
    pub data: DataSpec,

    /// Reference classifier
    #[serde(default)]
    pub model: ModelSpec,

    /// Optimizer
    #[serde(default)]
    pub optimizer: OptimSpec,

    /// Epochs, schedule and stage bootstrapping
    #[serde(default)]
    pub training: TrainingParams,

    /// Rehearsal memory
    #[serde(default)]
    pub memory: MemorySpec,

    /// Class-imbalance correction
    #[serde(default)]
    pub rectification: RectificationSpec,

    /// Distillation against the previous stage
    #[serde(default)]
    pub distillation: DistillSpec,

    /// Post-stage evaluation
    #[serde(default)]
    pub evaluation: EvalSpec,

    /// Output layout
    #[serde(default)]
    pub output: OutputSpec,
}

/// Where examples come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// Seeded Gaussian blobs, one per class
    Synthetic {
        #[serde(default = "default_num_classes")]
        num_classes: usize,
        #[serde(default = "default_train_per_class")]
        train_per_class: usize,
        #[serde(default = "default_test_per_class")]
        test_per_class: usize,
        #[serde(default = "default_feature_dim")]
        feature_dim: usize,
        #[serde(default = "default_spread")]
        spread: f32,
    },
    /// JSON files of `{input, label}` examples
    Json { train: PathBuf, test: PathBuf },
}

impl Default for DataSource {
    fn default() -> Self {
        DataSource::Synthetic {
            num_classes: default_num_classes(),
            train_per_class: default_train_per_class(),
            test_per_class: default_test_per_class(),
            feature_dim: default_feature_dim(),
            spread: default_spread(),
        }
    }
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSpec {
    /// Dataset name, used in the output folder layout
    #[serde(default = "default_dataset_name")]
    pub name: String,

    #[serde(default)]
    pub source: DataSource,

    /// Optional input shape (e.g. `[h, w, c]`); flat when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_shape: Option<Vec<usize>>,

    /// Classes in the first stage
    #[serde(default = "default_base_classes")]
    pub base_classes: usize,

    /// Classes added by every later stage
    #[serde(default = "default_increment")]
    pub increment: usize,

    /// Shuffle the class order with the run seed
    #[serde(default, deserialize_with = "deserialize_bool_lenient")]
    pub shuffle_classes: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches prepared ahead of the consumer
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Disable training-time augmentation
    #[serde(default, deserialize_with = "deserialize_bool_lenient")]
    pub no_aug: bool,

    #[serde(default)]
    pub augment: AugmentSpec,
}

impl Default for DataSpec {
    fn default() -> Self {
        Self {
            name: default_dataset_name(),
            source: DataSource::default(),
            feature_shape: None,
            base_classes: default_base_classes(),
            increment: default_increment(),
            shuffle_classes: false,
            batch_size: default_batch_size(),
            prefetch: default_prefetch(),
            no_aug: false,
            augment: AugmentSpec::default(),
        }
    }
}

/// Training-time augmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentSpec {
    /// Standard deviation of additive Gaussian noise (0 disables)
    pub noise_std: f32,
    /// Random horizontal flip, requires a `[h, w, c]` feature shape
    pub flip: bool,
}

impl Default for AugmentSpec {
    fn default() -> Self {
        Self { noise_std: 0.01, flip: false }
    }
}

/// Reference classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    /// Width of the hidden ReLU layer (0 for a linear classifier)
    pub hidden: usize,
    /// L2 penalty on weight matrices
    pub weight_decay: f32,
    /// Multi-label mode: sigmoid scores and binary cross-entropy
    #[serde(deserialize_with = "deserialize_bool_lenient")]
    pub sigmoid: bool,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self { hidden: 64, weight_decay: 1e-4, sigmoid: false }
    }
}

/// Optimizer specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimSpec {
    pub name: OptimizerKind,
    pub base_lr: f32,
    /// SGD momentum
    pub momentum: f32,
}

impl Default for OptimSpec {
    fn default() -> Self {
        Self { name: OptimizerKind::Adam, base_lr: 1e-3, momentum: 0.9 }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Epochs of every incremental stage
    pub epochs: usize,
    /// Epochs at which the learning rate is multiplied by `lr_gamma`
    pub lr_milestones: Vec<usize>,
    pub lr_gamma: f32,
    /// Epoch count of the first stage, when it differs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_epochs: Option<usize>,
    /// Milestones of the first stage, when they differ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_lr_milestones: Option<Vec<usize>>,
    pub seed: u64,
    /// Always train the first stage, even when a base checkpoint exists
    #[serde(deserialize_with = "deserialize_bool_lenient")]
    pub no_skip_base_training: bool,
    /// This run produces a base model for later bootstrapping
    #[serde(deserialize_with = "deserialize_bool_lenient")]
    pub base_model: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 30,
            lr_milestones: vec![20, 25],
            lr_gamma: 0.1,
            base_epochs: None,
            base_lr_milestones: None,
            seed: 1993,
            no_skip_base_training: false,
            base_model: false,
        }
    }
}

/// Rehearsal memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySpec {
    pub memory_type: MemoryType,
    /// Total exemplars kept across all seen classes
    pub budget: usize,
    pub selection: ExemplarSelection,
}

impl Default for MemorySpec {
    fn default() -> Self {
        Self { memory_type: MemoryType::None, budget: 2000, selection: ExemplarSelection::Herding }
    }
}

/// Class-imbalance correction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RectificationSpec {
    pub bias_rect: BiasRect,
    /// Fraction of exemplars per class held out for the bias correction layer
    pub val_exemplars_ratio: f32,
    /// Gradient steps of the bias correction fit
    pub bic_steps: usize,
    pub bic_lr: f32,
}

impl Default for RectificationSpec {
    fn default() -> Self {
        Self { bias_rect: BiasRect::None, val_exemplars_ratio: 0.1, bic_steps: 200, bic_lr: 0.01 }
    }
}

/// Distillation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillSpec {
    pub reg_type: RegType,
    /// Temperature of the softened old-model and current-model outputs
    pub lwf_loss_temp: f32,
    /// Weight of the distillation term
    pub reg_loss_weight: f32,
    /// Rescale classification and distillation terms by class proportions
    #[serde(deserialize_with = "deserialize_bool_lenient")]
    pub adjust_lwf_w: bool,
}

impl Default for DistillSpec {
    fn default() -> Self {
        Self { reg_type: RegType::None, lwf_loss_temp: 2.0, reg_loss_weight: 1.0, adjust_lwf_w: false }
    }
}

/// Evaluation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSpec {
    /// Post-rectification evaluation by nearest mean of exemplars
    #[serde(deserialize_with = "deserialize_bool_lenient")]
    pub embedding: bool,
}

/// Output layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    /// Root of the `result/<dataset>/base_<n>/seed_<s>/<params>` tree
    pub root: PathBuf,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self { root: PathBuf::from("result") }
    }
}

fn default_dataset_name() -> String {
    "synthetic".to_string()
}

fn default_num_classes() -> usize {
    20
}

fn default_train_per_class() -> usize {
    100
}

fn default_test_per_class() -> usize {
    20
}

fn default_feature_dim() -> usize {
    16
}

fn default_spread() -> f32 {
    0.5
}

fn default_base_classes() -> usize {
    10
}

fn default_increment() -> usize {
    10
}

fn default_batch_size() -> usize {
    128
}

fn default_prefetch() -> usize {
    2
}

impl IncrementalSpec {
    /// Dataset component of the output folder layout
    pub fn dataset_str(&self) -> String {
        self.data.name.clone()
    }

    /// Hyperparameter signature of the first stage.
    ///
    /// Two runs with equal signatures train identical base models, so one can
    /// bootstrap from the other's first-stage checkpoint.
    pub fn base_params_str(&self) -> String {
        let epochs = self.training.base_epochs.unwrap_or(self.training.epochs);
        format!(
            "{}_lr{}_bs{}_ep{}_h{}_wd{}{}{}",
            self.optimizer.name,
            self.optimizer.base_lr,
            self.data.batch_size,
            epochs,
            self.model.hidden,
            self.model.weight_decay,
            if self.model.sigmoid { "_sigmoid" } else { "" },
            if self.data.no_aug { "_noaug" } else { "" },
        )
    }

    /// Full hyperparameter signature of the run
    pub fn params_str(&self) -> String {
        let mut s = format!(
            "{}_mem-{}{}_rect-{}_reg-{}",
            self.base_params_str(),
            match self.memory.memory_type {
                MemoryType::Episodic => "episodic",
                MemoryType::None => "none",
            },
            match self.memory.memory_type {
                MemoryType::Episodic => format!("{}", self.memory.budget),
                MemoryType::None => String::new(),
            },
            self.rectification.bias_rect,
            match self.distillation.reg_type {
                RegType::Lwf => "lwf",
                RegType::None => "none",
            },
        );
        if self.distillation.reg_type == RegType::Lwf {
            s.push_str(&format!(
                "_t{}_w{}",
                self.distillation.lwf_loss_temp, self.distillation.reg_loss_weight
            ));
            if self.distillation.adjust_lwf_w {
                s.push_str("_adj");
            }
        }
        if self.rectification.bias_rect.uses_holdout() {
            s.push_str(&format!("_val{}", self.rectification.val_exemplars_ratio));
        }
        if self.evaluation.embedding {
            s.push_str("_nme");
        }
        s
    }

    /// Root of all artifacts of a run with this configuration
    ///
    /// Base-model runs are keyed by the first-stage signature only, which is
    /// where [`IncrementalSpec::base_run_dir`] looks for them.
    pub fn run_dir(&self) -> PathBuf {
        if self.training.base_model {
            self.base_run_dir()
        } else {
            self.base_dir().join(self.params_str())
        }
    }

    /// Run directory of the base model this run may bootstrap from
    pub fn base_run_dir(&self) -> PathBuf {
        self.base_dir().join(self.base_params_str())
    }

    /// `result/<dataset>/base_<n>/seed_<s>`
    pub fn base_dir(&self) -> PathBuf {
        self.output
            .root
            .join(self.dataset_str())
            .join(format!("base_{}", self.data.base_classes))
            .join(format!("seed_{}", self.training.seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let yaml = "data:\n  base_classes: 5\n  increment: 5\n";
        let spec: IncrementalSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.data.base_classes, 5);
        assert_eq!(spec.memory.memory_type, MemoryType::None);
        assert_eq!(spec.rectification.bias_rect, BiasRect::None);
        assert_eq!(spec.optimizer.name, OptimizerKind::Adam);
    }

    #[test]
    fn test_unknown_bias_rect_fails_at_parse_time() {
        let yaml = "rectification:\n  bias_rect: magic\n";
        let result: Result<IncrementalSpec, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_optimizer_fails_at_parse_time() {
        let yaml = "optimizer:\n  name: rmsprop\n";
        assert!(serde_yaml::from_str::<IncrementalSpec>(yaml).is_err());
    }

    #[test]
    fn test_unknown_reg_type_fails_at_parse_time() {
        let yaml = "distillation:\n  reg_type: ewc\n";
        assert!(serde_yaml::from_str::<IncrementalSpec>(yaml).is_err());
    }

    #[test]
    fn test_near_miss_names() {
        for (name, expected) in [
            ("near_miss_1", BiasRect::NearMiss1),
            ("near_miss_2", BiasRect::NearMiss2),
            ("near_miss_3", BiasRect::NearMiss3),
        ] {
            let yaml = format!("rectification:\n  bias_rect: {name}\n");
            let spec: IncrementalSpec = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(spec.rectification.bias_rect, expected);
        }
    }

    #[test]
    fn test_bias_rect_from_str_matches_serde_names() {
        for strategy in BiasRect::ALL {
            assert_eq!(strategy.as_str().parse::<BiasRect>().unwrap(), strategy);
            let yaml = serde_yaml::to_string(&strategy).unwrap();
            assert_eq!(yaml.trim(), strategy.as_str());
        }
        assert!("nope".parse::<BiasRect>().is_err());
    }

    #[test]
    fn test_resampling_classification() {
        assert!(BiasRect::Smote.is_resampling());
        assert!(BiasRect::NearMiss3.is_resampling());
        assert!(!BiasRect::Undersampling.is_resampling());
        assert!(!BiasRect::Bic.is_resampling());
        assert!(!BiasRect::Reweighting.is_resampling());
        assert!(BiasRect::Bic.uses_holdout());
        assert!(BiasRect::WeightAligningNoBias.uses_norm_calibration());
    }

    #[test]
    fn test_lenient_bools() {
        let yaml = "model:\n  sigmoid: \"true\"\ndata:\n  no_aug: \"false\"\n";
        let spec: IncrementalSpec = serde_yaml::from_str(yaml).unwrap();
        assert!(spec.model.sigmoid);
        assert!(!spec.data.no_aug);
    }

    #[test]
    fn test_json_source() {
        let yaml = "data:\n  source:\n    kind: json\n    train: a.json\n    test: b.json\n";
        let spec: IncrementalSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            spec.data.source,
            DataSource::Json { train: PathBuf::from("a.json"), test: PathBuf::from("b.json") }
        );
    }

    #[test]
    fn test_run_dir_layout() {
        let spec = IncrementalSpec::default();
        let dir = spec.run_dir();
        let s = dir.display().to_string();
        assert!(s.starts_with("result/synthetic/base_10/seed_1993/"));
        assert!(s.ends_with(&spec.params_str()));
    }

    #[test]
    fn test_base_model_runs_use_base_signature() {
        let mut spec = IncrementalSpec::default();
        spec.training.base_model = true;
        assert_eq!(spec.run_dir(), spec.base_run_dir());
        assert!(spec.run_dir().ends_with(spec.base_params_str()));
    }

    #[test]
    fn test_base_params_ignore_incremental_options() {
        let a = IncrementalSpec::default();
        let mut b = IncrementalSpec::default();
        b.memory.memory_type = MemoryType::Episodic;
        b.rectification.bias_rect = BiasRect::Bic;
        b.distillation.reg_type = RegType::Lwf;
        assert_eq!(a.base_params_str(), b.base_params_str());
        assert_ne!(a.params_str(), b.params_str());
    }
}
