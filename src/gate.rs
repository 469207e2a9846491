//! Checkpoint-existence probing that decides how a stage executes
//!
//! A stage's checkpoints live under `<group>/checkpoints/{1st_stage,2nd_stage}`.
//! The presence of `1st_stage/final.index` means the stage was already
//! trained; resuming an interrupted run relies on nothing else.

use crate::config::IncrementalSpec;
use crate::data::Stage;
use crate::error::{Error, Result};
use crate::model::index_exists;
use std::path::{Path, PathBuf};

pub const FIRST_STAGE: &str = "1st_stage";
pub const SECOND_STAGE: &str = "2nd_stage";

/// How a (sub-)stage runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// A finalized checkpoint exists: load it and skip optimization
    Reuse { checkpoint: PathBuf },
    /// Load a matching base model and its stats, skip optimization
    Bootstrap { checkpoint: PathBuf, stats: PathBuf },
    /// Run the optimization loop
    Train,
}

impl ExecutionMode {
    /// Whether the optimization loop is skipped
    pub fn skips_training(&self) -> bool {
        !matches!(self, ExecutionMode::Train)
    }
}

/// Decides the execution mode of a stage from the checkpoints on disk
#[derive(Debug, Clone)]
pub struct StageCheckpointGate {
    checkpoint_root: PathBuf,
    base_run: Option<PathBuf>,
}

impl StageCheckpointGate {
    /// Gate over `<checkpoint_root>/{1st_stage,2nd_stage}` without bootstrapping
    pub fn new(checkpoint_root: impl Into<PathBuf>) -> Self {
        Self { checkpoint_root: checkpoint_root.into(), base_run: None }
    }

    /// Allow the first stage to bootstrap from the base run at `dir`
    #[must_use]
    pub fn with_base_run(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_run = Some(dir.into());
        self
    }

    /// Gate of `stage` in the run layout of `spec`
    ///
    /// Bootstrapping is enabled only for the first stage of a run that is
    /// neither a base-model run nor forced to retrain its first stage.
    pub fn for_stage(spec: &IncrementalSpec, stage: &Stage) -> Self {
        let root = spec.run_dir().join(stage.folder_name()).join("checkpoints");
        let gate = Self::new(root);
        let bootstrap = stage.is_first_stage()
            && !spec.training.no_skip_base_training
            && !spec.training.base_model;
        if bootstrap {
            gate.with_base_run(spec.base_run_dir())
        } else {
            gate
        }
    }

    pub fn checkpoint_root(&self) -> &Path {
        &self.checkpoint_root
    }

    pub fn first_stage_dir(&self) -> PathBuf {
        self.checkpoint_root.join(FIRST_STAGE)
    }

    pub fn second_stage_dir(&self) -> PathBuf {
        self.checkpoint_root.join(SECOND_STAGE)
    }

    /// Execution mode of the training sub-stage
    ///
    /// Fails with [`Error::MissingBaseCheckpoint`] when bootstrapping is
    /// enabled and no base checkpoint directory exists.
    pub fn resolve(&self) -> Result<ExecutionMode> {
        let first = self.first_stage_dir();
        if index_exists(&first) {
            tracing::info!(path = %first.display(), "Model exist. Skipping...");
            return Ok(ExecutionMode::Reuse { checkpoint: first });
        }
        if let Some(base_run) = &self.base_run {
            let checkpoint = base_run.join("group_1").join("checkpoints").join(FIRST_STAGE);
            if !checkpoint.is_dir() {
                return Err(Error::MissingBaseCheckpoint { path: checkpoint });
            }
            tracing::info!(path = %checkpoint.display(), "Using base model");
            return Ok(ExecutionMode::Bootstrap { checkpoint, stats: base_run.join("stats.json") });
        }
        tracing::info!("Model not exist. Start training...");
        Ok(ExecutionMode::Train)
    }

    /// Execution mode of the rectification sub-stage
    pub fn resolve_rectification(&self) -> ExecutionMode {
        let second = self.second_stage_dir();
        if index_exists(&second) {
            tracing::info!(path = %second.display(), "Rectified model exist. Skipping...");
            ExecutionMode::Reuse { checkpoint: second }
        } else {
            ExecutionMode::Train
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use std::fs;
    use tempfile::TempDir;

    fn touch_index(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("final.index"), "{}").unwrap();
    }

    fn stage(group_idx: usize) -> Stage {
        Stage {
            group_idx,
            nb_groups: 3,
            old_classes: (0..group_idx * 2).collect(),
            cur_classes: (group_idx * 2..group_idx * 2 + 2).collect(),
            train: Dataset::empty(vec![1]),
            test: Dataset::empty(vec![1]),
        }
    }

    #[test]
    fn test_train_without_checkpoints() {
        let dir = TempDir::new().unwrap();
        let gate = StageCheckpointGate::new(dir.path());
        assert_eq!(gate.resolve().unwrap(), ExecutionMode::Train);
        assert_eq!(gate.resolve_rectification(), ExecutionMode::Train);
    }

    #[test]
    fn test_existing_index_is_reused() {
        let dir = TempDir::new().unwrap();
        touch_index(&dir.path().join(FIRST_STAGE));
        let gate = StageCheckpointGate::new(dir.path()).with_base_run(dir.path().join("missing"));
        let mode = gate.resolve().unwrap();
        assert!(mode.skips_training());
        assert_eq!(mode, ExecutionMode::Reuse { checkpoint: dir.path().join(FIRST_STAGE) });
    }

    #[test]
    fn test_missing_base_names_expected_path() {
        let dir = TempDir::new().unwrap();
        let gate = StageCheckpointGate::new(dir.path().join("run")).with_base_run(dir.path().join("base"));
        match gate.resolve() {
            Err(Error::MissingBaseCheckpoint { path }) => {
                assert!(path.ends_with("group_1/checkpoints/1st_stage"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bootstrap_from_base_run() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base");
        touch_index(&base.join("group_1/checkpoints/1st_stage"));
        let gate = StageCheckpointGate::new(dir.path().join("run")).with_base_run(&base);
        assert_eq!(
            gate.resolve().unwrap(),
            ExecutionMode::Bootstrap {
                checkpoint: base.join("group_1/checkpoints/1st_stage"),
                stats: base.join("stats.json"),
            }
        );
    }

    #[test]
    fn test_bootstrap_policy_of_run_layout() {
        let mut spec = IncrementalSpec::default();
        spec.output.root = PathBuf::from("out");
        assert!(StageCheckpointGate::for_stage(&spec, &stage(0)).base_run.is_some());
        assert!(StageCheckpointGate::for_stage(&spec, &stage(1)).base_run.is_none());

        spec.training.no_skip_base_training = true;
        assert!(StageCheckpointGate::for_stage(&spec, &stage(0)).base_run.is_none());

        spec.training.no_skip_base_training = false;
        spec.training.base_model = true;
        let gate = StageCheckpointGate::for_stage(&spec, &stage(0));
        assert!(gate.base_run.is_none());
        assert!(gate.checkpoint_root().ends_with("group_1/checkpoints"));
    }

    #[test]
    fn test_rectification_checkpoint_is_reused() {
        let dir = TempDir::new().unwrap();
        touch_index(&dir.path().join(SECOND_STAGE));
        let gate = StageCheckpointGate::new(dir.path());
        assert!(gate.resolve_rectification().skips_training());
    }
}
