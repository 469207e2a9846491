//! Rehearsal memory and mixing of replayed exemplars into stage data
//!
//! The memory is read once when a stage starts ([`RehearsalMemory::load_prev`])
//! and written once when it ends ([`RehearsalMemory::save`]).

mod memory;
mod mixer;

pub use memory::{herding_order, EpisodicMemory};
pub(crate) use memory::l2_normalize_rows;
pub use mixer::{Holdout, MixCounts, MixedDataset, RehearsalMixer, SampleCount};

use crate::data::{Dataset, Stage};
use crate::error::Result;
use crate::model::Classifier;

/// Bounded store of old-class exemplars
pub trait RehearsalMemory: std::fmt::Debug {
    /// Exemplars currently held, `None` when the memory is empty
    fn load_prev(&self) -> Option<Dataset>;

    /// Update the exemplars at the end of `stage`
    fn save(&mut self, model: &dyn Classifier, stage: &Stage) -> Result<()>;

    /// Number of stored exemplars
    fn size(&self) -> usize;

    /// Exemplars of one class, in selection order
    fn exemplars_of(&self, class: usize) -> Option<&Dataset>;
}
