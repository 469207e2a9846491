//! Examples, datasets and the per-epoch input pipeline
//!
//! - [`Dataset`]: ordered, shareable example collection with view transforms
//! - [`Pipeline`]: explicit cache/shuffle/map/batch/prefetch composition
//! - [`ClassIncrementalTask`]: splits data into incremental [`Stage`]s

mod augment;
mod batch;
mod dataset;
mod loader;
mod pipeline;
mod task;

pub use augment::{Augment, Compose, GaussianNoise, RandomFlip};
pub(crate) use augment::standard_normal;
pub use batch::Batch;
pub use dataset::{Dataset, Example};
pub use loader::{load_json_dataset, SyntheticBlobs};
pub use pipeline::{EpochIter, Pipeline};
pub use task::{ClassIncrementalTask, Stage};
