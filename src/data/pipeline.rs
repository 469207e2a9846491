//! Lazy per-epoch input pipeline
//!
//! Stages compose explicitly in the order `cache -> shuffle(buffer) ->
//! map(augment) -> batch(n) -> prefetch(k)`. Nothing is computed until
//! [`Pipeline::epoch`] is called; every call yields a fresh, finite pass
//! over the data.

use super::augment::Augment;
use super::batch::Batch;
use super::dataset::Dataset;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;

/// Composable description of how a dataset is fed to training
#[derive(Debug, Clone)]
pub struct Pipeline {
    source: Dataset,
    shuffle_buffer: Option<usize>,
    augment: Option<Arc<dyn Augment>>,
    batch_size: usize,
    prefetch: usize,
}

impl Pipeline {
    /// Start a pipeline over `source` (unshuffled, batch size 1)
    pub fn from_dataset(source: Dataset) -> Self {
        Self { source, shuffle_buffer: None, augment: None, batch_size: 1, prefetch: 0 }
    }

    /// Materialize the source so epochs read contiguous storage
    pub fn cache(mut self) -> Self {
        self.source = self.source.cache();
        self
    }

    /// Shuffle through a bounded buffer of `buffer` examples
    ///
    /// A buffer at least as large as the dataset yields a uniform permutation.
    pub fn shuffle(mut self, buffer: usize) -> Self {
        self.shuffle_buffer = Some(buffer.max(1));
        self
    }

    /// Transform every example with `augment`
    pub fn map(mut self, augment: Arc<dyn Augment>) -> Self {
        self.augment = Some(augment);
        self
    }

    /// Group examples into batches of `batch_size` (the last may be smaller)
    pub fn batch(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Keep up to `k` batches prepared ahead of the consumer
    pub fn prefetch(mut self, k: usize) -> Self {
        self.prefetch = k;
        self
    }

    /// Number of examples per epoch
    pub fn cardinality(&self) -> usize {
        self.source.len()
    }

    /// Number of batches per epoch
    pub fn num_batches(&self) -> usize {
        self.source.len().div_ceil(self.batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Underlying dataset
    pub fn source(&self) -> &Dataset {
        &self.source
    }

    /// Start one pass over the data
    pub fn epoch<'a>(&'a self, rng: &'a mut StdRng) -> EpochIter<'a> {
        EpochIter {
            pipeline: self,
            order: ShuffleBuffer::new(self.source.len(), self.shuffle_buffer),
            rng,
            ready: VecDeque::with_capacity(self.prefetch + 1),
        }
    }
}

/// Streaming shuffle over positions `0..len`
///
/// Fills a buffer with the first positions, then repeatedly emits a random
/// buffered position and refills its slot with the next unseen one.
struct ShuffleBuffer {
    len: usize,
    next: usize,
    buffer: Vec<usize>,
    capacity: Option<usize>,
}

impl ShuffleBuffer {
    fn new(len: usize, capacity: Option<usize>) -> Self {
        Self { len, next: 0, buffer: Vec::new(), capacity }
    }

    fn next_position(&mut self, rng: &mut StdRng) -> Option<usize> {
        let Some(capacity) = self.capacity else {
            let pos = (self.next < self.len).then_some(self.next);
            self.next += 1;
            return pos;
        };
        while self.buffer.len() < capacity && self.next < self.len {
            self.buffer.push(self.next);
            self.next += 1;
        }
        if self.buffer.is_empty() {
            return None;
        }
        let slot = rng.random_range(0..self.buffer.len());
        Some(self.buffer.swap_remove(slot))
    }
}

/// One epoch of batches
pub struct EpochIter<'a> {
    pipeline: &'a Pipeline,
    order: ShuffleBuffer,
    rng: &'a mut StdRng,
    ready: VecDeque<Batch>,
}

impl EpochIter<'_> {
    fn produce(&mut self) -> Option<Batch> {
        let source = &self.pipeline.source;
        let mut positions = Vec::with_capacity(self.pipeline.batch_size);
        while positions.len() < self.pipeline.batch_size {
            match self.order.next_position(self.rng) {
                Some(pos) => positions.push(pos),
                None => break,
            }
        }
        if positions.is_empty() {
            return None;
        }

        let mut inputs: Array2<f32> = source.gather_inputs(&positions);
        if let Some(augment) = &self.pipeline.augment {
            let shape = source.feature_shape();
            for mut row in inputs.axis_iter_mut(Axis(0)) {
                let mut owned = row.to_owned();
                augment.apply(&mut owned, shape, self.rng);
                row.assign(&owned);
            }
        }
        let labels = positions.iter().map(|&p| source.get(p).label).collect();
        Some(Batch::new(inputs, labels))
    }
}

impl Iterator for EpochIter<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        while self.ready.len() <= self.pipeline.prefetch {
            match self.produce() {
                Some(batch) => self.ready.push_back(batch),
                None => break,
            }
        }
        self.ready.pop_front()
    }
}
