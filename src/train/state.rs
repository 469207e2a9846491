//! Explicit mutable state of a stage's optimization loop

/// Streaming mean of a scalar metric
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub fn update(&mut self, value: f32) {
        self.update_weighted(value, 1);
    }

    /// Add `value` as the mean of `count` observations
    pub fn update_weighted(&mut self, value: f32, count: u64) {
        self.sum += f64::from(value) * count as f64;
        self.count += count;
    }

    /// Current mean (0 before any update)
    pub fn result(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Running means reported for every epoch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochMetrics {
    pub train_loss: RunningMean,
    pub ce_loss: RunningMean,
    pub reg_loss: RunningMean,
    /// Training accuracy in percent
    pub accuracy: RunningMean,
    /// Present only when distillation is enabled for the run
    pub lwf_loss: Option<RunningMean>,
}

impl EpochMetrics {
    pub fn new(track_distillation: bool) -> Self {
        Self { lwf_loss: track_distillation.then(RunningMean::default), ..Self::default() }
    }

    pub fn reset(&mut self) {
        self.train_loss.reset();
        self.ce_loss.reset();
        self.reg_loss.reset();
        self.accuracy.reset();
        if let Some(lwf) = &mut self.lwf_loss {
            lwf.reset();
        }
    }
}

/// Loss terms of one optimization step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    pub total: f32,
    pub ce: f32,
    pub reg: f32,
    pub lwf: f32,
    /// Correct predictions in the batch
    pub correct: usize,
    pub batch_size: usize,
}

/// Learning rate, counters and accumulators of the running stage
///
/// Passed by reference into every step; accumulators are reset at epoch
/// boundaries through [`TrainerState::begin_epoch`].
#[derive(Debug, Clone)]
pub struct TrainerState {
    pub lr: f32,
    pub epoch: usize,
    /// Optimization steps taken in this stage
    pub step: usize,
    pub metrics: EpochMetrics,
    /// Steps in which an optimizer update was applied
    pub updates: usize,
}

impl TrainerState {
    pub fn new(initial_lr: f32, track_distillation: bool) -> Self {
        Self {
            lr: initial_lr,
            epoch: 0,
            step: 0,
            metrics: EpochMetrics::new(track_distillation),
            updates: 0,
        }
    }

    /// Enter `epoch`, clearing the per-epoch accumulators
    pub fn begin_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.metrics.reset();
    }

    /// Fold one step's losses into the running means
    pub fn record(&mut self, losses: &StepLosses) {
        self.step += 1;
        self.metrics.train_loss.update(losses.total);
        self.metrics.ce_loss.update(losses.ce);
        self.metrics.reg_loss.update(losses.reg);
        if losses.batch_size > 0 {
            let acc = 100.0 * losses.correct as f32 / losses.batch_size as f32;
            self.metrics.accuracy.update_weighted(acc, losses.batch_size as u64);
        }
        if let Some(lwf) = &mut self.metrics.lwf_loss {
            lwf.update(losses.lwf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_running_mean() {
        let mut m = RunningMean::default();
        assert_eq!(m.result(), 0.0);
        m.update(1.0);
        m.update(3.0);
        assert_relative_eq!(m.result(), 2.0);
        m.update_weighted(5.0, 2);
        assert_relative_eq!(m.result(), 3.5);
        m.reset();
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn test_begin_epoch_resets_accumulators() {
        let mut state = TrainerState::new(0.1, true);
        state.record(&StepLosses { total: 2.0, ce: 1.5, reg: 0.1, lwf: 0.4, correct: 3, batch_size: 4 });
        assert_relative_eq!(state.metrics.accuracy.result(), 75.0);
        assert_eq!(state.metrics.lwf_loss.map(|m| m.count()), Some(1));

        state.begin_epoch(1);
        assert_eq!(state.epoch, 1);
        assert_eq!(state.metrics.train_loss.count(), 0);
        assert_eq!(state.metrics.lwf_loss.map(|m| m.count()), Some(0));
        assert_eq!(state.step, 1);
    }

    #[test]
    fn test_no_distillation_tracker() {
        let mut state = TrainerState::new(0.1, false);
        state.record(&StepLosses::default());
        assert!(state.metrics.lwf_loss.is_none());
    }
}
