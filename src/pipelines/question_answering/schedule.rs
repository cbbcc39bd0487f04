use burn::{lr_scheduler::LrScheduler, tensor::backend::Backend, LearningRate};

/// Configuration to create a [linear warmup](LinearWarmupLrScheduler) learning rate scheduler.
#[derive(burn::config::Config)]
pub struct LinearWarmupLrSchedulerConfig {
    /// The peak learning rate, reached at the end of warmup
    pub init_lr: LearningRate,

    /// The number of steps over which the learning rate increases from zero
    #[config(default = 0)]
    pub warmup_steps: usize,

    /// The step at which the learning rate reaches zero
    pub total_steps: usize,
}

impl LinearWarmupLrSchedulerConfig {
    /// Initialize a new scheduler
    pub fn init(&self) -> LinearWarmupLrScheduler {
        LinearWarmupLrScheduler {
            init_lr: self.init_lr,
            warmup_steps: self.warmup_steps,
            total_steps: self.total_steps.max(1),
            step: 0,
        }
    }
}

/// Increases the learning rate linearly from zero during warmup, then decreases it linearly to
/// zero at the last step.
#[derive(Clone, Debug)]
pub struct LinearWarmupLrScheduler {
    init_lr: LearningRate,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl LinearWarmupLrScheduler {
    /// The learning rate used for the given optimizer step
    pub fn lr_at(&self, step: usize) -> LearningRate {
        if step < self.warmup_steps {
            return self.init_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }

        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;

        self.init_lr * remaining / decay_steps
    }
}

impl<B: Backend> LrScheduler<B> for LinearWarmupLrScheduler {
    type Record = usize;

    fn step(&mut self) -> LearningRate {
        let lr = self.lr_at(self.step);
        self.step += 1;

        lr
    }

    fn to_record(&self) -> Self::Record {
        self.step
    }

    fn load_record(mut self, record: Self::Record) -> Self {
        self.step = record;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn warms_up_then_decays_to_zero() {
        let scheduler = LinearWarmupLrSchedulerConfig::new(1.0, 10)
            .with_warmup_steps(2)
            .init();

        assert!(close(scheduler.lr_at(0), 0.0));
        assert!(close(scheduler.lr_at(1), 0.5));
        assert!(close(scheduler.lr_at(2), 1.0));
        assert!(close(scheduler.lr_at(6), 0.5));
        assert!(close(scheduler.lr_at(10), 0.0));
        assert!(close(scheduler.lr_at(12), 0.0));
    }

    #[test]
    fn starts_at_the_peak_without_warmup() {
        let scheduler = LinearWarmupLrSchedulerConfig::new(2e-5, 4).init();

        assert!(close(scheduler.lr_at(0), 2e-5));
        assert!(close(scheduler.lr_at(2), 1e-5));
    }
}
