//! Rolling load average over a fixed window of samples.

use crate::error::HotplugError;
use crate::logging::{clear_failure, log_failure_once};
use crate::platform::{LoadScope, LoadSource};

/// Sampling periods averaged by [`LoadHistory`].
pub const HISTORY_LEN: usize = 10;

/// Circular buffer of the last `N` load samples.
///
/// Slots start at zero, so the average ramps up over the first `N` samples
/// after a reset instead of reacting to a single early spike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadHistory<const N: usize = HISTORY_LEN> {
    samples: [u32; N],
    index: usize,
}

impl<const N: usize> LoadHistory<N> {
    pub fn new() -> Self {
        Self { samples: [0; N], index: 0 }
    }

    /// Stores `sample` at the write index, advances it and returns `floor(sum / N)`.
    pub fn record_and_average(&mut self, sample: u32) -> u32 {
        self.samples[self.index] = sample;
        self.index = (self.index + 1) % N;
        self.average()
    }

    pub fn average(&self) -> u32 {
        let sum: u64 = self.samples.iter().map(|&s| s as u64).sum();
        (sum / N as u64) as u32
    }

    pub fn reset(&mut self) {
        self.samples = [0; N];
        self.index = 0;
    }
}

impl<const N: usize> Default for LoadHistory<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Load source plus history. Unavailable samples count as zero load.
pub struct LoadSampler {
    source: Box<dyn LoadSource>,
    pub history: LoadHistory,
}

impl LoadSampler {
    pub fn new(source: Box<dyn LoadSource>) -> Self {
        Self {
            source,
            history: LoadHistory::new(),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Samples system load and folds it into the rolling average.
    pub fn sample_and_average(&mut self) -> u32 {
        let sample = self.sample_or_zero(LoadScope::System);
        self.history.record_and_average(sample)
    }

    /// Per-CPU busy percent from the snapshot taken by the last system sample.
    pub fn cpu_load(&mut self, cpu: u32) -> u32 {
        self.sample_or_zero(LoadScope::Cpu(cpu))
    }

    fn sample_or_zero(&mut self, scope: LoadScope) -> u32 {
        let key = match scope {
            LoadScope::System => "load:system".to_string(),
            LoadScope::Cpu(cpu) => format!("load:cpu{}", cpu),
        };
        match self.source.sample(scope) {
            Ok(value) => {
                clear_failure(&key);
                value
            }
            Err(HotplugError::LoadSourceUnavailable(reason)) => {
                log_failure_once(&key, &format!("{} load unavailable ({:?}), counting as 0: {}", self.source.name(), scope, reason));
                0
            }
            Err(e) => {
                log_failure_once(&key, &format!("{} load sample failed ({:?}), counting as 0: {}", self.source.name(), scope, e));
                0
            }
        }
    }
}
