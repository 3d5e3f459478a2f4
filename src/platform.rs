//! Interfaces of the collaborators the controller drives.
//!
//! Linux implementations live in `sysfs.rs` and `stat.rs`; the tests use
//! in-memory fakes.

use crate::error::HotplugResult;
use crate::governor::GovernorProfile;
use smallvec::SmallVec;
use std::time::Instant;

/// A short list of logical CPU numbers.
pub type CpuList = SmallVec<[u32; 8]>;

/// CPU online/offline control surface.
pub trait CpuTopology: Send {
    fn possible_cpu_count(&self) -> u32;
    fn is_online(&self, cpu: u32) -> bool;
    fn online(&mut self, cpu: u32) -> HotplugResult<()>;
    fn offline(&mut self, cpu: u32) -> HotplugResult<()>;

    fn online_cpus(&self) -> CpuList {
        (0..self.possible_cpu_count()).filter(|&cpu| self.is_online(cpu)).collect()
    }
}

/// Which load figure to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadScope {
    System,
    Cpu(u32),
}

/// Raw load observations.
///
/// `System` samples are in "percent of one core" (100 = one fully busy core or
/// one runnable thread) and refresh the source's snapshot. `Cpu(n)` samples
/// are 0..=100 and read from the snapshot taken by the last `System` sample.
pub trait LoadSource: Send {
    fn sample(&mut self, scope: LoadScope) -> HotplugResult<u32>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqCap {
    Limit(u32),
    Uncapped,
}

/// Minimum frequency requested until `until_ms` on the controller clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostFloor {
    pub khz: u32,
    pub until_ms: u64,
}

/// Frequency and governor control surface.
pub trait FreqControl: Send {
    fn cap_max(&mut self, cpu: u32, cap: FreqCap) -> HotplugResult<()>;
    /// `None` clears a floor previously set.
    fn set_boost_floor(&mut self, cpu: u32, floor: Option<BoostFloor>) -> HotplugResult<()>;
    fn apply_governor_profile(&mut self, profile: GovernorProfile) -> HotplugResult<()>;
}

pub trait GpuProbe: Send {
    /// `None` when the GPU state cannot be read.
    fn is_idle(&mut self) -> Option<bool>;
}

/// Millisecond clock used for dwell, pause and boost bookkeeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
