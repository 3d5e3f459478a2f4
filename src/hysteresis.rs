//! Per-CPU anti-thrash counters.
//!
//! Each non-primary CPU carries a saturating counter that climbs while the
//! core is busy and decays while it idles. A core whose counter sits at or
//! above [`ONLINE_BAR`] has been busy recently and is kept online; below the
//! bar it becomes an offline candidate once its dwell time has passed.

use smallvec::SmallVec;

pub const COUNTER_MAX: u8 = 20;
pub const ONLINE_BAR: u8 = COUNTER_MAX / 2;

/// Asymmetric step sizes for the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisPolicy {
    pub step_up: u8,
    pub step_down: u8,
}

impl HysteresisPolicy {
    /// Busy cores climb fast and decay slowly: cores are held online longer.
    pub const STICKY: Self = Self { step_up: 2, step_down: 1 };
    /// Idle cores decay fast: cores are released quickly.
    pub const EAGER: Self = Self { step_up: 1, step_down: 2 };

    /// Builds a policy from tunable values, clamping each step to `1..=COUNTER_MAX`.
    pub fn from_steps(step_up: u32, step_down: u32) -> Self {
        let clamp = |step: u32| step.clamp(1, COUNTER_MAX as u32) as u8;
        Self {
            step_up: clamp(step_up),
            step_down: clamp(step_down),
        }
    }
}

impl Default for HysteresisPolicy {
    fn default() -> Self {
        Self::STICKY
    }
}

/// Counters indexed by logical CPU number. CPU 0 is never bumped.
#[derive(Debug, Clone)]
pub struct HotplugCounters {
    counters: SmallVec<[u8; 8]>,
    pub policy: HysteresisPolicy,
}

impl HotplugCounters {
    pub fn new(cpu_count: u32, policy: HysteresisPolicy) -> Self {
        Self {
            counters: SmallVec::from_elem(0, cpu_count as usize),
            policy,
        }
    }

    /// Moves the counter of `cpu` one step towards busy or idle.
    pub fn bump(&mut self, cpu: u32, above_threshold: bool) {
        if cpu == 0 {
            return;
        }
        let policy = self.policy;
        if let Some(counter) = self.counters.get_mut(cpu as usize) {
            *counter = if above_threshold {
                counter.saturating_add(policy.step_up).min(COUNTER_MAX)
            } else {
                counter.saturating_sub(policy.step_down)
            };
        }
    }

    pub fn get(&self, cpu: u32) -> u8 {
        self.counters.get(cpu as usize).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, cpu: u32) {
        if let Some(counter) = self.counters.get_mut(cpu as usize) {
            *counter = 0;
        }
    }

    pub fn reset_all(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
    }

    /// The core has been busy for long enough that it should stay (or come) online.
    pub fn ready_to_online(&self, cpu: u32) -> bool {
        self.get(cpu) >= ONLINE_BAR
    }
}
