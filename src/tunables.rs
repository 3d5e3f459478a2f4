//! Externally mutable controller parameters.
//!
//! Every field is an `AtomicU32` so the configuration layer can store new
//! values at any time without taking the controller lock. The decision cycle
//! takes a [`Tunables`] snapshot at its start; there is no atomicity across
//! fields.

use crate::error::{HotplugError, HotplugResult};
use crate::hysteresis::COUNTER_MAX;
use crate::stat::LoadSourceKind;
use std::sync::atomic::{AtomicU32, Ordering};

/// Names of the tunable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tunable {
    EnableThreshold,
    EnableAllThreshold,
    DisableThreshold,
    SamplePeriod,
    MinTimeOnline,
    CoresOnTouch,
    BoostFrequency,
    BoostDuration,
    SuspendFrequency,
    CpuBusyThreshold,
    CounterStepUp,
    CounterStepDown,
    DynamicScaling,
}

impl Tunable {
    /// (variant, config name, min, max)
    const TABLE: &'static [(Self, &'static str, u32, u32)] = &[
        (Self::EnableThreshold, "enable_threshold", 0, 10_000),
        (Self::EnableAllThreshold, "enable_all_threshold", 0, 10_000),
        (Self::DisableThreshold, "disable_threshold", 0, 10_000),
        (Self::SamplePeriod, "sample_period", 10, 60_000),
        (Self::MinTimeOnline, "min_time_online", 0, 600_000),
        (Self::CoresOnTouch, "cores_on_touch", 1, 64),
        (Self::BoostFrequency, "boost_frequency", 0, 10_000_000),
        (Self::BoostDuration, "boost_duration", 0, 60_000),
        (Self::SuspendFrequency, "suspend_frequency", 0, 10_000_000),
        (Self::CpuBusyThreshold, "cpu_busy_threshold", 0, 100),
        (Self::CounterStepUp, "counter_step_up", 1, COUNTER_MAX as u32),
        (Self::CounterStepDown, "counter_step_down", 1, COUNTER_MAX as u32),
        (Self::DynamicScaling, "dynamic_scaling", 0, 1),
    ];

    pub const COUNT: usize = Self::TABLE.len();

    pub fn all() -> impl Iterator<Item = Self> {
        Self::TABLE.iter().map(|(v, _, _, _)| *v)
    }

    fn index(self) -> usize {
        Self::TABLE.iter().position(|(v, _, _, _)| *v == self).unwrap_or(0)
    }

    /// Config name of this field.
    pub fn as_str(&self) -> &'static str {
        Self::TABLE[self.index()].1
    }

    /// Inclusive range accepted by the setter.
    pub fn range(&self) -> (u32, u32) {
        let (_, _, min, max) = Self::TABLE[self.index()];
        (min, max)
    }

    /// Parse from string (case-insensitive match against known names).
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::TABLE.iter().find(|(_, name, _, _)| *name == s.as_str()).map(|(v, _, _, _)| *v)
    }

    /// Checks `value` against the field's range.
    pub fn validate(&self, value: u64) -> HotplugResult<u32> {
        let (min, max) = self.range();
        if value < min as u64 || value > max as u64 {
            return Err(HotplugError::InvalidTunable { name: self.as_str(), value, min, max });
        }
        Ok(value as u32)
    }
}

/// Plain snapshot of every tunable, read once per decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Load (per online core) at or above which one more core is onlined.
    pub enable_threshold: u32,
    /// Load (per online core) above which every core is onlined.
    pub enable_all_threshold: u32,
    /// Load (per online core) below which one core may be offlined.
    pub disable_threshold: u32,
    /// Base sampling period in ms, divided by the online core count.
    pub sample_period_ms: u32,
    /// Dwell time in ms before an onlined core may be offlined.
    pub min_time_online_ms: u32,
    pub cores_on_touch: u32,
    /// Frequency floor in kHz during a touch boost. 0 disables the floor.
    pub boost_frequency: u32,
    pub boost_duration_ms: u32,
    /// Max frequency in kHz while the screen is off. 0 leaves it uncapped.
    pub suspend_frequency: u32,
    /// Per-core busy percent that counts as "above" for the hysteresis counters.
    pub cpu_busy_threshold: u32,
    pub counter_step_up: u32,
    pub counter_step_down: u32,
    pub dynamic_scaling: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            enable_threshold: 275,
            enable_all_threshold: 425,
            disable_threshold: 125,
            sample_period_ms: 1000,
            min_time_online_ms: 2000,
            cores_on_touch: 2,
            boost_frequency: 1_134_000,
            boost_duration_ms: 1500,
            suspend_frequency: 702_000,
            cpu_busy_threshold: 50,
            counter_step_up: 2,
            counter_step_down: 1,
            dynamic_scaling: true,
        }
    }
}

impl Tunables {
    /// Defaults with the load thresholds suited to `kind`.
    pub fn for_source(kind: LoadSourceKind) -> Self {
        let (enable_threshold, enable_all_threshold, disable_threshold) = kind.default_thresholds();
        Self {
            enable_threshold,
            enable_all_threshold,
            disable_threshold,
            ..Self::default()
        }
    }

    fn field(&self, field: Tunable) -> u32 {
        match field {
            Tunable::EnableThreshold => self.enable_threshold,
            Tunable::EnableAllThreshold => self.enable_all_threshold,
            Tunable::DisableThreshold => self.disable_threshold,
            Tunable::SamplePeriod => self.sample_period_ms,
            Tunable::MinTimeOnline => self.min_time_online_ms,
            Tunable::CoresOnTouch => self.cores_on_touch,
            Tunable::BoostFrequency => self.boost_frequency,
            Tunable::BoostDuration => self.boost_duration_ms,
            Tunable::SuspendFrequency => self.suspend_frequency,
            Tunable::CpuBusyThreshold => self.cpu_busy_threshold,
            Tunable::CounterStepUp => self.counter_step_up,
            Tunable::CounterStepDown => self.counter_step_down,
            Tunable::DynamicScaling => self.dynamic_scaling as u32,
        }
    }
}

/// Lock-free store shared between the configuration layer and the controller.
#[derive(Debug)]
pub struct TunableStore {
    values: [AtomicU32; Tunable::COUNT],
}

impl TunableStore {
    pub fn new(initial: Tunables) -> Self {
        Self {
            values: std::array::from_fn(|i| AtomicU32::new(initial.field(Tunable::TABLE[i].0))),
        }
    }

    pub fn get(&self, field: Tunable) -> u32 {
        self.values[field.index()].load(Ordering::Relaxed)
    }

    /// Stores `value` if it is within the field's range; otherwise the prior value is kept.
    pub fn set(&self, field: Tunable, value: u64) -> HotplugResult<()> {
        let value = field.validate(value)?;
        self.values[field.index()].store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn snapshot(&self) -> Tunables {
        Tunables {
            enable_threshold: self.get(Tunable::EnableThreshold),
            enable_all_threshold: self.get(Tunable::EnableAllThreshold),
            disable_threshold: self.get(Tunable::DisableThreshold),
            sample_period_ms: self.get(Tunable::SamplePeriod),
            min_time_online_ms: self.get(Tunable::MinTimeOnline),
            cores_on_touch: self.get(Tunable::CoresOnTouch),
            boost_frequency: self.get(Tunable::BoostFrequency),
            boost_duration_ms: self.get(Tunable::BoostDuration),
            suspend_frequency: self.get(Tunable::SuspendFrequency),
            cpu_busy_threshold: self.get(Tunable::CpuBusyThreshold),
            counter_step_up: self.get(Tunable::CounterStepUp),
            counter_step_down: self.get(Tunable::CounterStepDown),
            dynamic_scaling: self.get(Tunable::DynamicScaling) != 0,
        }
    }
}

impl Default for TunableStore {
    fn default() -> Self {
        Self::new(Tunables::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_matches_initial() {
        let store = TunableStore::default();
        assert_eq!(store.snapshot(), Tunables::default());
    }

    #[test]
    fn test_for_source_only_changes_thresholds() {
        assert_eq!(Tunables::for_source(LoadSourceKind::Runnable), Tunables::default());
        let busy = Tunables::for_source(LoadSourceKind::Busy);
        assert_eq!((busy.enable_threshold, busy.enable_all_threshold, busy.disable_threshold), (75, 90, 30));
        assert_eq!(busy.sample_period_ms, 1000);
    }

    #[test]
    fn test_set_in_range() {
        let store = TunableStore::default();
        store.set(Tunable::EnableThreshold, 300).unwrap();
        assert_eq!(store.get(Tunable::EnableThreshold), 300);
        assert_eq!(store.snapshot().enable_threshold, 300);
    }

    #[test]
    fn test_out_of_range_keeps_prior_value() {
        let store = TunableStore::default();
        let err = store.set(Tunable::CpuBusyThreshold, 101).unwrap_err();
        assert_eq!(err, HotplugError::InvalidTunable { name: "cpu_busy_threshold", value: 101, min: 0, max: 100 });
        assert_eq!(store.get(Tunable::CpuBusyThreshold), 50);
        assert!(store.set(Tunable::SamplePeriod, 5).is_err());
        assert_eq!(store.get(Tunable::SamplePeriod), 1000);
    }

    #[test]
    fn test_from_str_case_insensitive() {
        assert_eq!(Tunable::from_str("ENABLE_ALL_THRESHOLD"), Some(Tunable::EnableAllThreshold));
        assert_eq!(Tunable::from_str(" boost_duration "), Some(Tunable::BoostDuration));
        assert_eq!(Tunable::from_str("bogus"), None);
    }

    #[test]
    fn test_every_field_round_trips_its_name() {
        assert_eq!(Tunable::all().count(), Tunable::COUNT);
        for field in Tunable::all() {
            assert_eq!(Tunable::from_str(field.as_str()), Some(field));
        }
    }

    #[test]
    fn test_dynamic_scaling_flag() {
        let store = TunableStore::default();
        store.set(Tunable::DynamicScaling, 0).unwrap();
        assert!(!store.snapshot().dynamic_scaling);
        assert!(store.set(Tunable::DynamicScaling, 2).is_err());
    }
}
