//! Applies online/offline decisions to the CPU topology.
//!
//! The actuator is the only place that calls the topology collaborator's
//! hotplug operations, so it enforces the invariants every caller relies on:
//! CPU 0 never goes offline, a CPU is not offlined before its dwell time has
//! passed (except on the forced suspend path), and counters and timestamps
//! change only after the collaborator reports success.

use crate::error::{HotplugError, HotplugResult};
use crate::hysteresis::HotplugCounters;
use crate::logging::clear_failure;
use crate::platform::{CpuList, CpuTopology};
use smallvec::SmallVec;

pub const PRIMARY_CPU: u32 = 0;

pub struct HotplugActuator {
    topology: Box<dyn CpuTopology>,
    /// Time each CPU last came online. `None` while offline.
    online_since: SmallVec<[Option<u64>; 8]>,
}

impl HotplugActuator {
    /// Wraps `topology`, stamping CPUs that are already online with `now`.
    pub fn new(topology: Box<dyn CpuTopology>, now: u64) -> Self {
        let possible = topology.possible_cpu_count();
        let online_since = (0..possible).map(|cpu| topology.is_online(cpu).then_some(now)).collect();
        Self { topology, online_since }
    }

    pub fn possible_cpu_count(&self) -> u32 {
        self.topology.possible_cpu_count()
    }

    pub fn is_online(&self, cpu: u32) -> bool {
        cpu == PRIMARY_CPU || self.topology.is_online(cpu)
    }

    pub fn online_cpus(&self) -> CpuList {
        let mut cpus = self.topology.online_cpus();
        if !cpus.contains(&PRIMARY_CPU) {
            cpus.insert(0, PRIMARY_CPU);
        }
        cpus
    }

    pub fn online_count(&self) -> u32 {
        self.online_cpus().len() as u32
    }

    /// Non-primary CPUs that are currently offline, lowest first.
    pub fn offline_cpus(&self) -> CpuList {
        (1..self.possible_cpu_count()).filter(|&cpu| !self.is_online(cpu)).collect()
    }

    pub fn online_since(&self, cpu: u32) -> Option<u64> {
        self.online_since.get(cpu as usize).copied().flatten()
    }

    /// Whether `cpu` has been online for at least `min_time_online` ms at `now`.
    pub fn dwell_elapsed(&self, cpu: u32, now: u64, min_time_online: u64) -> bool {
        match self.online_since(cpu) {
            Some(since) => now.saturating_sub(since) >= min_time_online,
            None => true,
        }
    }

    /// Brings `cpu` online. Already-online CPUs are left untouched.
    pub fn online(&mut self, cpu: u32, now: u64, counters: &mut HotplugCounters) -> HotplugResult<()> {
        if self.is_online(cpu) {
            return Ok(());
        }
        self.topology.online(cpu)?;
        self.stamp(cpu, Some(now));
        counters.reset(cpu);
        clear_failure(&format!("cpu{}:", cpu));
        Ok(())
    }

    /// Takes `cpu` offline if it has been online for at least `min_time_online` ms.
    pub fn offline(&mut self, cpu: u32, now: u64, min_time_online: u64, counters: &mut HotplugCounters) -> HotplugResult<()> {
        if cpu == PRIMARY_CPU {
            return Err(HotplugError::PrimaryCpu(cpu));
        }
        if !self.is_online(cpu) {
            return Ok(());
        }
        if !self.dwell_elapsed(cpu, now, min_time_online) {
            return Err(HotplugError::TooSoonToOffline(cpu));
        }
        self.take_offline(cpu, counters)
    }

    /// Takes `cpu` offline regardless of dwell time. Still refuses CPU 0.
    pub fn force_offline(&mut self, cpu: u32, counters: &mut HotplugCounters) -> HotplugResult<()> {
        if cpu == PRIMARY_CPU {
            return Err(HotplugError::PrimaryCpu(cpu));
        }
        if !self.is_online(cpu) {
            return Ok(());
        }
        self.take_offline(cpu, counters)
    }

    /// Re-stamps every online CPU with `now` (after a resume).
    pub fn restamp_online(&mut self, now: u64) {
        for cpu in 0..self.possible_cpu_count() {
            let stamp = self.is_online(cpu).then_some(now);
            self.stamp(cpu, stamp);
        }
    }

    fn take_offline(&mut self, cpu: u32, counters: &mut HotplugCounters) -> HotplugResult<()> {
        self.topology.offline(cpu)?;
        self.stamp(cpu, None);
        counters.reset(cpu);
        clear_failure(&format!("cpu{}:", cpu));
        Ok(())
    }

    fn stamp(&mut self, cpu: u32, value: Option<u64>) {
        let index = cpu as usize;
        if index >= self.online_since.len() {
            self.online_since.resize(index + 1, None);
        }
        self.online_since[index] = value;
    }
}
