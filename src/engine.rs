//! Hotplug decision state machine.
//!
//! [`Engine`] owns every piece of mutable controller state: the load history,
//! the hysteresis counters, the online timestamps (inside the actuator), the
//! controller state and the touch boost window. It is single-threaded; the
//! controller serializes cycles and power/touch transitions behind one lock.
//!
//! # Cycle
//! 1. Expire a finished touch boost.
//! 2. Sample system load and fold it into the rolling average.
//! 3. Bump the hysteresis counter of every online non-primary CPU.
//! 4. While paused after a mass online, do nothing else.
//! 5. Compare the average against thresholds scaled by the online count,
//!    first match wins: online all, online one, offline one, hold.
//! 6. Push the governor profile for (GPU state, online cores) if it changed.
//! 7. Report the next period: `sample_period / online`, at least 10 ms.

use crate::actuator::{HotplugActuator, PRIMARY_CPU};
use crate::config::format_cpu_indices;
use crate::error::HotplugError;
use crate::governor::{GovernorProfile, GovernorProfiles, GpuState};
use crate::hysteresis::{HotplugCounters, HysteresisPolicy};
use crate::log;
use crate::logging::log_failure_once;
use crate::platform::{BoostFloor, Clock, CpuList, CpuTopology, FreqCap, FreqControl, GpuProbe, LoadSource};
use crate::sampler::LoadSampler;
use crate::tunables::{TunableStore, Tunables};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::sync::Arc;

/// No-action window after onlining every core.
pub const PAUSE_WINDOW_MS: u64 = 2000;
pub const MIN_SAMPLE_PERIOD_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Suspended,
    Paused { until_ms: u64 },
    Active,
}

/// What the thresholds ask for this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    OnlineAll,
    OnlineOne,
    OfflineOne,
    Hold,
}

/// Thresholds for one cycle, each base tunable multiplied by the online count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub enable_all: u64,
    pub enable: u64,
    pub disable: u64,
}

impl Thresholds {
    pub fn scaled(tunables: &Tunables, online: u32) -> Self {
        let online = online.max(1) as u64;
        Self {
            enable_all: tunables.enable_all_threshold as u64 * online,
            enable: tunables.enable_threshold as u64 * online,
            disable: tunables.disable_threshold as u64 * online,
        }
    }
}

/// Tie-break order, evaluated top to bottom.
pub fn decide(avg_load: u32, online: u32, total: u32, thresholds: Thresholds) -> Verdict {
    let avg = avg_load as u64;
    if avg > thresholds.enable_all && online < total {
        Verdict::OnlineAll
    } else if avg >= thresholds.enable && online < total {
        Verdict::OnlineOne
    } else if avg < thresholds.disable && online > 1 {
        Verdict::OfflineOne
    } else {
        Verdict::Hold
    }
}

/// What a cycle actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Onlined(CpuList),
    Offlined(u32),
    Paused,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub avg_load: u32,
    pub online_before: u32,
    pub online_after: u32,
    pub verdict: Verdict,
    pub action: Action,
    pub next_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BoostWindow {
    started_ms: u64,
    /// CPUs that received a frequency floor.
    floored: CpuList,
}

pub struct Engine {
    tunables: Arc<TunableStore>,
    clock: Arc<dyn Clock>,
    sampler: LoadSampler,
    counters: HotplugCounters,
    actuator: HotplugActuator,
    freq: Box<dyn FreqControl>,
    gpu: Option<Box<dyn GpuProbe>>,
    profiles: GovernorProfiles,
    applied_profile: Option<GovernorProfile>,
    state: ControllerState,
    boost: Option<BoostWindow>,
    last_touch_ms: Option<u64>,
    log_cycles: bool,
}

impl Engine {
    pub fn new(
        tunables: Arc<TunableStore>,
        clock: Arc<dyn Clock>,
        topology: Box<dyn CpuTopology>,
        load: Box<dyn LoadSource>,
        freq: Box<dyn FreqControl>,
    ) -> Self {
        let now = clock.now_ms();
        let snapshot = tunables.snapshot();
        let actuator = HotplugActuator::new(topology, now);
        let counters = HotplugCounters::new(
            actuator.possible_cpu_count(),
            HysteresisPolicy::from_steps(snapshot.counter_step_up, snapshot.counter_step_down),
        );
        Self {
            tunables,
            clock,
            sampler: LoadSampler::new(load),
            counters,
            actuator,
            freq,
            gpu: None,
            profiles: GovernorProfiles::default(),
            applied_profile: None,
            state: ControllerState::Active,
            boost: None,
            last_touch_ms: None,
            log_cycles: false,
        }
    }

    pub fn with_gpu(mut self, gpu: Box<dyn GpuProbe>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn with_profiles(mut self, profiles: GovernorProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    /// Replaces the governor profile table; the next cycle re-applies it.
    pub fn set_profiles(&mut self, profiles: GovernorProfiles) {
        self.profiles = profiles;
        self.applied_profile = None;
    }

    /// Logs every cycle, not only the ones that change something.
    pub fn set_log_cycles(&mut self, on: bool) {
        self.log_cycles = on;
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn counters(&self) -> &HotplugCounters {
        &self.counters
    }

    pub fn actuator(&self) -> &HotplugActuator {
        &self.actuator
    }

    pub fn load_source_name(&self) -> &'static str {
        self.sampler.source_name()
    }

    pub fn ms_since_touch(&self) -> Option<u64> {
        self.last_touch_ms.map(|t| self.clock.now_ms().saturating_sub(t))
    }

    pub fn boost_active(&self) -> bool {
        let duration = self.tunables.snapshot().boost_duration_ms as u64;
        self.boost_active_at(self.clock.now_ms(), duration)
    }

    fn boost_active_at(&self, now: u64, duration: u64) -> bool {
        self.boost.as_ref().is_some_and(|b| now.saturating_sub(b.started_ms) < duration)
    }

    /// Sample period for `online` cores.
    pub fn period_for(tunables: &Tunables, online: u32) -> u64 {
        (tunables.sample_period_ms as u64 / online.max(1) as u64).max(MIN_SAMPLE_PERIOD_MS)
    }

    /// Runs one decision cycle. Returns `None` when suspended (the timer is not re-armed).
    pub fn run_cycle(&mut self) -> Option<CycleReport> {
        if self.state == ControllerState::Suspended {
            return None;
        }
        let now = self.clock.now_ms();
        let tunables = self.tunables.snapshot();
        self.counters.policy = HysteresisPolicy::from_steps(tunables.counter_step_up, tunables.counter_step_down);
        if self.boost.is_some() && !self.boost_active_at(now, tunables.boost_duration_ms as u64) {
            self.end_boost();
        }

        let avg_load = self.sampler.sample_and_average();
        let online_cpus = self.actuator.online_cpus();
        let online = online_cpus.len() as u32;
        let total = self.actuator.possible_cpu_count();

        let mut cpu_loads: SmallVec<[(u32, u32); 8]> = SmallVec::new();
        for cpu in online_cpus.into_iter().filter(|&cpu| cpu != PRIMARY_CPU) {
            let load = self.sampler.cpu_load(cpu);
            self.counters.bump(cpu, load >= tunables.cpu_busy_threshold);
            cpu_loads.push((cpu, load));
        }

        if let ControllerState::Paused { until_ms } = self.state {
            if now < until_ms {
                return Some(self.finish(&tunables, avg_load, online, Verdict::Hold, Action::Paused));
            }
            self.state = ControllerState::Active;
        }

        let verdict = decide(avg_load, online, total, Thresholds::scaled(&tunables, online));
        let action = match verdict {
            Verdict::OnlineAll => self.online_all(now),
            Verdict::OnlineOne => self.online_one(now),
            Verdict::OfflineOne => self.offline_one(now, &tunables, online, &cpu_loads),
            Verdict::Hold => Action::Hold,
        };
        Some(self.finish(&tunables, avg_load, online, verdict, action))
    }

    fn finish(&mut self, tunables: &Tunables, avg_load: u32, online_before: u32, verdict: Verdict, action: Action) -> CycleReport {
        let online_after = self.actuator.online_count();
        self.apply_governor_profile(tunables, online_after);
        let report = CycleReport {
            avg_load,
            online_before,
            online_after,
            verdict,
            action,
            next_period_ms: Self::period_for(tunables, online_after),
        };
        if self.log_cycles {
            log!(
                "cycle: avg={} online={}->{} verdict={:?} action={:?} next={}ms",
                report.avg_load,
                report.online_before,
                report.online_after,
                report.verdict,
                report.action,
                report.next_period_ms
            );
        }
        report
    }

    fn online_all(&mut self, now: u64) -> Action {
        let mut onlined = CpuList::new();
        for cpu in self.actuator.offline_cpus() {
            match self.actuator.online(cpu, now, &mut self.counters) {
                Ok(()) => onlined.push(cpu),
                Err(e) => report_failure("online", &e),
            }
        }
        if onlined.is_empty() {
            return Action::Hold;
        }
        self.state = ControllerState::Paused { until_ms: now + PAUSE_WINDOW_MS };
        log!("hotplug: cpu {} online (all), paused for {}ms", format_cpu_indices(&onlined), PAUSE_WINDOW_MS);
        Action::Onlined(onlined)
    }

    fn online_one(&mut self, now: u64) -> Action {
        let Some(cpu) = self.actuator.offline_cpus().first().copied() else {
            return Action::Hold;
        };
        match self.actuator.online(cpu, now, &mut self.counters) {
            Ok(()) => {
                log!("hotplug: cpu{} online", cpu);
                Action::Onlined(CpuList::from_slice(&[cpu]))
            }
            Err(e) => {
                report_failure("online", &e);
                Action::Hold
            }
        }
    }

    /// Offlines the least loaded eligible core; ties go to the highest-numbered CPU.
    fn offline_one(&mut self, now: u64, tunables: &Tunables, online: u32, cpu_loads: &[(u32, u32)]) -> Action {
        let min_online = if self.boost_active_at(now, tunables.boost_duration_ms as u64) { tunables.cores_on_touch.max(1) } else { 1 };
        if online <= min_online {
            return Action::Hold;
        }
        let min_time = tunables.min_time_online_ms as u64;
        let candidate = cpu_loads
            .iter()
            .filter(|(cpu, _)| !self.counters.ready_to_online(*cpu) && self.actuator.dwell_elapsed(*cpu, now, min_time))
            .min_by_key(|(cpu, load)| (*load, Reverse(*cpu)))
            .map(|(cpu, _)| *cpu);
        let Some(cpu) = candidate else {
            return Action::Hold;
        };
        match self.actuator.offline(cpu, now, min_time, &mut self.counters) {
            Ok(()) => {
                log!("hotplug: cpu{} offline", cpu);
                Action::Offlined(cpu)
            }
            Err(e) => {
                report_failure("offline", &e);
                Action::Hold
            }
        }
    }

    fn apply_governor_profile(&mut self, tunables: &Tunables, online: u32) {
        if !tunables.dynamic_scaling {
            return;
        }
        let gpu = GpuState::from_probe(self.gpu.as_mut().and_then(|g| g.is_idle()));
        let profile = self.profiles.select(gpu, online);
        if self.applied_profile == Some(profile) {
            return;
        }
        match self.freq.apply_governor_profile(profile) {
            Ok(()) => {
                self.applied_profile = Some(profile);
                log!(
                    "governor: gpu {} cores {} -> up_threshold={} timer_rate={} min_sample_time={}",
                    gpu.as_str(),
                    online,
                    profile.up_threshold,
                    profile.timer_rate_us,
                    profile.min_sample_time_us
                );
            }
            Err(e) => report_failure("governor", &e),
        }
    }

    fn end_boost(&mut self) {
        let Some(boost) = self.boost.take() else { return };
        for &cpu in &boost.floored {
            if let Err(e) = self.freq.set_boost_floor(cpu, None) {
                report_failure("boost", &e);
            }
        }
        if !boost.floored.is_empty() {
            log!("boost: ended on cpu {}", format_cpu_indices(&boost.floored));
        }
    }

    /// Screen off: offline every non-primary core regardless of dwell time and cap frequency.
    ///
    /// The caller must have cancelled the pending cycle first.
    pub fn suspend(&mut self) {
        let tunables = self.tunables.snapshot();
        self.end_boost();
        let mut offlined = CpuList::new();
        for cpu in self.actuator.online_cpus().into_iter().filter(|&cpu| cpu != PRIMARY_CPU) {
            match self.actuator.force_offline(cpu, &mut self.counters) {
                Ok(()) => offlined.push(cpu),
                Err(e) => report_failure("offline", &e),
            }
        }
        if tunables.suspend_frequency > 0 {
            for cpu in self.actuator.online_cpus() {
                if let Err(e) = self.freq.cap_max(cpu, FreqCap::Limit(tunables.suspend_frequency)) {
                    report_failure("cap", &e);
                }
            }
        }
        self.state = ControllerState::Suspended;
        self.applied_profile = None;
        log!(
            "suspend: cpu {} offline, max frequency {}",
            format_cpu_indices(&offlined),
            if tunables.suspend_frequency > 0 { format!("{}kHz", tunables.suspend_frequency) } else { "unchanged".to_string() }
        );
    }

    /// Screen on: uncap, online every core, reset counters and timestamps, become active.
    pub fn resume(&mut self) {
        let now = self.clock.now_ms();
        let mut onlined = CpuList::new();
        for cpu in self.actuator.offline_cpus() {
            match self.actuator.online(cpu, now, &mut self.counters) {
                Ok(()) => onlined.push(cpu),
                Err(e) => report_failure("online", &e),
            }
        }
        for cpu in self.actuator.online_cpus() {
            if let Err(e) = self.freq.cap_max(cpu, FreqCap::Uncapped) {
                report_failure("uncap", &e);
            }
        }
        self.counters.reset_all();
        self.actuator.restamp_online(now);
        self.state = ControllerState::Active;
        self.applied_profile = None;
        log!("resume: cpu {} online, max frequency restored", format_cpu_indices(&onlined));
    }

    /// Touch start: bring cores up to `cores_on_touch` and open a boost window.
    ///
    /// Returns the CPUs brought online. Ignored while suspended.
    pub fn touch(&mut self) -> CpuList {
        let mut onlined = CpuList::new();
        if self.state == ControllerState::Suspended {
            return onlined;
        }
        let now = self.clock.now_ms();
        let tunables = self.tunables.snapshot();
        self.last_touch_ms = Some(now);

        let target = tunables.cores_on_touch.clamp(1, self.actuator.possible_cpu_count().max(1));
        for cpu in self.actuator.offline_cpus() {
            if self.actuator.online_count() >= target {
                break;
            }
            match self.actuator.online(cpu, now, &mut self.counters) {
                Ok(()) => onlined.push(cpu),
                Err(e) => report_failure("online", &e),
            }
        }

        if tunables.boost_duration_ms == 0 {
            return onlined;
        }
        let mut floored = self.boost.take().map(|b| b.floored).unwrap_or_default();
        if tunables.boost_frequency > 0 {
            let floor = BoostFloor {
                khz: tunables.boost_frequency,
                until_ms: now + tunables.boost_duration_ms as u64,
            };
            for cpu in self.actuator.online_cpus() {
                match self.freq.set_boost_floor(cpu, Some(floor)) {
                    Ok(()) if !floored.contains(&cpu) => floored.push(cpu),
                    Ok(()) => {}
                    Err(e) => report_failure("boost", &e),
                }
            }
        }
        self.boost = Some(BoostWindow { started_ms: now, floored });
        if !onlined.is_empty() {
            log!("touch: cpu {} online", format_cpu_indices(&onlined));
        }
        onlined
    }
}

/// Writes collaborator failures to the fail log once per distinct error. Policy rejections are silent.
fn report_failure(op: &str, err: &HotplugError) {
    if err.is_policy() {
        return;
    }
    let key = match err {
        HotplugError::HotplugFailed { cpu, .. } | HotplugError::FreqControlFailed { cpu, .. } => format!("cpu{}:{}:{}", cpu, op, err),
        _ => format!("{}:{}", op, err),
    };
    log_failure_once(&key, &format!("{} failed: {}", op, err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fakes::{FakeGpu, FakeTopology, FreqCall, ManualClock, RecordingFreq, ScratchDir, ScriptedLoad, TopologyCall};
    use crate::stat::{LoadSourceKind, ProcStatLoad};

    struct Rig {
        engine: Engine,
        topology: FakeTopology,
        load: ScriptedLoad,
        freq: RecordingFreq,
        clock: ManualClock,
        tunables: Arc<TunableStore>,
    }

    fn rig(possible: u32, online: u32, tunables: Tunables) -> Rig {
        let topology = FakeTopology::new(possible, online);
        let load = ScriptedLoad::default();
        let freq = RecordingFreq::default();
        let clock = ManualClock::default();
        let tunables = Arc::new(TunableStore::new(tunables));
        let engine = Engine::new(
            tunables.clone(),
            Arc::new(clock.clone()),
            Box::new(topology.clone()),
            Box::new(load.clone()),
            Box::new(freq.clone()),
        );
        Rig {
            engine,
            topology,
            load,
            freq,
            clock,
            tunables,
        }
    }

    fn quiet() -> Tunables {
        Tunables {
            dynamic_scaling: false,
            ..Tunables::default()
        }
    }

    fn offline_calls(topology: &FakeTopology) -> Vec<u32> {
        topology
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                TopologyCall::Offline(cpu) => Some(cpu),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_threshold_ordering_prefers_online_all() {
        let tunables = Tunables {
            enable_all_threshold: 300,
            enable_threshold: 200,
            disable_threshold: 100,
            ..quiet()
        };
        let thresholds = Thresholds::scaled(&tunables, 2);
        assert_eq!(thresholds, Thresholds { enable_all: 600, enable: 400, disable: 200 });
        assert_eq!(decide(650, 2, 4, thresholds), Verdict::OnlineAll);
        assert_eq!(decide(600, 2, 4, thresholds), Verdict::OnlineOne);
        assert_eq!(decide(650, 4, 4, thresholds), Verdict::Hold);
        assert_eq!(decide(199, 2, 4, thresholds), Verdict::OfflineOne);
        assert_eq!(decide(199, 1, 4, thresholds), Verdict::Hold);
    }

    #[test]
    fn test_cycle_onlines_all_and_pauses() {
        let mut rig = rig(
            4,
            2,
            Tunables {
                enable_all_threshold: 300,
                enable_threshold: 200,
                disable_threshold: 100,
                ..quiet()
            },
        );
        for _ in 0..9 {
            rig.engine.sampler.history.record_and_average(650);
        }
        rig.load.push(&[650, 650, 650]);
        let report = rig.engine.run_cycle().unwrap();
        assert_eq!(report.avg_load, 650);
        assert_eq!(report.verdict, Verdict::OnlineAll);
        assert_eq!(report.action, Action::Onlined(CpuList::from_slice(&[2, 3])));
        assert_eq!(rig.topology.online_count_now(), 4);
        assert_eq!(rig.engine.state(), ControllerState::Paused { until_ms: PAUSE_WINDOW_MS });

        rig.clock.advance(PAUSE_WINDOW_MS - 1);
        assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Paused);

        rig.clock.advance(1);
        rig.engine.run_cycle().unwrap();
        assert_eq!(rig.engine.state(), ControllerState::Active);
    }

    #[test]
    fn test_scenario_online_one_fires_once() {
        let mut rig = rig(
            2,
            1,
            Tunables {
                enable_threshold: 50,
                enable_all_threshold: 10_000,
                disable_threshold: 0,
                ..quiet()
            },
        );
        rig.load.push(&[10, 10, 10, 90, 90, 90, 90, 90, 90, 90]);
        let mut fired = Vec::new();
        let mut averages = Vec::new();
        for cycle in 1..=10 {
            let report = rig.engine.run_cycle().unwrap();
            averages.push(report.avg_load);
            if let Action::Onlined(_) = report.action {
                fired.push(cycle);
            }
            rig.clock.advance(report.next_period_ms);
        }
        assert_eq!(averages, vec![1, 2, 3, 12, 21, 30, 39, 48, 57, 66]);
        assert_eq!(fired, vec![9]);
        assert_eq!(rig.topology.calls(), vec![TopologyCall::Online(1)]);
    }

    #[test]
    fn test_primary_never_requested_offline() {
        let mut rig = rig(
            4,
            4,
            Tunables {
                min_time_online_ms: 0,
                ..quiet()
            },
        );
        // Deterministic pseudo-random load walk.
        let mut seed: u32 = 12345;
        for _ in 0..400 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let sample = (seed >> 16) % 900;
            rig.load.push(&[sample]);
            for cpu in 1..4 {
                rig.load.set_cpu_load(cpu, (seed >> (cpu * 3)) % 100);
            }
            if seed % 37 == 0 {
                rig.engine.touch();
            }
            if let Some(report) = rig.engine.run_cycle() {
                rig.clock.advance(report.next_period_ms);
            }
            assert!(rig.topology.is_online(0));
        }
        rig.engine.suspend();
        assert!(!offline_calls(&rig.topology).contains(&0));
        assert!(!rig.topology.calls().is_empty());
    }

    #[test]
    fn test_offline_waits_for_dwell_and_counters() {
        let mut rig = rig(
            3,
            3,
            Tunables {
                min_time_online_ms: 2000,
                cpu_busy_threshold: 50,
                ..quiet()
            },
        );
        rig.load.set_cpu_load(1, 80);
        rig.load.set_cpu_load(2, 10);
        let mut offlined_at = None;
        for _ in 0..30 {
            rig.load.push(&[0]);
            let report = rig.engine.run_cycle().unwrap();
            if let Action::Offlined(cpu) = report.action {
                offlined_at = Some((cpu, rig.clock.now_ms()));
                break;
            }
            rig.clock.advance(100);
        }
        let (cpu, at) = offlined_at.unwrap();
        assert_eq!(cpu, 2);
        assert_eq!(at, 2000);
        // cpu1 is busy: its counter holds it online even though system load is low.
        assert!(rig.engine.counters().ready_to_online(1));
        rig.load.push(&[0; 10]);
        for _ in 0..10 {
            rig.clock.advance(100);
            let report = rig.engine.run_cycle().unwrap();
            assert_eq!(report.action, Action::Hold);
        }
        assert_eq!(offline_calls(&rig.topology), vec![2]);
    }

    #[test]
    fn test_at_most_one_offline_per_cycle() {
        let mut rig = rig(4, 4, Tunables { min_time_online_ms: 0, ..quiet() });
        rig.load.push(&[0]);
        let report = rig.engine.run_cycle().unwrap();
        // All idle and tied: the highest-numbered core goes first.
        assert_eq!(report.action, Action::Offlined(3));
        assert_eq!(rig.topology.online_count_now(), 3);
    }

    #[test]
    fn test_failed_online_retried_next_cycle() {
        let mut rig = rig(
            2,
            1,
            Tunables {
                enable_threshold: 0,
                ..quiet()
            },
        );
        rig.topology.fail_next(1);
        rig.load.push(&[100, 100]);
        assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Hold);
        assert_eq!(rig.engine.actuator().online_since(1), None);
        rig.clock.advance(1000);
        assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Onlined(CpuList::from_slice(&[1])));
        assert_eq!(rig.engine.actuator().online_since(1), Some(1000));
    }

    #[test]
    fn test_failed_offline_retried_next_cycle() {
        let mut rig = rig(2, 2, Tunables { min_time_online_ms: 0, ..quiet() });
        rig.topology.fail_next(1);
        rig.load.push(&[0, 0]);
        assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Hold);
        assert_eq!(rig.engine.actuator().online_since(1), Some(0));
        assert_eq!(rig.topology.online_count_now(), 2);
        rig.clock.advance(1000);
        assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Offlined(1));
        assert_eq!(offline_calls(&rig.topology), vec![1, 1]);
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut rig = rig(4, 3, quiet());
        rig.clock.set(500);
        rig.engine.suspend();
        assert_eq!(rig.engine.state(), ControllerState::Suspended);
        assert_eq!(rig.topology.online_count_now(), 1);
        assert!(rig.engine.run_cycle().is_none());
        assert!(rig.freq.calls().contains(&FreqCall::Cap(0, FreqCap::Limit(702_000))));

        rig.clock.set(900);
        rig.engine.resume();
        assert_eq!(rig.engine.state(), ControllerState::Active);
        assert_eq!(rig.topology.online_count_now(), rig.engine.actuator().possible_cpu_count());
        assert!(rig.freq.calls().contains(&FreqCall::Cap(3, FreqCap::Uncapped)));
        for cpu in 0..4 {
            assert_eq!(rig.engine.actuator().online_since(cpu), Some(900));
            assert_eq!(rig.engine.counters().get(cpu), 0);
        }
    }

    #[test]
    fn test_suspend_bypasses_dwell_time() {
        let mut rig = rig(2, 1, Tunables { min_time_online_ms: 60_000, ..quiet() });
        rig.engine.touch();
        assert_eq!(rig.topology.online_count_now(), 2);
        rig.engine.suspend();
        assert_eq!(rig.topology.online_count_now(), 1);
    }

    #[test]
    fn test_touch_ignored_while_suspended() {
        let mut rig = rig(4, 1, quiet());
        rig.engine.suspend();
        assert!(rig.engine.touch().is_empty());
        assert_eq!(rig.topology.online_count_now(), 1);
        assert_eq!(rig.engine.ms_since_touch(), None);
    }

    #[test]
    fn test_touch_boost_holds_cores_until_expiry() {
        let mut rig = rig(
            4,
            1,
            Tunables {
                cores_on_touch: 2,
                boost_frequency: 1_134_000,
                boost_duration_ms: 1500,
                min_time_online_ms: 0,
                ..quiet()
            },
        );
        let onlined = rig.engine.touch();
        assert_eq!(onlined.as_slice(), &[1]);
        let floor = Some(BoostFloor { khz: 1_134_000, until_ms: 1500 });
        assert!(rig.freq.calls().contains(&FreqCall::Floor(0, floor)));
        assert!(rig.freq.calls().contains(&FreqCall::Floor(1, floor)));
        assert!(rig.engine.boost_active());

        rig.load.push(&[0; 20]);
        for _ in 0..3 {
            rig.clock.advance(400);
            assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Hold);
        }
        assert_eq!(rig.topology.online_count_now(), 2);
        assert_eq!(rig.engine.ms_since_touch(), Some(1200));

        rig.clock.advance(300);
        let report = rig.engine.run_cycle().unwrap();
        assert!(!rig.engine.boost_active());
        assert!(rig.freq.calls().contains(&FreqCall::Floor(1, None)));
        assert_eq!(report.action, Action::Offlined(1));
        assert_eq!(rig.engine.ms_since_touch(), Some(1500));
    }

    #[test]
    fn test_next_period_scales_with_online_count() {
        let tunables = Tunables { sample_period_ms: 1000, ..quiet() };
        assert_eq!(Engine::period_for(&tunables, 1), 1000);
        assert_eq!(Engine::period_for(&tunables, 4), 250);
        let fast = Tunables { sample_period_ms: 20, ..quiet() };
        assert_eq!(Engine::period_for(&fast, 4), MIN_SAMPLE_PERIOD_MS);
    }

    #[test]
    fn test_tunable_change_applies_next_cycle() {
        let mut rig = rig(2, 1, Tunables { enable_threshold: 10_000, ..quiet() });
        rig.load.push(&[1000, 1000]);
        assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Hold);
        rig.tunables.set(crate::tunables::Tunable::EnableThreshold, 100).unwrap();
        assert_eq!(rig.engine.run_cycle().unwrap().action, Action::Onlined(CpuList::from_slice(&[1])));
    }

    #[test]
    fn test_governor_profile_follows_gpu_state() {
        let topology = FakeTopology::new(2, 1);
        let freq = RecordingFreq::default();
        let gpu = FakeGpu::default();
        *gpu.idle.lock() = Some(true);
        let load = ScriptedLoad::new(&[0, 0, 0]);
        let mut engine = Engine::new(
            Arc::new(TunableStore::default()),
            Arc::new(ManualClock::default()),
            Box::new(topology),
            Box::new(load),
            Box::new(freq.clone()),
        )
        .with_gpu(Box::new(gpu.clone()));

        engine.run_cycle();
        engine.run_cycle();
        *gpu.idle.lock() = Some(false);
        engine.run_cycle();

        let profiles: Vec<_> = freq
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                FreqCall::Profile(p) => Some(p),
                _ => None,
            })
            .collect();
        let table = GovernorProfiles::default();
        assert_eq!(profiles, vec![table.select(GpuState::Idle, 1), table.select(GpuState::Busy, 1)]);
    }

    /// Engine on the default tunables for `kind`, reading `/proc` fixtures from `dir`.
    fn proc_engine(dir: &ScratchDir, kind: LoadSourceKind, topology: &FakeTopology) -> Engine {
        let tunables = Tunables {
            dynamic_scaling: false,
            ..Tunables::for_source(kind)
        };
        Engine::new(
            Arc::new(TunableStore::new(tunables)),
            Arc::new(ManualClock::default()),
            Box::new(topology.clone()),
            Box::new(ProcStatLoad::new(kind, &dir.0, &dir.0)),
            Box::new(RecordingFreq::default()),
        )
    }

    #[test]
    fn test_saturated_core_onlines_on_busy_defaults() {
        let dir = ScratchDir::new("engine-busy");
        let topology = FakeTopology::new(2, 1);
        let mut engine = proc_engine(&dir, LoadSourceKind::Busy, &topology);

        let mut onlined_at = None;
        for cycle in 1..=40u64 {
            // cpu0 spends every jiffy busy.
            dir.write("stat", &format!("cpu  {0} 0 0 0 0 0 0 0\ncpu0 {0} 0 0 0 0 0 0 0\n", cycle * 100));
            if engine.run_cycle().unwrap().action == Action::Onlined(CpuList::from_slice(&[1])) {
                onlined_at = Some(cycle);
                break;
            }
        }
        // First cycle has no delta, then 100 per cycle: the average reaches 80 >= 75 on cycle 9.
        assert_eq!(onlined_at, Some(9));
        assert_eq!(topology.online_count_now(), 2);
    }

    #[test]
    fn test_runnable_threads_online_on_default_tunables() {
        let dir = ScratchDir::new("engine-runnable");
        dir.write("loadavg", "3.10 2.00 1.00 3/250 4242\n");
        dir.write("stat", "cpu0 100 0 0 0 0 0 0 0\n");
        let topology = FakeTopology::new(2, 1);
        let mut engine = proc_engine(&dir, LoadSourceKind::DEFAULT, &topology);

        for _ in 0..9 {
            assert_eq!(engine.run_cycle().unwrap().action, Action::Hold);
        }
        // Ten samples of 300 average past 275.
        let report = engine.run_cycle().unwrap();
        assert_eq!(report.avg_load, 300);
        assert_eq!(report.action, Action::Onlined(CpuList::from_slice(&[1])));
        assert_eq!(topology.online_count_now(), 2);
    }
}
