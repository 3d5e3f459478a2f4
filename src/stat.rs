//! CPU time snapshots and the `/proc` based load sources.
//!
//! A [`CpuStatSnapshot`] captures the per-CPU jiffy counters of `/proc/stat`
//! at one point in time. Busy percentages are derived from the difference
//! between two snapshots, so the first sample after start has nothing to diff
//! against and reports the source as unavailable.

use crate::error::{HotplugError, HotplugResult};
use crate::platform::{LoadScope, LoadSource};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::PathBuf;

/// Busy and total jiffies of one CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

/// Per-CPU counters parsed from `/proc/stat`. Offline CPUs are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuStatSnapshot {
    pub per_cpu: FxHashMap<u32, CpuTimes>,
}

impl CpuStatSnapshot {
    /// Takes a snapshot of `/proc/stat` under `proc_root`.
    pub fn take(proc_root: &std::path::Path) -> HotplugResult<Self> {
        let text = fs::read_to_string(proc_root.join("stat")).map_err(|e| HotplugError::LoadSourceUnavailable(format!("stat: {}", e)))?;
        Ok(Self::parse(&text))
    }

    /// Parses the `cpuN user nice system idle iowait irq softirq steal ...` lines.
    pub fn parse(text: &str) -> Self {
        let mut per_cpu = FxHashMap::default();
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let Some(label) = fields.next() else { continue };
            let Some(cpu) = label.strip_prefix("cpu").and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let values: Vec<u64> = fields.take(8).filter_map(|v| v.parse().ok()).collect();
            if values.len() < 4 {
                continue;
            }
            let total: u64 = values.iter().sum();
            // idle + iowait
            let idle = values[3] + values.get(4).copied().unwrap_or(0);
            per_cpu.insert(
                cpu,
                CpuTimes {
                    busy: total.saturating_sub(idle),
                    total,
                },
            );
        }
        Self { per_cpu }
    }

    /// Busy percent of `cpu` between `prev` and `self`. `None` if the CPU is missing
    /// from either snapshot or no time elapsed.
    pub fn busy_percent(&self, prev: &Self, cpu: u32) -> Option<u32> {
        let now = self.per_cpu.get(&cpu)?;
        let before = prev.per_cpu.get(&cpu)?;
        let total = now.total.checked_sub(before.total)?;
        if total == 0 {
            return None;
        }
        let busy = now.busy.saturating_sub(before.busy).min(total);
        Some((busy * 100 / total) as u32)
    }
}

/// Number of runnable threads from the fourth field of `/proc/loadavg` (`running/total`).
pub fn parse_runnable(loadavg: &str) -> Option<u32> {
    let field = loadavg.split_whitespace().nth(3)?;
    field.split_once('/')?.0.parse().ok()
}

/// Raw load figure the controller averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSourceKind {
    /// Runnable threads × 100.
    Runnable,
    /// Sum of per-CPU busy percent.
    Busy,
    /// Sum of per-CPU busy percent scaled by current / max frequency.
    BusyAtMaxFreq,
}

impl LoadSourceKind {
    /// (variant, config name, enable, enable_all, disable) with thresholds per online core.
    ///
    /// Busy figures top out at 100 per core, so they need thresholds below that.
    const TABLE: &'static [(Self, &'static str, u32, u32, u32)] = &[
        (Self::Runnable, "runnable", 275, 425, 125),
        (Self::Busy, "busy", 75, 90, 30),
        (Self::BusyAtMaxFreq, "busy_at_max", 75, 90, 30),
    ];

    pub const DEFAULT: Self = Self::Runnable;

    fn row(&self) -> &'static (Self, &'static str, u32, u32, u32) {
        Self::TABLE.iter().find(|row| row.0 == *self).unwrap_or(&Self::TABLE[0])
    }

    /// Human readable name for this variant.
    pub fn as_str(&self) -> &'static str {
        self.row().1
    }

    /// Default `(enable, enable_all, disable)` thresholds for this figure.
    pub fn default_thresholds(&self) -> (u32, u32, u32) {
        let &(_, _, enable, enable_all, disable) = self.row();
        (enable, enable_all, disable)
    }

    /// Parse from string (case-insensitive match against known names).
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::TABLE.iter().find(|row| row.1 == s.as_str()).map(|row| row.0)
    }
}

/// `/proc` and cpufreq backed [`LoadSource`].
pub struct ProcStatLoad {
    kind: LoadSourceKind,
    proc_root: PathBuf,
    cpu_root: PathBuf,
    prev: Option<CpuStatSnapshot>,
    /// Whether the last system sample could read `/proc/stat`.
    readable: bool,
    /// Per-CPU load from the last system sample.
    per_cpu: FxHashMap<u32, u32>,
}

impl ProcStatLoad {
    pub fn new(kind: LoadSourceKind, proc_root: impl Into<PathBuf>, cpu_root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            proc_root: proc_root.into(),
            cpu_root: cpu_root.into(),
            prev: None,
            readable: false,
            per_cpu: FxHashMap::default(),
        }
    }

    fn read_khz(&self, cpu: u32, file: &str) -> Option<u64> {
        let path = self.cpu_root.join(format!("cpu{}", cpu)).join("cpufreq").join(file);
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    /// Busy percent scaled by how far below max frequency the CPU ran.
    fn scale_to_max_freq(&self, cpu: u32, busy: u32) -> u32 {
        match (self.read_khz(cpu, "scaling_cur_freq"), self.read_khz(cpu, "cpuinfo_max_freq")) {
            (Some(cur), Some(max)) if max > 0 => (busy as u64 * cur.min(max) / max) as u32,
            _ => busy,
        }
    }

    fn refresh(&mut self) -> HotplugResult<()> {
        self.per_cpu.clear();
        let snapshot = CpuStatSnapshot::take(&self.proc_root);
        self.readable = snapshot.is_ok();
        let snapshot = snapshot?;
        let Some(prev) = self.prev.replace(snapshot.clone()) else {
            return Err(HotplugError::LoadSourceUnavailable("first snapshot, no delta yet".to_string()));
        };
        for &cpu in snapshot.per_cpu.keys() {
            let Some(busy) = snapshot.busy_percent(&prev, cpu) else { continue };
            let load = match self.kind {
                LoadSourceKind::BusyAtMaxFreq => self.scale_to_max_freq(cpu, busy),
                _ => busy,
            };
            self.per_cpu.insert(cpu, load);
        }
        Ok(())
    }

    fn runnable(&self) -> HotplugResult<u32> {
        let text = fs::read_to_string(self.proc_root.join("loadavg")).map_err(|e| HotplugError::LoadSourceUnavailable(format!("loadavg: {}", e)))?;
        parse_runnable(&text)
            .map(|running| running.saturating_mul(100))
            .ok_or_else(|| HotplugError::LoadSourceUnavailable(format!("unparsable loadavg: {}", text.trim())))
    }
}

impl LoadSource for ProcStatLoad {
    fn sample(&mut self, scope: LoadScope) -> HotplugResult<u32> {
        match scope {
            LoadScope::System => {
                let refreshed = self.refresh();
                match self.kind {
                    // Per-CPU loads are still needed for the hysteresis counters.
                    LoadSourceKind::Runnable => self.runnable(),
                    _ => refreshed.map(|_| self.per_cpu.values().sum()),
                }
            }
            // A CPU missing from the delta was just onlined (or this was the first snapshot).
            LoadScope::Cpu(cpu) if self.readable => Ok(self.per_cpu.get(&cpu).copied().unwrap_or(0)),
            LoadScope::Cpu(_) => Err(HotplugError::LoadSourceUnavailable("no /proc/stat snapshot".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fakes::ScratchDir;

    const STAT_A: &str = "cpu  400 0 200 1400 0 0 0 0 0 0\n\
cpu0 100 0 50 300 50 0 0 0 0 0\n\
cpu1 100 0 50 350 0 0 0 0 0 0\n\
intr 12345\n";

    const STAT_B: &str = "cpu  700 0 300 1600 0 0 0 0 0 0\n\
cpu0 200 0 100 330 70 0 0 0 0 0\n\
cpu1 100 0 50 450 0 0 0 0 0 0\n\
cpu2 10 0 10 80 0 0 0 0 0 0\n";

    #[test]
    fn test_parse_skips_aggregate_line() {
        let snapshot = CpuStatSnapshot::parse(STAT_A);
        assert_eq!(snapshot.per_cpu.len(), 2);
        assert_eq!(snapshot.per_cpu[&0], CpuTimes { busy: 150, total: 500 });
    }

    #[test]
    fn test_busy_percent_between_snapshots() {
        let a = CpuStatSnapshot::parse(STAT_A);
        let b = CpuStatSnapshot::parse(STAT_B);
        // cpu0: busy 150 -> 300, total 500 -> 700: 150 / 200
        assert_eq!(b.busy_percent(&a, 0), Some(75));
        // cpu1: only idle advanced.
        assert_eq!(b.busy_percent(&a, 1), Some(0));
        // cpu2 came online between the snapshots.
        assert_eq!(b.busy_percent(&a, 2), None);
        assert_eq!(a.busy_percent(&a, 0), None);
    }

    #[test]
    fn test_parse_runnable() {
        assert_eq!(parse_runnable("0.52 0.58 0.59 3/467 12345"), Some(3));
        assert_eq!(parse_runnable("garbage"), None);
    }

    #[test]
    fn test_load_source_kind_names() {
        assert_eq!(LoadSourceKind::from_str("Busy_At_Max"), Some(LoadSourceKind::BusyAtMaxFreq));
        assert_eq!(LoadSourceKind::Runnable.as_str(), "runnable");
        assert_eq!(LoadSourceKind::from_str("nope"), None);
    }

    #[test]
    fn test_missing_proc_is_unavailable() {
        let mut load = ProcStatLoad::new(LoadSourceKind::Busy, "/nonexistent-proc-root", "/nonexistent-cpu-root");
        assert!(matches!(load.sample(LoadScope::System), Err(HotplugError::LoadSourceUnavailable(_))));
        assert!(matches!(load.sample(LoadScope::Cpu(0)), Err(HotplugError::LoadSourceUnavailable(_))));
    }

    #[test]
    fn test_cpu_missing_from_delta_reads_zero() {
        let dir = ScratchDir::new("stat-new-cpu");
        dir.write("stat", STAT_A);
        let mut load = ProcStatLoad::new(LoadSourceKind::Busy, &dir.0, &dir.0);
        assert!(load.sample(LoadScope::System).is_err());
        // First snapshot: readable, nothing to diff yet.
        assert_eq!(load.sample(LoadScope::Cpu(0)), Ok(0));

        dir.write("stat", STAT_B);
        assert_eq!(load.sample(LoadScope::System), Ok(75));
        assert_eq!(load.sample(LoadScope::Cpu(0)), Ok(75));
        // cpu2 came online between the snapshots.
        assert_eq!(load.sample(LoadScope::Cpu(2)), Ok(0));

        fs::remove_file(dir.0.join("stat")).unwrap();
        assert!(load.sample(LoadScope::System).is_err());
        assert!(matches!(load.sample(LoadScope::Cpu(0)), Err(HotplugError::LoadSourceUnavailable(_))));
    }

    #[test]
    fn test_busy_thresholds_fit_under_one_core() {
        for kind in [LoadSourceKind::Busy, LoadSourceKind::BusyAtMaxFreq] {
            let (enable, enable_all, disable) = kind.default_thresholds();
            assert!(disable < enable && enable < enable_all && enable_all < 100);
        }
        assert_eq!(LoadSourceKind::DEFAULT.default_thresholds(), (275, 425, 125));
    }
}
