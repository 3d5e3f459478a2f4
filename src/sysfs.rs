//! Linux sysfs backends for the collaborator traits, plus dry-run stand-ins.
//!
//! Paths are rooted at a configurable directory (default
//! `/sys/devices/system/cpu`) so tests and `-dryrun` runs can point at a
//! scratch tree.

use crate::config::parse_cpu_spec;
use crate::error::{HotplugError, HotplugResult};
use crate::governor::GovernorProfile;
use crate::log;
use crate::platform::{BoostFloor, CpuTopology, FreqCap, FreqControl, GpuProbe};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_CPU_ROOT: &str = "/sys/devices/system/cpu";

fn read_trimmed(path: &Path) -> io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

fn read_u64(path: &Path) -> Option<u64> {
    read_trimmed(path).ok()?.parse().ok()
}

/// Hotplug through `cpuN/online`.
#[derive(Debug, Clone)]
pub struct SysfsCpuTopology {
    root: PathBuf,
    possible: u32,
}

impl SysfsCpuTopology {
    /// Reads the possible CPU range from `<root>/possible`, falling back to counting `cpuN` directories.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let possible = match read_trimmed(&root.join("possible")) {
            Ok(spec) => parse_cpu_spec(&spec).iter().max().map_or(0, |max| max + 1),
            Err(_) => fs::read_dir(&root)?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str()?.strip_prefix("cpu")?.parse::<u32>().ok())
                .max()
                .map_or(0, |max| max + 1),
        };
        if possible == 0 {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("no CPUs found under {}", root.display())));
        }
        Ok(Self { root, possible })
    }

    fn online_path(&self, cpu: u32) -> PathBuf {
        self.root.join(format!("cpu{}", cpu)).join("online")
    }

    fn write_online(&mut self, cpu: u32, value: &str) -> HotplugResult<()> {
        let path = self.online_path(cpu);
        if !path.exists() {
            return Err(HotplugError::HotplugFailed {
                cpu,
                reason: "not hotpluggable".to_string(),
            });
        }
        fs::write(&path, value).map_err(|e| HotplugError::HotplugFailed { cpu, reason: e.to_string() })
    }
}

impl CpuTopology for SysfsCpuTopology {
    fn possible_cpu_count(&self) -> u32 {
        self.possible
    }

    fn is_online(&self, cpu: u32) -> bool {
        let path = self.online_path(cpu);
        if path.exists() {
            read_trimmed(&path).map(|s| s == "1").unwrap_or(false)
        } else {
            // No online file: the CPU cannot be hotplugged and is always up.
            cpu < self.possible && self.root.join(format!("cpu{}", cpu)).exists()
        }
    }

    fn online(&mut self, cpu: u32) -> HotplugResult<()> {
        self.write_online(cpu, "1")
    }

    fn offline(&mut self, cpu: u32) -> HotplugResult<()> {
        self.write_online(cpu, "0")
    }
}

/// cpufreq limits and governor tunables.
#[derive(Debug, Clone)]
pub struct SysfsFreqControl {
    root: PathBuf,
    /// Governor whose tunables are written. Read from `cpu0/cpufreq/scaling_governor` when `None`.
    governor: Option<String>,
}

impl SysfsFreqControl {
    pub fn new(root: impl Into<PathBuf>, governor: Option<String>) -> Self {
        Self { root: root.into(), governor }
    }

    fn cpufreq(&self, cpu: u32) -> PathBuf {
        self.root.join(format!("cpu{}", cpu)).join("cpufreq")
    }

    fn write_khz(&self, cpu: u32, file: &str, khz: u64) -> HotplugResult<()> {
        fs::write(self.cpufreq(cpu).join(file), khz.to_string()).map_err(|e| HotplugError::FreqControlFailed {
            cpu,
            reason: format!("{}: {}", file, e),
        })
    }

    fn read_khz(&self, cpu: u32, file: &str) -> HotplugResult<u64> {
        read_u64(&self.cpufreq(cpu).join(file)).ok_or_else(|| HotplugError::FreqControlFailed {
            cpu,
            reason: format!("{} unreadable", file),
        })
    }

    fn governor_name(&self) -> Option<String> {
        self.governor.clone().or_else(|| read_trimmed(&self.cpufreq(0).join("scaling_governor")).ok())
    }

    /// Global tunables directory first, then the per-policy one.
    fn governor_dir(&self, governor: &str) -> Option<PathBuf> {
        [self.root.join("cpufreq").join(governor), self.cpufreq(0).join(governor)]
            .into_iter()
            .find(|dir| dir.is_dir())
    }
}

impl FreqControl for SysfsFreqControl {
    fn cap_max(&mut self, cpu: u32, cap: FreqCap) -> HotplugResult<()> {
        let khz = match cap {
            FreqCap::Limit(khz) => khz as u64,
            FreqCap::Uncapped => self.read_khz(cpu, "cpuinfo_max_freq")?,
        };
        self.write_khz(cpu, "scaling_max_freq", khz)
    }

    fn set_boost_floor(&mut self, cpu: u32, floor: Option<BoostFloor>) -> HotplugResult<()> {
        let khz = match floor {
            Some(floor) => {
                let max = self.read_khz(cpu, "scaling_max_freq").unwrap_or(u64::MAX);
                (floor.khz as u64).min(max)
            }
            None => self.read_khz(cpu, "cpuinfo_min_freq")?,
        };
        self.write_khz(cpu, "scaling_min_freq", khz)
    }

    fn apply_governor_profile(&mut self, profile: GovernorProfile) -> HotplugResult<()> {
        let unavailable = |reason: String| HotplugError::FreqControlFailed { cpu: 0, reason };
        let governor = self.governor_name().ok_or_else(|| unavailable("governor unknown".to_string()))?;
        let dir = self.governor_dir(&governor).ok_or_else(|| unavailable(format!("no tunables for governor {}", governor)))?;
        let values = [
            ("up_threshold", profile.up_threshold),
            ("timer_rate", profile.timer_rate_us),
            ("min_sample_time", profile.min_sample_time_us),
        ];
        for (file, value) in values {
            let path = dir.join(file);
            if !path.exists() {
                continue;
            }
            fs::write(&path, value.to_string()).map_err(|e| unavailable(format!("{}/{}: {}", governor, file, e)))?;
        }
        Ok(())
    }
}

/// GPU busy counter file. `0` means idle.
#[derive(Debug, Clone)]
pub struct SysfsGpuProbe {
    path: PathBuf,
}

impl SysfsGpuProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GpuProbe for SysfsGpuProbe {
    fn is_idle(&mut self) -> Option<bool> {
        read_u64(&self.path).map(|busy| busy == 0)
    }
}

/// Simulated topology seeded from the real one. Logs every write it would have made.
#[derive(Debug, Clone)]
pub struct DryRunTopology {
    online: Vec<bool>,
}

impl DryRunTopology {
    pub fn mirror(real: &dyn CpuTopology) -> Self {
        Self {
            online: (0..real.possible_cpu_count()).map(|cpu| real.is_online(cpu)).collect(),
        }
    }

    fn set(&mut self, cpu: u32, online: bool) -> HotplugResult<()> {
        let slot = self.online.get_mut(cpu as usize).ok_or_else(|| HotplugError::HotplugFailed {
            cpu,
            reason: "no such cpu".to_string(),
        })?;
        *slot = online;
        log!("dryrun: cpu{}/online <- {}", cpu, online as u8);
        Ok(())
    }
}

impl CpuTopology for DryRunTopology {
    fn possible_cpu_count(&self) -> u32 {
        self.online.len() as u32
    }

    fn is_online(&self, cpu: u32) -> bool {
        self.online.get(cpu as usize).copied().unwrap_or(false)
    }

    fn online(&mut self, cpu: u32) -> HotplugResult<()> {
        self.set(cpu, true)
    }

    fn offline(&mut self, cpu: u32) -> HotplugResult<()> {
        self.set(cpu, false)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunFreqControl;

impl FreqControl for DryRunFreqControl {
    fn cap_max(&mut self, cpu: u32, cap: FreqCap) -> HotplugResult<()> {
        match cap {
            FreqCap::Limit(khz) => log!("dryrun: cpu{}/cpufreq/scaling_max_freq <- {}", cpu, khz),
            FreqCap::Uncapped => log!("dryrun: cpu{}/cpufreq/scaling_max_freq <- cpuinfo_max_freq", cpu),
        }
        Ok(())
    }

    fn set_boost_floor(&mut self, cpu: u32, floor: Option<BoostFloor>) -> HotplugResult<()> {
        match floor {
            Some(floor) => log!("dryrun: cpu{}/cpufreq/scaling_min_freq <- {} until {}ms", cpu, floor.khz, floor.until_ms),
            None => log!("dryrun: cpu{}/cpufreq/scaling_min_freq <- cpuinfo_min_freq", cpu),
        }
        Ok(())
    }

    fn apply_governor_profile(&mut self, profile: GovernorProfile) -> HotplugResult<()> {
        log!(
            "dryrun: governor up_threshold={} timer_rate={} min_sample_time={}",
            profile.up_threshold,
            profile.timer_rate_us,
            profile.min_sample_time_us
        );
        Ok(())
    }
}

/// Parses the effective uid from the `Uid:` line of `/proc/<pid>/status`.
fn effective_uid(status: &str) -> Option<u32> {
    let line = status.lines().find(|line| line.starts_with("Uid:"))?;
    line.split_whitespace().nth(2)?.parse().ok()
}

/// Checks if the current process runs with an effective uid of 0.
pub fn is_running_as_root() -> bool {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| effective_uid(&status))
        .is_some_and(|uid| uid == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fakes::ScratchDir;

    fn cpu_tree(name: &str) -> ScratchDir {
        let dir = ScratchDir::new(name);
        dir.write("possible", "0-3\n");
        dir.write("cpu0/cpufreq/cpuinfo_max_freq", "1512000\n");
        for cpu in 1..4 {
            dir.write(&format!("cpu{}/online", cpu), if cpu == 1 { "1\n" } else { "0\n" });
            dir.write(&format!("cpu{}/cpufreq/cpuinfo_max_freq", cpu), "1512000\n");
            dir.write(&format!("cpu{}/cpufreq/cpuinfo_min_freq", cpu), "384000\n");
            dir.write(&format!("cpu{}/cpufreq/scaling_max_freq", cpu), "1512000\n");
            dir.write(&format!("cpu{}/cpufreq/scaling_min_freq", cpu), "384000\n");
        }
        dir
    }

    #[test]
    fn test_topology_reads_possible_and_online() {
        let dir = cpu_tree("topology");
        let mut topology = SysfsCpuTopology::new(&dir.0).unwrap();
        assert_eq!(topology.possible_cpu_count(), 4);
        // cpu0 has no online file.
        assert!(topology.is_online(0));
        assert_eq!(topology.online_cpus().as_slice(), &[0, 1]);

        topology.online(3).unwrap();
        assert_eq!(dir.read("cpu3/online"), "1");
        topology.offline(1).unwrap();
        assert_eq!(dir.read("cpu1/online"), "0");
        assert!(matches!(topology.offline(0), Err(HotplugError::HotplugFailed { cpu: 0, .. })));
    }

    #[test]
    fn test_freq_caps_and_floors() {
        let dir = cpu_tree("freq");
        let mut freq = SysfsFreqControl::new(&dir.0, Some("interactive".to_string()));
        freq.cap_max(1, FreqCap::Limit(702_000)).unwrap();
        assert_eq!(dir.read("cpu1/cpufreq/scaling_max_freq"), "702000");
        freq.cap_max(1, FreqCap::Uncapped).unwrap();
        assert_eq!(dir.read("cpu1/cpufreq/scaling_max_freq"), "1512000");

        freq.set_boost_floor(2, Some(BoostFloor { khz: 2_000_000, until_ms: 10 })).unwrap();
        // Clamped to the current max.
        assert_eq!(dir.read("cpu2/cpufreq/scaling_min_freq"), "1512000");
        freq.set_boost_floor(2, None).unwrap();
        assert_eq!(dir.read("cpu2/cpufreq/scaling_min_freq"), "384000");
    }

    #[test]
    fn test_governor_profile_skips_missing_files() {
        let dir = cpu_tree("governor");
        dir.write("cpufreq/interactive/up_threshold", "90\n");
        dir.write("cpufreq/interactive/timer_rate", "20000\n");
        let mut freq = SysfsFreqControl::new(&dir.0, Some("interactive".to_string()));
        freq.apply_governor_profile(GovernorProfile::new(100, 40_000, 10_000)).unwrap();
        assert_eq!(dir.read("cpufreq/interactive/up_threshold"), "100");
        assert_eq!(dir.read("cpufreq/interactive/timer_rate"), "40000");
        assert!(!dir.0.join("cpufreq/interactive/min_sample_time").exists());

        let mut missing = SysfsFreqControl::new(&dir.0, Some("ondemand".to_string()));
        assert!(missing.apply_governor_profile(GovernorProfile::new(100, 40_000, 10_000)).is_err());
    }

    #[test]
    fn test_gpu_probe() {
        let dir = ScratchDir::new("gpu");
        dir.write("gpubusy", "0\n");
        let mut probe = SysfsGpuProbe::new(dir.0.join("gpubusy"));
        assert_eq!(probe.is_idle(), Some(true));
        dir.write("gpubusy", "37\n");
        assert_eq!(probe.is_idle(), Some(false));
        let mut absent = SysfsGpuProbe::new(dir.0.join("nope"));
        assert_eq!(absent.is_idle(), None);
    }

    #[test]
    fn test_dry_run_mirrors_without_writing() {
        let dir = cpu_tree("dryrun");
        let real = SysfsCpuTopology::new(&dir.0).unwrap();
        let mut dry = DryRunTopology::mirror(&real);
        dry.online(2).unwrap();
        assert!(dry.is_online(2));
        assert_eq!(dir.read("cpu2/online"), "0");
    }

    #[test]
    fn test_effective_uid() {
        let status = "Name:\tcat\nUid:\t1000\t0\t0\t0\nGid:\t1000\t1000\t1000\t1000\n";
        assert_eq!(effective_uid(status), Some(0));
        assert_eq!(effective_uid("Name:\tcat\n"), None);
    }
}
