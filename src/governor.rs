/*!
Governor tunable profiles scaled by GPU state and online core count.

The frequency governor samples faster and ramps harder while the GPU is busy,
and relaxes its up-threshold and sampling rate while the GPU idles. The table
below is pushed to the governor whenever the (GPU state, online cores) pair
changes and the `dynamic_scaling` tunable is set.
*/

/// Number of online-core rows per GPU state. Larger core counts use the last row.
pub const PROFILE_CORES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuState {
    Idle,
    Busy,
}

impl GpuState {
    const TABLE: &'static [(Self, &'static str)] = &[(Self::Idle, "idle"), (Self::Busy, "busy")];

    /// Human readable name for this variant.
    pub fn as_str(&self) -> &'static str {
        Self::TABLE.iter().find(|(v, _)| v == self).map(|(_, name)| *name).unwrap_or("unknown")
    }

    /// Parse from string (case-insensitive match against known names).
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::TABLE.iter().find(|(_, name)| *name == s.as_str()).map(|(v, _)| *v)
    }

    /// An unreadable GPU counts as busy so the governor stays responsive.
    pub fn from_probe(idle: Option<bool>) -> Self {
        match idle {
            Some(true) => Self::Idle,
            _ => Self::Busy,
        }
    }

    fn row(self) -> usize {
        match self {
            Self::Idle => 0,
            Self::Busy => 1,
        }
    }
}

/// Governor tunables applied as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorProfile {
    /// Load percent at or above which the governor jumps to max frequency.
    pub up_threshold: u32,
    pub timer_rate_us: u32,
    /// Minimum time at a frequency before ramping down.
    pub min_sample_time_us: u32,
}

impl GovernorProfile {
    pub const fn new(up_threshold: u32, timer_rate_us: u32, min_sample_time_us: u32) -> Self {
        Self {
            up_threshold,
            timer_rate_us,
            min_sample_time_us,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorProfiles {
    table: [[GovernorProfile; PROFILE_CORES]; 2],
}

impl Default for GovernorProfiles {
    fn default() -> Self {
        Self {
            table: [
                [
                    GovernorProfile::new(100, 40_000, 10_000),
                    GovernorProfile::new(100, 40_000, 20_000),
                    GovernorProfile::new(100, 40_000, 30_000),
                    GovernorProfile::new(100, 40_000, 40_000),
                ],
                [
                    GovernorProfile::new(90, 20_000, 40_000),
                    GovernorProfile::new(90, 20_000, 40_000),
                    GovernorProfile::new(95, 20_000, 60_000),
                    GovernorProfile::new(95, 20_000, 80_000),
                ],
            ],
        }
    }
}

impl GovernorProfiles {
    fn column(online: u32) -> usize {
        (online.max(1) as usize).min(PROFILE_CORES) - 1
    }

    pub fn select(&self, gpu: GpuState, online: u32) -> GovernorProfile {
        self.table[gpu.row()][Self::column(online)]
    }

    /// Overrides one row. Returns false when `cores` is outside `1..=PROFILE_CORES`.
    pub fn set(&mut self, gpu: GpuState, cores: u32, profile: GovernorProfile) -> bool {
        if cores == 0 || cores as usize > PROFILE_CORES {
            return false;
        }
        self.table[gpu.row()][cores as usize - 1] = profile;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (GpuState, u32, GovernorProfile)> + '_ {
        [GpuState::Idle, GpuState::Busy]
            .into_iter()
            .flat_map(move |gpu| (1..=PROFILE_CORES as u32).map(move |cores| (gpu, cores, self.select(gpu, cores))))
    }
}
