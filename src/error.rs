//! Error taxonomy for the hotplug controller.
//!
//! Nothing here is fatal once the controller runs: every variant degrades to
//! "do nothing this cycle, try again next cycle".

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotplugError {
    /// The topology collaborator rejected an online/offline request.
    #[error("cpu{cpu} hotplug failed: {reason}")]
    HotplugFailed { cpu: u32, reason: String },

    /// Policy rejection: the CPU has not stayed online for `min_time_online`.
    #[error("cpu{0} has not been online long enough to go offline")]
    TooSoonToOffline(u32),

    /// CPU 0 is permanently online.
    #[error("cpu{0} is the primary core and cannot go offline")]
    PrimaryCpu(u32),

    #[error("load source unavailable: {0}")]
    LoadSourceUnavailable(String),

    #[error("invalid value {value} for {name} (allowed {min}..={max})")]
    InvalidTunable { name: &'static str, value: u64, min: u32, max: u32 },

    #[error("cpu{cpu} frequency control failed: {reason}")]
    FreqControlFailed { cpu: u32, reason: String },
}

pub type HotplugResult<T> = Result<T, HotplugError>;

impl HotplugError {
    /// Expected, frequent rejections that should not reach the failure log.
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::TooSoonToOffline(_) | Self::PrimaryCpu(_))
    }
}
