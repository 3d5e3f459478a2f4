//! Configuration parsing and management.
//!
//! Handles reading hotplug.ini files with tunables, the load source, the
//! governor name and governor profile overrides.
//!
//! ## Format
//! - `# comment` - Lines starting with `#` are ignored
//! - `@NAME=value` - Set a tunable (`@ENABLE_THRESHOLD=275`), `@LOAD_SOURCE=busy` or `@GOVERNOR=interactive`
//! - `gpu_state,cores,up_threshold,timer_rate,min_sample_time` - Override one governor profile row
//!
//! ## CPU Specification Format
//! - Single CPU: `5`
//! - Range: `0-7`
//! - Multiple ranges: `0-3,8` or `0-3;8`

use crate::governor::{GovernorProfile, GovernorProfiles, GpuState};
use crate::log;
use crate::logging::log_to_fail;
use crate::stat::LoadSourceKind;
use crate::tunables::{Tunable, TunableStore};
use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;

/// Everything read from one config file.
#[derive(Debug, Clone, Default)]
pub struct HotplugConfig {
    /// Range-checked tunable assignments in file order.
    pub settings: Vec<(Tunable, u32)>,
    pub profiles: GovernorProfiles,
    pub load_source: Option<LoadSourceKind>,
    pub governor: Option<String>,
    /// Skipped lines, already logged.
    pub errors: Vec<String>,
}

impl HotplugConfig {
    /// Stores every setting in `store`. Returns how many were applied.
    pub fn apply_to(&self, store: &TunableStore) -> usize {
        let mut applied = 0;
        for &(field, value) in &self.settings {
            match store.set(field, value as u64) {
                Ok(()) => applied += 1,
                Err(e) => log_to_fail(&format!("Config: {}", e)),
            }
        }
        applied
    }

    fn reject(&mut self, line_no: usize, msg: String) {
        let msg = format!("line {}: {}", line_no, msg);
        log_to_fail(&format!("Config: {}", msg));
        self.errors.push(msg);
    }

    fn parse_constant(&mut self, line_no: usize, name: &str, value: &str) {
        match name {
            "LOAD_SOURCE" => match LoadSourceKind::from_str(value) {
                Some(kind) => {
                    self.load_source = Some(kind);
                    log!("Config: LOAD_SOURCE = {}", kind.as_str());
                }
                None => self.reject(line_no, format!("unknown load source: {}", value)),
            },
            "GOVERNOR" if !value.is_empty() => {
                self.governor = Some(value.to_string());
                log!("Config: GOVERNOR = {}", value);
            }
            _ => {
                let Some(field) = Tunable::from_str(name) else {
                    self.reject(line_no, format!("unknown constant: {}", name));
                    return;
                };
                match value.parse::<u64>().map_err(|e| e.to_string()).and_then(|v| field.validate(v).map_err(|e| e.to_string())) {
                    Ok(v) => {
                        self.settings.push((field, v));
                        log!("Config: {} = {}", name, v);
                    }
                    Err(e) => self.reject(line_no, format!("{} = {}: {}", name, value, e)),
                }
            }
        }
    }

    fn parse_profile(&mut self, line_no: usize, line: &str) {
        let parts: Vec<&str> = line.split(',').map(|p| p.trim()).collect();
        if parts.len() != 5 {
            self.reject(line_no, format!("expected gpu_state,cores,up_threshold,timer_rate,min_sample_time: {}", line));
            return;
        }
        let Some(gpu) = GpuState::from_str(parts[0]) else {
            self.reject(line_no, format!("unknown gpu state: {}", parts[0]));
            return;
        };
        let numbers: Vec<u32> = parts[1..].iter().filter_map(|p| p.parse().ok()).collect();
        let &[cores, up_threshold, timer_rate, min_sample_time] = numbers.as_slice() else {
            self.reject(line_no, format!("invalid number in: {}", line));
            return;
        };
        if !self.profiles.set(gpu, cores, GovernorProfile::new(up_threshold, timer_rate, min_sample_time)) {
            self.reject(line_no, format!("core count out of range: {}", cores));
        }
    }
}

/// Parses a CPU specification string into a sorted, deduplicated vector of CPU indices.
///
/// # Examples
/// ```
/// parse_cpu_spec("0-3")      // -> [0, 1, 2, 3]
/// parse_cpu_spec("0-3,5")    // -> [0, 1, 2, 3, 5]
/// parse_cpu_spec("0;4;8")    // -> [0, 4, 8]
/// ```
pub fn parse_cpu_spec(s: &str) -> Vec<u32> {
    let mut cpus = Vec::new();
    for part in s.trim().split([',', ';']) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<u32>() {
            cpus.push(cpu);
        }
    }
    cpus.sort();
    cpus.dedup();
    cpus
}

/// Formats CPU indices as a human-readable string.
/// Used for logging.
pub fn format_cpu_indices(cpus: &[u32]) -> String {
    if cpus.is_empty() {
        return "none".to_string();
    }
    if cpus.len() <= 8 {
        return cpus.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",");
    }
    let mut result = String::new();
    let mut i = 0;
    while i < cpus.len() {
        let start = cpus[i];
        let mut end = start;
        while i + 1 < cpus.len() && cpus[i + 1] == end + 1 {
            i += 1;
            end = cpus[i];
        }
        if !result.is_empty() {
            result.push(';');
        }
        if start == end {
            result.push_str(&start.to_string());
        } else {
            result.push_str(&format!("{}-{}", start, end));
        }
        i += 1;
    }
    result
}

/// Parses config text. Malformed lines are logged, recorded in `errors` and skipped.
pub fn parse_config<I, S>(lines: I) -> HotplugConfig
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut config = HotplugConfig::default();
    for (index, line) in lines.into_iter().enumerate() {
        let line_no = index + 1;
        let line = line.as_ref().trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        } else if let Some(rest) = line.strip_prefix('@') {
            // define constant: @NAME=VALUE
            match rest.split_once('=') {
                Some((name, value)) => config.parse_constant(line_no, &name.trim().to_uppercase(), value.trim()),
                None => config.reject(line_no, format!("missing '=': {}", line)),
            }
        } else {
            config.parse_profile(line_no, line);
        }
    }
    config
}

/// Reads a hotplug configuration from an INI-style file.
pub fn read_config<P: AsRef<Path>>(path: P) -> io::Result<HotplugConfig> {
    let file = File::open(path)?;
    let lines = io::BufReader::new(file).lines().collect::<io::Result<Vec<String>>>()?;
    Ok(parse_config(lines))
}
