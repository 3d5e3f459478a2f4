//! Command-line argument parsing and help display.
//!
//! Handles parsing of command-line arguments and displays help messages.

use crate::governor::GovernorProfiles;
use crate::stat::LoadSourceKind;
use crate::sysfs::DEFAULT_CPU_ROOT;
use crate::tunables::{Tunable, TunableStore, Tunables};
use crate::{log, logging::use_console};

/// Values collected from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub help_mode: bool,
    pub help_all_mode: bool,
    pub console: bool,
    pub validate_mode: bool,
    pub dry_run: bool,
    pub config_file_name: String,
    /// Watcher poll interval.
    pub interval_ms: u64,
    /// Delay before the first decision cycle.
    pub delay_ms: u64,
    pub loop_count: Option<u32>,
    pub log_loop: bool,
    pub load_source: Option<LoadSourceKind>,
    pub cpu_root: String,
    pub screen_file: Option<String>,
    pub touch_device: Option<String>,
    pub gpu_file: Option<String>,
    pub no_root_check: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            help_mode: false,
            help_all_mode: false,
            console: false,
            validate_mode: false,
            dry_run: false,
            config_file_name: "hotplug.ini".to_string(),
            interval_ms: 500,
            delay_ms: 10_000,
            loop_count: None,
            log_loop: false,
            load_source: None,
            cpu_root: DEFAULT_CPU_ROOT.to_string(),
            screen_file: None,
            touch_device: None,
            gpu_file: None,
            no_root_check: false,
        }
    }
}

/// Parses command-line arguments. Unknown arguments are ignored; `args[0]` is the program name.
pub fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs::default();
    let mut i = 1;
    while i < args.len() {
        let has_value = i + 1 < args.len();
        match args[i].as_str() {
            "-help" | "--help" | "-?" | "?" => {
                cli.help_mode = true;
            }
            "-helpall" | "--helpall" => {
                cli.help_all_mode = true;
            }
            "-console" => {
                cli.console = true;
            }
            "-validate" => {
                cli.validate_mode = true;
            }
            "-dryrun" | "-dry-run" | "--dry-run" => {
                cli.dry_run = true;
            }
            "-noRootCheck" | "-norootcheck" => {
                cli.no_root_check = true;
            }
            "-logloop" => {
                cli.log_loop = true;
            }
            "-interval" if has_value => {
                cli.interval_ms = args[i + 1].parse().unwrap_or(500).max(16);
                i += 1;
            }
            "-delay" if has_value => {
                cli.delay_ms = args[i + 1].parse().unwrap_or(10_000);
                i += 1;
            }
            "-loop" if has_value => {
                cli.loop_count = Some(args[i + 1].parse().unwrap_or(1).max(1));
                i += 1;
            }
            "-config" if has_value => {
                cli.config_file_name = args[i + 1].clone();
                i += 1;
            }
            "-source" if has_value => {
                cli.load_source = LoadSourceKind::from_str(&args[i + 1]);
                if cli.load_source.is_none() {
                    log!("unknown load source '{}', using the config or default", args[i + 1]);
                }
                i += 1;
            }
            "-sysfs" if has_value => {
                cli.cpu_root = args[i + 1].clone();
                i += 1;
            }
            "-screen" if has_value => {
                cli.screen_file = Some(args[i + 1].clone());
                i += 1;
            }
            "-touch" if has_value => {
                cli.touch_device = Some(args[i + 1].clone());
                i += 1;
            }
            "-gpu" if has_value => {
                cli.gpu_file = Some(args[i + 1].clone());
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    cli
}

/// Prints the basic help message.
pub fn print_help() {
    *use_console().lock() = true;
    log!("usage: HotplugServiceRust [args]");
    log!("");
    log!("A Linux daemon that onlines and offlines CPU cores to follow system load.");
    log!("");
    log!("Common Options:");
    log!("  -help | --help       show this help message");
    log!("  -console             output to console instead of log file");
    log!("  -config <file>       config file to use (default: hotplug.ini)");
    log!("  -source <kind>       load source: runnable, busy, busy_at_max (default: runnable)");
    log!("  -screen <file>       backlight brightness file, 0 = screen off");
    log!("  -touch <dev>         evdev touchscreen node, e.g. /dev/input/event2");
    log!("");
    log!("Modes:");
    log!("  -validate            validate config file syntax without running");
    log!("  -dryrun              log intended hotplug and frequency writes without applying them");
    log!("");
    log!("Config Format: @NAME=value or gpu_state,cores,up_threshold,timer_rate,min_sample_time");
    log!("  Example: @ENABLE_THRESHOLD=275");
    log!("  Example: busy,2,90,20000,40000");
    log!("");
    log!("Use -helpall for detailed options and debugging features.");
}

/// Returns configuration help lines, including every tunable with its default and range.
pub fn get_config_help_lines() -> Vec<String> {
    let defaults = TunableStore::new(Tunables::default());
    let mut lines: Vec<String> = [
        "============================================================================",
        "HotplugServiceRust Configuration Format",
        "============================================================================",
        "",
        "  # comment",
        "  @NAME=value                      set a tunable (name is case-insensitive)",
        "  @LOAD_SOURCE=runnable|busy|busy_at_max",
        "                                   busy sources default to thresholds 75/90/30",
        "  @GOVERNOR=<name>                 governor whose tunables are scaled",
        "  gpu_state,cores,up_threshold,timer_rate,min_sample_time",
        "                                   override one governor profile row",
        "",
        "----------------------------------------------------------------------------",
        "TUNABLES (default, range)",
        "----------------------------------------------------------------------------",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for field in Tunable::all() {
        let (min, max) = field.range();
        lines.push(format!("  {:<24} {:>9}   {}-{}", field.as_str().to_uppercase(), defaults.get(field), min, max));
    }
    lines.push(String::new());
    lines.push("----------------------------------------------------------------------------".to_string());
    lines.push("GOVERNOR PROFILES (defaults)".to_string());
    lines.push("----------------------------------------------------------------------------".to_string());
    for (gpu, cores, profile) in GovernorProfiles::default().iter() {
        lines.push(format!(
            "  {},{},{},{},{}",
            gpu.as_str(),
            cores,
            profile.up_threshold,
            profile.timer_rate_us,
            profile.min_sample_time_us
        ));
    }
    lines
}

/// Prints configuration format help to console.
pub fn print_config_help() {
    for line in get_config_help_lines() {
        log!("{}", line);
    }
}

/// Prints CLI help (command line arguments).
pub fn print_cli_help() {
    log!("usage: HotplugServiceRust [args]");
    log!("");
    log!("=== COMMAND LINE OPTIONS ===");
    log!("");
    log!("Basic Arguments:");
    log!("  -help | --help       print basic help message");
    log!("  -helpall | --helpall print this detailed help with debug options");
    log!("  -console             use console as output instead of log file");
    log!("  -config <file>       config file (hotplug.ini by default, missing file = defaults)");
    log!("  -source <kind>       runnable, busy or busy_at_max (overrides @LOAD_SOURCE)");
    log!("  -sysfs <dir>         cpu sysfs root ({} by default)", DEFAULT_CPU_ROOT);
    log!("  -screen <file>       brightness file polled for screen on/off");
    log!("  -touch <dev>         evdev node read for touch-down events");
    log!("  -gpu <file>          GPU busy file, 0 = idle (absent = busy)");
    log!("  -interval <ms>       poll interval for screen and config changes (500 by default, minimal 16)");
    log!("  -delay <ms>          delay before the first decision cycle (10000 by default)");
    log!("  -noRootCheck         run without checking for root");
    log!("");
    log!("Operating Modes:");
    log!("  -validate            validate config file and exit");
    log!("  -dryrun              simulate hotplug and frequency writes (shows what would happen)");
    log!("");
    log!("Debug & Testing Options:");
    log!("  -loop <count>        number of poll loops to run (default: infinite) - for testing");
    log!("  -logloop             log every decision cycle");
    log!("");
    log!("=== DEBUGGING ===");
    log!("");
    log!("Quick debug command (non-root):");
    log!("  HotplugServiceRust -console -dryrun -noRootCheck -logloop -loop 20 -delay 0 -config test.ini");
    log!("");
    log!("Root run (check log file after):");
    log!("  HotplugServiceRust -logloop -loop 60 -config test.ini");
    log!("  Then check: logs/YYYYMMDD.log and logs/YYYYMMDD.fail.log");
    log!("");
}

/// Prints the detailed help message with all options (CLI + Config).
pub fn print_help_all() {
    *use_console().lock() = true;
    print_cli_help();
    log!("");
    print_config_help();
}
