mod actuator;
mod cli;
mod config;
mod controller;
mod engine;
mod error;
mod events;
mod governor;
mod hysteresis;
mod logging;
mod platform;
mod sampler;
mod stat;
mod sysfs;
mod tunables;
mod watch;

use cli::{CliArgs, parse_args, print_help, print_help_all};
use config::{HotplugConfig, format_cpu_indices, read_config};
use controller::{Controller, ControllerHandle};
use engine::Engine;
use events::{EventHub, PowerEvent, TouchEvent};
use logging::{flush, refresh_localtime, use_console};
use platform::{CpuTopology, FreqControl, MonotonicClock};
use stat::{LoadSourceKind, ProcStatLoad};
use std::{env, process, sync::Arc, thread, time::Duration};
use sysfs::{DryRunFreqControl, DryRunTopology, SysfsCpuTopology, SysfsFreqControl, SysfsGpuProbe, is_running_as_root};
use tunables::{TunableStore, Tunables};
use watch::{ConfigWatcher, ScreenWatcher, TouchWatcher};

/// Reads the config file. A missing or unreadable file means defaults.
fn load_config(path: &str) -> HotplugConfig {
    match read_config(path) {
        Ok(config) => config,
        Err(e) => {
            log!("cannot read config {} ({}), using defaults", path, e);
            HotplugConfig::default()
        }
    }
}

fn validate(cli: &CliArgs) {
    let config = match read_config(&cli.config_file_name) {
        Ok(config) => config,
        Err(e) => {
            log!("cannot read config {}: {}", cli.config_file_name, e);
            process::exit(1);
        }
    };
    log!(
        "{}: {} settings, load source {}, governor {}",
        cli.config_file_name,
        config.settings.len(),
        config.load_source.map_or("default", |kind| kind.as_str()),
        config.governor.as_deref().unwrap_or("current")
    );
    for (field, value) in &config.settings {
        log!("  {} = {}", field.as_str(), value);
    }
    if config.errors.is_empty() {
        log!("config is valid");
    } else {
        for error in &config.errors {
            log!("  error: {}", error);
        }
        log!("{} invalid lines", config.errors.len());
        flush();
        process::exit(1);
    }
}

fn reload_config(path: &str, tunables: &TunableStore, handle: &ControllerHandle) {
    match read_config(path) {
        Ok(config) => {
            let applied = config.apply_to(tunables);
            handle.with_engine(|engine| engine.set_profiles(config.profiles.clone()));
            log!("config reloaded: {} settings applied, {} lines skipped", applied, config.errors.len());
        }
        Err(e) => log!("config reload failed: {}", e),
    }
}

fn build_engine(cli: &CliArgs, config: &HotplugConfig, kind: LoadSourceKind, tunables: Arc<TunableStore>) -> Engine {
    let sysfs = match SysfsCpuTopology::new(&cli.cpu_root) {
        Ok(topology) => topology,
        Err(e) => {
            log!("cannot read CPU topology under {}: {}", cli.cpu_root, e);
            flush();
            process::exit(1);
        }
    };
    let (topology, freq): (Box<dyn CpuTopology>, Box<dyn FreqControl>) = if cli.dry_run {
        (Box::new(DryRunTopology::mirror(&sysfs)), Box::new(DryRunFreqControl))
    } else {
        (Box::new(sysfs), Box::new(SysfsFreqControl::new(&cli.cpu_root, config.governor.clone())))
    };
    let load = Box::new(ProcStatLoad::new(kind, "/proc", &cli.cpu_root));

    let mut engine = Engine::new(tunables, Arc::new(MonotonicClock::new()), topology, load, freq).with_profiles(config.profiles.clone());
    if let Some(gpu) = &cli.gpu_file {
        engine = engine.with_gpu(Box::new(SysfsGpuProbe::new(gpu)));
    }
    engine.set_log_cycles(cli.log_loop);
    engine
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let cli = parse_args(&args);
    if cli.console {
        *use_console().lock() = true;
    }
    if cli.help_mode {
        print_help();
        return;
    }
    if cli.help_all_mode {
        print_help_all();
        return;
    }
    if cli.validate_mode {
        validate(&cli);
        flush();
        return;
    }
    if !cli.dry_run && !cli.no_root_check && !is_running_as_root() {
        log!("writing to sysfs needs root; use -dryrun or -noRootCheck to run anyway");
        flush();
        process::exit(1);
    }

    let config = load_config(&cli.config_file_name);
    let kind = cli.load_source.or(config.load_source).unwrap_or(LoadSourceKind::DEFAULT);
    let tunables = Arc::new(TunableStore::new(Tunables::for_source(kind)));
    config.apply_to(&tunables);

    let engine = build_engine(&cli, &config, kind, tunables.clone());
    log!(
        "start: {} possible cpus, online {}, load source {}, first cycle in {}ms{}",
        engine.actuator().possible_cpu_count(),
        format_cpu_indices(&engine.actuator().online_cpus()),
        engine.load_source_name(),
        cli.delay_ms,
        if cli.dry_run { " (dry run)" } else { "" }
    );

    let controller = match Controller::start(engine, Duration::from_millis(cli.delay_ms)) {
        Ok(controller) => controller,
        Err(e) => {
            log!("cannot start controller thread: {}", e);
            flush();
            process::exit(1);
        }
    };
    let handle = controller.handle();

    let power: EventHub<PowerEvent> = EventHub::new();
    let touch: Arc<EventHub<TouchEvent>> = Arc::new(EventHub::new());
    handle.attach(&power, &touch);
    if let Some(device) = &cli.touch_device {
        if let Err(e) = TouchWatcher::spawn(device, touch.clone()) {
            log!("cannot open touch device {}: {}", device, e);
        }
    }
    let mut screen = cli.screen_file.as_ref().map(ScreenWatcher::new);
    let mut config_watcher = ConfigWatcher::new(&cli.config_file_name);

    let interval = Duration::from_millis(cli.interval_ms);
    let mut current_loop = 0u32;
    loop {
        refresh_localtime();
        if let Some(event) = screen.as_mut().and_then(|watcher| watcher.poll()) {
            power.emit(&event);
        }
        if config_watcher.changed() {
            reload_config(&cli.config_file_name, &tunables, &handle);
        }
        if cli.log_loop {
            let (state, since_touch) = handle.with_engine(|engine| (engine.state(), engine.ms_since_touch()));
            log!(
                "loop {}: {:?}{}, {} cycles, last touch {}",
                current_loop + 1,
                state,
                if handle.is_armed() { "" } else { " (timer idle)" },
                handle.cycles(),
                since_touch.map_or("never".to_string(), |ms| format!("{}ms ago", ms))
            );
        }
        flush();

        current_loop += 1;
        if cli.loop_count.is_some_and(|max| current_loop >= max) {
            break;
        }
        thread::sleep(interval);
    }

    controller.stop();
    log!("stopped after {} decision cycles", handle.cycles());
    flush();
}
