//! Sources of screen, touch and configuration change notifications.
//!
//! The screen and config watchers are polled from the main loop; the touch
//! watcher owns a thread blocked on the evdev node.

use crate::events::{EventHub, PowerEvent, TouchEvent};
use crate::log;
use std::fs::{self, File};
use std::io::{self, Read};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

/// Polls a backlight brightness file. Brightness 0 means the screen is off.
#[derive(Debug)]
pub struct ScreenWatcher {
    path: PathBuf,
    screen_on: Option<bool>,
}

impl ScreenWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            screen_on: None,
        }
    }

    /// Returns an event when the screen state changed since the last poll.
    ///
    /// The first poll reports only a screen that is already off. An unreadable file reports nothing.
    pub fn poll(&mut self) -> Option<PowerEvent> {
        let brightness: u64 = fs::read_to_string(&self.path).ok()?.trim().parse().ok()?;
        let on = brightness > 0;
        let previous = self.screen_on.replace(on);
        match (previous, on) {
            (Some(was), now) if was == now => None,
            (None, true) => None,
            (_, true) => Some(PowerEvent::ScreenOn),
            (_, false) => Some(PowerEvent::ScreenOff),
        }
    }
}

pub const EV_KEY: u16 = 0x01;
pub const EV_ABS: u16 = 0x03;
pub const BTN_TOUCH: u16 = 0x14a;
pub const ABS_MT_TRACKING_ID: u16 = 0x39;

/// `struct input_event`: a `timeval` (two native words) followed by type, code and value.
pub const INPUT_EVENT_SIZE: usize = 2 * size_of::<usize>() + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

/// Decodes one native-endian `input_event` record. `None` if `buf` is short.
pub fn parse_input_event(buf: &[u8]) -> Option<InputEvent> {
    let base = 2 * size_of::<usize>();
    let field = buf.get(base..base + 8)?;
    Some(InputEvent {
        kind: u16::from_ne_bytes([field[0], field[1]]),
        code: u16::from_ne_bytes([field[2], field[3]]),
        value: i32::from_ne_bytes([field[4], field[5], field[6], field[7]]),
    })
}

/// Turns the raw event stream into one `Start` per touch-down.
#[derive(Debug, Default)]
pub struct TouchDecoder {
    down: bool,
}

impl TouchDecoder {
    pub fn feed(&mut self, event: InputEvent) -> Option<TouchEvent> {
        let pressed = match (event.kind, event.code) {
            (EV_KEY, BTN_TOUCH) => event.value != 0,
            (EV_ABS, ABS_MT_TRACKING_ID) => event.value != -1,
            _ => return None,
        };
        let started = pressed && !self.down;
        self.down = pressed;
        started.then_some(TouchEvent::Start)
    }
}

/// Reads touch events from an evdev node on a dedicated thread.
pub struct TouchWatcher;

impl TouchWatcher {
    pub fn spawn(device: impl Into<PathBuf>, hub: Arc<EventHub<TouchEvent>>) -> io::Result<JoinHandle<()>> {
        let device = device.into();
        let mut file = File::open(&device)?;
        thread::Builder::new().name("touch".to_string()).spawn(move || {
            let mut decoder = TouchDecoder::default();
            let mut buf = [0u8; INPUT_EVENT_SIZE];
            loop {
                if let Err(e) = file.read_exact(&mut buf) {
                    log!("touch: stopped reading {}: {}", device.display(), e);
                    return;
                }
                if let Some(event) = parse_input_event(&buf).and_then(|ev| decoder.feed(ev)) {
                    hub.emit(&event);
                }
            }
        })
    }
}

/// Detects config file edits by modification time.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = Self::modified(&path);
        Self { path, last_modified }
    }

    fn modified(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// True once per change of the file's mtime (including creation).
    pub fn changed(&mut self) -> bool {
        let current = Self::modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return false;
        }
        self.last_modified = current;
        true
    }
}
