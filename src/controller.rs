//! Worker thread that drives the [`Engine`] on its self-rescheduling period.
//!
//! The engine and the next deadline sit behind one `parking_lot::Mutex`. The
//! worker sleeps on a `Condvar` until the deadline and runs the cycle while
//! holding the lock. Suspend, resume and touch take the same lock, so they
//! wait for an in-flight cycle to finish before changing state, and a suspend
//! that clears the deadline guarantees no further cycle runs until resume.

use crate::engine::{ControllerState, Engine};
use crate::events::{EventHub, PowerEvent, SubscriptionId, TouchEvent};
use crate::log;
use crate::platform::CpuList;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct Slot {
    engine: Engine,
    /// `None` while suspended.
    deadline: Option<Instant>,
    shutdown: bool,
    cycles: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
}

/// Cloneable entry point for event callbacks and the main loop.
#[derive(Clone)]
pub struct ControllerHandle {
    shared: Arc<Shared>,
}

pub struct Controller {
    handle: ControllerHandle,
    worker: Option<JoinHandle<()>>,
}

impl Controller {
    /// Spawns the worker. The first cycle runs after `initial_delay`.
    pub fn start(engine: Engine, initial_delay: Duration) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                engine,
                deadline: Some(Instant::now() + initial_delay),
                shutdown: false,
                cycles: 0,
            }),
            wake: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new().name("hotplug".to_string()).spawn(move || run_worker(&worker_shared))?;
        Ok(Self {
            handle: ControllerHandle { shared },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else { return };
        self.handle.shared.slot.lock().shutdown = true;
        self.handle.shared.wake.notify_all();
        if worker.join().is_err() {
            log!("controller: worker thread panicked");
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: &Shared) {
    let mut slot = shared.slot.lock();
    while !slot.shutdown {
        let deadline = slot.deadline;
        match deadline {
            None => shared.wake.wait(&mut slot),
            Some(deadline) if Instant::now() < deadline => {
                shared.wake.wait_until(&mut slot, deadline);
            }
            Some(_) => {
                slot.cycles += 1;
                slot.deadline = slot
                    .engine
                    .run_cycle()
                    .map(|report| Instant::now() + Duration::from_millis(report.next_period_ms));
            }
        }
    }
}

impl ControllerHandle {
    /// Screen off. Blocks until any in-flight cycle has finished; no cycle runs afterwards until resume.
    pub fn suspend(&self) {
        let mut slot = self.shared.slot.lock();
        slot.deadline = None;
        slot.engine.suspend();
    }

    /// Screen on. Runs the next cycle immediately.
    pub fn resume(&self) {
        let mut slot = self.shared.slot.lock();
        slot.engine.resume();
        slot.deadline = Some(Instant::now());
        drop(slot);
        self.shared.wake.notify_all();
    }

    pub fn touch(&self) -> CpuList {
        self.shared.slot.lock().engine.touch()
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        f(&mut self.shared.slot.lock().engine)
    }

    pub fn state(&self) -> ControllerState {
        self.shared.slot.lock().engine.state()
    }

    /// Cycles run since start.
    pub fn cycles(&self) -> u64 {
        self.shared.slot.lock().cycles
    }

    pub fn is_armed(&self) -> bool {
        self.shared.slot.lock().deadline.is_some()
    }

    /// Routes screen and touch notifications to this controller.
    pub fn attach(&self, power: &EventHub<PowerEvent>, touch: &EventHub<TouchEvent>) -> [SubscriptionId; 3] {
        let on_off = self.clone();
        let on_on = self.clone();
        let on_touch = self.clone();
        [
            power.on_suspend(move || on_off.suspend()),
            power.on_resume(move || on_on.resume()),
            touch.on_touch_start(move || {
                on_touch.touch();
            }),
        ]
    }
}
