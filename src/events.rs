//! Observer registration for display power and touch notifications.
//!
//! Producers (the screen and touch watchers) call [`EventHub::emit`]; the
//! controller registers typed callbacks. Handlers run on the producer's
//! thread, outside the hub lock, in subscription order.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerEvent {
    ScreenOff,
    ScreenOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TouchEvent {
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct EventHub<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: &E) {
        // Handlers may subscribe or unsubscribe, so they run without the lock.
        let handlers: Vec<Handler<E>> = self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventHub<PowerEvent> {
    pub fn on_suspend(&self, f: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(move |event| {
            if *event == PowerEvent::ScreenOff {
                f()
            }
        })
    }

    pub fn on_resume(&self, f: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(move |event| {
            if *event == PowerEvent::ScreenOn {
                f()
            }
        })
    }
}

impl EventHub<TouchEvent> {
    pub fn on_touch_start(&self, f: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(move |event| {
            if *event == TouchEvent::Start {
                f()
            }
        })
    }
}
