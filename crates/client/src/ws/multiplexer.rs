//! Fan-out of inbound events to a dynamic set of subscribers.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bijou_shared::ServerEvent;
use parking_lot::Mutex;

/// A subscriber callback. Identity is the `Arc` allocation.
pub type Subscriber = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Entry {
    id: u64,
    callback: Subscriber,
}

#[derive(Default)]
struct Entries {
    next_id: u64,
    list: Vec<Entry>,
}

type Registry = Mutex<Entries>;

/// Insertion-ordered set of subscribers.
#[derive(Clone, Default)]
pub struct EventMultiplexer {
    registry: Arc<Registry>,
}

impl EventMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. Registering the same `Arc` again has no effect
    /// beyond returning another disposer for the existing entry.
    pub fn subscribe(&self, callback: Subscriber) -> Subscription {
        let id = {
            let mut entries = self.registry.lock();
            // The entry holds its Arc, so the address stays unique while it lives.
            match entries.list.iter().find(|e| Arc::ptr_eq(&e.callback, &callback)) {
                Some(existing) => existing.id,
                None => {
                    let id = entries.next_id;
                    entries.next_id += 1;
                    entries.list.push(Entry { id, callback });
                    id
                }
            }
        };
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every subscriber registered at the time of the call, once.
    ///
    /// A panicking subscriber is logged and skipped. Returns how many
    /// subscribers completed normally.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let snapshot: Vec<Subscriber> = self
            .registry
            .lock()
            .list
            .iter()
            .map(|e| e.callback.clone())
            .collect();

        let mut delivered = 0;
        for callback in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => crate::log_error!(
                    "Subscriber panicked handling {}: {}",
                    event.name(),
                    panic_message(&*panic)
                ),
            }
        }
        delivered
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Disposer returned by [`EventMultiplexer::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::dispose`].
#[must_use = "keep the Subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
    disposed: AtomicBool,
}

impl Subscription {
    /// Remove the subscription. Further calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().list.retain(|e| e.id != self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
