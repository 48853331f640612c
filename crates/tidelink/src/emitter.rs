//! `Emitter<T>` — a typed pub/sub primitive with deferred dispatch.
//!
//! Listeners are stored as `Arc<dyn Fn(&T)>` so snapshots are cheap.
//! `emit()` never runs listeners inline: events are queued and drained on a
//! spawned task, so a listener that calls back into the emitting component
//! cannot observe (or corrupt) a half-finished state transition. A single
//! drain task is in flight at a time, preserving emission order.
//!
//! Snapshot-on-emit semantics:
//!   - A listener removed while an event is queued is still called for it
//!     only if it is still registered when the drain reaches that event.
//!   - A listener added during a drain sees subsequent events.
//!
//! Panics inside a listener are caught and logged; remaining listeners and
//! queued events are unaffected.
//!
//! `emit()` must be called from within a tokio runtime.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A listener ID returned by [`Emitter::on`] that can be passed to
/// [`Emitter::off`] to remove the listener.
pub type ListenerId = u64;

/// Closure type for event listeners.
pub type ListenerFn<T> = dyn Fn(&T) + Send + Sync;

/// Typed event emitter with deferred dispatch.
///
/// Cheap to clone; clones share listeners and the event queue.
pub struct Emitter<T> {
    inner: Arc<EmitterInner<T>>,
}

struct EmitterInner<T> {
    listeners: Mutex<Vec<(ListenerId, Arc<ListenerFn<T>>)>>,
    queue: Mutex<VecDeque<T>>,
    drain_scheduled: AtomicBool,
    next_id: AtomicU64,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Emitter<T> {
    /// Create a new, empty emitter.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                listeners: Mutex::new(Vec::new()),
                queue: Mutex::new(VecDeque::new()),
                drain_scheduled: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` and return its [`ListenerId`].
    pub fn on(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove the listener identified by `id`.
    ///
    /// Does nothing if `id` is not present (safe to call multiple times).
    pub fn off(&self, id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .retain(|(lid, _)| *lid != id);
    }

    /// Queue `event` for delivery on the next task-queue tick.
    ///
    /// Returns immediately; listeners run on a spawned drain task.
    pub fn emit(&self, event: T) {
        self.inner.queue.lock().unwrap().push_back(event);
        self.schedule_drain();
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap().len()
    }

    fn schedule_drain(&self) {
        if !self.inner.drain_scheduled.swap(true, Ordering::AcqRel) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.drain();
            });
        }
    }
}

impl<T: Send + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EmitterInner<T> {
    fn drain(self: Arc<Self>) {
        loop {
            loop {
                let event = {
                    let mut queue = self.queue.lock().unwrap();
                    queue.pop_front()
                };
                let Some(event) = event else { break };

                // Snapshot Arc references under the lock (cheap ref-count
                // bumps); the lock is released before any callback runs.
                let snapshot: Vec<(ListenerId, Arc<ListenerFn<T>>)> = {
                    let guard = self.listeners.lock().unwrap();
                    guard
                        .iter()
                        .map(|(id, cb)| (*id, Arc::clone(cb)))
                        .collect()
                };
                for (id, cb) in snapshot {
                    if catch_unwind(AssertUnwindSafe(|| cb(&event))).is_err() {
                        log::error!("[Emitter] listener {id} panicked; continuing");
                    }
                }
            }

            self.drain_scheduled.store(false, Ordering::Release);
            // An emit() racing the store above may have enqueued without
            // scheduling; reclaim the drain if so.
            if self.queue.lock().unwrap().is_empty() {
                break;
            }
            if self.drain_scheduled.swap(true, Ordering::AcqRel) {
                break;
            }
        }
    }
}
