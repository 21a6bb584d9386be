use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bytes::Bytes;

use crate::traits::LinkListener;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection flag and listener shared between a link and its reader.
///
/// Delivery holds the listener's read lock, so [`detach`](Self::detach)
/// returns only after every in-flight callback has finished.
pub(crate) struct LinkState {
    connected: AtomicBool,
    stopping: AtomicBool,
    listener: RwLock<Option<Arc<dyn LinkListener>>>,
}

impl LinkState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            listener: RwLock::new(None),
        })
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn attach(&self, listener: Arc<dyn LinkListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        self.stopping.store(false, Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        self.stopping.store(true, Ordering::Release);
        self.listener
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Stop delivering data. The reader notices on its next iteration.
    pub(crate) fn begin_stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub(crate) fn deliver(&self, data: Bytes) {
        let guard = self.listener.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_stopping() {
            return;
        }
        if let Some(listener) = guard.as_ref() {
            listener.on_data(data);
        }
    }

    /// Record a transition and notify the listener if it actually changed.
    pub(crate) fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::AcqRel) == connected {
            return;
        }
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener.on_connection_changed(connected);
        }
    }

    /// Background reader gave up: stop delivery and report the link down.
    pub(crate) fn mark_lost(&self) {
        self.begin_stop();
        self.set_connected(false);
    }
}
