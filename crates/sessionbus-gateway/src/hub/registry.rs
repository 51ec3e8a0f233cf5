//! Registration bookkeeping shared by the hub and the transports.
//!
//! Every registration gets a monotonically increasing id and hands back a
//! [`Subscription`]. Dispatch always works on a snapshot, so a subscription
//! cancelled from inside a callback takes effect after the current pass.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type Cancel = Box<dyn FnOnce() + Send>;

/// Single-use removal capability returned by every registration.
///
/// `unsubscribe` removes exactly the registration it was issued for and is
/// idempotent. Clones share the same capability. Dropping a handle does
/// not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    cancel: Arc<Mutex<Option<Cancel>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Arc::new(Mutex::new(Some(Box::new(cancel)))),
        }
    }

    /// Remove the registration. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        let cancel = lock(&self.cancel).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.cancel).is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Ordered set of registrations of one kind.
pub struct Registry<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, T)>>,
}

impl<T: Clone + Send + 'static> Registry<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Append a registration; delivery order equals registration order.
    pub fn subscribe(self: &Arc<Self>, value: T) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, value));

        let weak = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.remove(id);
            }
        })
    }

    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.entries).iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(eid, _)| *eid != id);
        entries.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_remove_only_their_own_entry() {
        let reg: Arc<Registry<&'static str>> = Registry::new();
        let a = reg.subscribe("a");
        let b = reg.subscribe("b");
        let _c = reg.subscribe("c");

        b.unsubscribe();
        b.unsubscribe();
        assert_eq!(reg.snapshot(), vec!["a", "c"]);

        a.clone().unsubscribe();
        assert!(!a.is_active());
        assert_eq!(reg.snapshot(), vec!["c"]);
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let reg: Arc<Registry<u8>> = Registry::new();
        let sub = reg.subscribe(1);
        drop(reg);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }
}
