use std::sync::atomic::{AtomicBool, Ordering};

use std::sync::Arc;

use crate::handle::ConnectionHandle;
use crate::Shaper;

/// An at-most-once teardown action for a standalone (non session-bound)
/// stream wrapper. Read error, write error, and explicit close all invoke
/// the same `fire`, but only the first call does anything — guards against
/// a handle being removed twice (which would otherwise be harmless here,
/// but keeps the contract obvious at call sites that assume single-fire).
pub struct Cleanup {
    fired: AtomicBool,
    handle: ConnectionHandle,
    shaper: Arc<Shaper>,
}

impl Cleanup {
    /// A cleanup that removes `handle` from the connection registry and
    /// bucket registry, exactly once.
    pub fn standalone(shaper: Arc<Shaper>, handle: ConnectionHandle) -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            handle,
            shaper,
        })
    }

    /// A cleanup that does nothing: ownership of the handle belongs to a
    /// session binding, which tears it down on its own cancellation signal.
    pub fn noop() -> Arc<NoopCleanup> {
        Arc::new(NoopCleanup)
    }

    pub fn fire(&self) {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shaper.connections.remove(self.handle);
            self.shaper.buckets.remove(self.handle);
        }
    }
}

/// A cleanup handle that does nothing when fired. Exists so callers can
/// hold a uniform `Arc<dyn Fn()>`-like handle regardless of ownership mode.
pub struct NoopCleanup;

impl NoopCleanup {
    pub fn fire(&self) {}
}

/// Common shape both cleanup kinds satisfy, so `ShapedReader`/`ShapedWriter`
/// can hold either without caring which.
pub trait FireOnce: Send + Sync {
    fn fire(&self);
}

impl FireOnce for Cleanup {
    fn fire(&self) {
        Cleanup::fire(self)
    }
}

impl FireOnce for NoopCleanup {
    fn fire(&self) {
        NoopCleanup::fire(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShaperSettings;

    #[test]
    fn standalone_cleanup_removes_state_exactly_once() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        shaper.buckets.get_or_create(info.handle, 1000, 1000);

        let cleanup = Cleanup::standalone(shaper.clone(), info.handle);
        cleanup.fire();
        assert!(shaper.connections.get(info.handle).is_none());
        assert!(shaper.buckets.get(info.handle).is_none());

        // second fire must not panic even though state is already gone
        cleanup.fire();
    }

    #[test]
    fn noop_cleanup_does_not_touch_the_registry() {
        let shaper = Shaper::with_settings(ShaperSettings::default());
        let info = shaper.connections.add("u");
        let cleanup = Cleanup::noop();
        cleanup.fire();
        assert!(shaper.connections.get(info.handle).is_some());
    }
}
