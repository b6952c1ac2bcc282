use std::sync::atomic::{AtomicUsize, Ordering};

use event_listener::Event;

/// Epoch-style barrier between appenders and teardown.
///
/// Every appender enters a critical section around its engine append and
/// callback enqueue; teardown waits until no appender is inside before
/// revoking the structures an appender may still reference. Entering is two
/// atomic operations, so the hot path pays almost nothing; waiting sides
/// park on an [`Event`] until the last guard drops.
#[derive(Debug)]
pub(crate) struct QuiescentState {
    /// Number of critical sections currently entered
    active: AtomicUsize,
    /// Notified whenever `active` drops back to zero
    on_quiescent: Event,
}

/// RAII token of one entered critical section
pub(crate) struct CriticalGuard<'a> {
    /// The barrier this guard was entered on
    qs: &'a QuiescentState,
}

impl QuiescentState {
    /// Create a barrier with no active critical section
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            on_quiescent: Event::new(),
        }
    }

    /// Enter a critical section; the section ends when the guard drops
    pub(crate) fn enter(&self) -> CriticalGuard<'_> {
        let _prev = self.active.fetch_add(1, Ordering::AcqRel);
        CriticalGuard { qs: self }
    }

    /// Wait until every entered critical section has exited.
    ///
    /// Sections entered after this call starts are not waited for; the
    /// caller must have already closed the gate admitting new entrants.
    pub(crate) async fn wait_quiescent(&self) {
        loop {
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            let listener = self.on_quiescent.listen();
            // re-check: the last guard may have dropped between the load
            // and the listener registration
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            listener.await;
        }
    }
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        if self.qs.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.qs.on_quiescent.notify(usize::MAX);
        }
    }
}
