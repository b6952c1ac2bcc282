use std::time::{Duration, Instant};

/// Gate for actions that must not fire more often than a given interval.
///
/// The first call always passes; subsequent calls pass only once the
/// interval has elapsed since the last pass. Callers keep one gate per
/// rate-limited action (leader location renewal, repeated warning logs,
/// periodic leader polling).
#[derive(Debug, Default)]
pub struct TimeGate {
    /// When the gate last let an action through
    last_pass: Option<Instant>,
}

impl TimeGate {
    /// Create an open gate
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { last_pass: None }
    }

    /// Pass the gate if `interval` has elapsed since the last pass, arming
    /// it again for the next interval.
    #[inline]
    pub fn try_pass(&mut self, interval: Duration) -> bool {
        let now = Instant::now();
        let elapsed = match self.last_pass {
            Some(last) => now.duration_since(last) >= interval,
            None => true,
        };
        if elapsed {
            self.last_pass = Some(now);
        }
        elapsed
    }

    /// Forget the last pass so the next `try_pass` fires immediately.
    #[inline]
    pub fn reset(&mut self) {
        self.last_pass = None;
    }
}
