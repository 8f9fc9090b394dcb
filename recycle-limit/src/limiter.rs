use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use crate::Error;
use crate::ledger::PermitLedger;

/// A blocking rate limiter with permit recycling.
///
/// `RecyclingLimiter` pairs a [`PermitLedger`] with a monotonic clock and a
/// mutex. The lock is only ever held for the ledger's O(1) arithmetic; any
/// sleeping happens after it is released, so callers waiting out a long
/// reservation never block callers that merely need to take a ticket.
///
/// Share it across threads with an `Arc`.
#[derive(Debug)]
pub struct RecyclingLimiter {
    ledger: Mutex<PermitLedger>,
    clock: Clock,
    /// A fixed point in time to calculate deltas from.
    anchor: Instant,
}

impl RecyclingLimiter {
    /// Creates a limiter emitting `permits_per_second`, banking idle credit
    /// for up to `max_burst_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRate`] or [`Error::InvalidBurstWindow`] for
    /// out-of-range parameters.
    pub fn new(permits_per_second: f64, max_burst_seconds: f64) -> Result<Self, Error> {
        Self::with_clock(permits_per_second, max_burst_seconds, Clock::new())
    }

    /// Creates a limiter driven by the supplied clock.
    ///
    /// Tests pass the mock half of `quanta::Clock::mock()` here to drive
    /// time deterministically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRate`] or [`Error::InvalidBurstWindow`] for
    /// out-of-range parameters.
    pub fn with_clock(
        permits_per_second: f64,
        max_burst_seconds: f64,
        clock: Clock,
    ) -> Result<Self, Error> {
        let anchor = clock.now();
        Ok(Self {
            ledger: Mutex::new(PermitLedger::new(permits_per_second, max_burst_seconds)?),
            clock,
            anchor,
        })
    }

    /// Microseconds elapsed since this limiter was created.
    pub fn now_micros(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_micros() as u64
    }

    /// Blocks until `permits` are available and consumes them.
    ///
    /// Returns the time spent waiting, which is zero whenever stored credit
    /// (or an idle queue) covers the whole reservation.
    pub fn acquire(&self, permits: u32) -> Duration {
        let wait = self.reserve(permits);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        wait
    }

    /// Commits a reservation for `permits` and returns the wait it requires,
    /// without sleeping.
    ///
    /// Callers that use this directly own the reservation: either honour the
    /// returned wait before proceeding, or undo the charge with
    /// [`recycle`](Self::recycle). The async middleware in `tower-recycle`
    /// is built on this.
    pub fn reserve(&self, permits: u32) -> Duration {
        let now = self.now_micros();
        let ticket = self.lock().reserve(permits, now);
        Duration::from_micros(ticket.saturating_sub(now))
    }

    /// Acquires `permits` only if the wait would fit within `timeout`.
    ///
    /// The deadline check peeks at the queue without committing anything, so
    /// a refusal leaves the limiter untouched. On success the permits are
    /// reserved and the wait (if any) is slept off before returning.
    pub fn try_acquire(&self, permits: u32, timeout: Duration) -> bool {
        let timeout_micros = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        let wait = {
            let mut ledger = self.lock();
            let now = self.now_micros();
            if ledger.earliest_available().saturating_sub(now) > timeout_micros {
                return false;
            }
            let ticket = ledger.reserve(permits, now);
            Duration::from_micros(ticket.saturating_sub(now))
        };
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        true
    }

    /// Returns `permits` that were reserved but never consumed.
    pub fn recycle(&self, permits: u32) {
        let now = self.now_micros();
        self.lock().recycle(permits, now);
    }

    /// Currently banked credit.
    pub fn available_permits(&self) -> f64 {
        let now = self.now_micros();
        self.lock().available_permits(now)
    }

    /// Whether `permits` would be granted without any wait.
    pub fn immediately_available(&self, permits: u32) -> bool {
        let now = self.now_micros();
        self.lock().immediately_available(permits, now)
    }

    /// The instant (in [`now_micros`](Self::now_micros) units) at which the
    /// next reservation would be satisfied. A peek; mutates nothing.
    pub fn earliest_available(&self) -> u64 {
        self.lock().earliest_available()
    }

    /// Changes the emission rate, rescaling banked credit proportionally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRate`] unless the rate is finite and positive.
    pub fn set_rate(&self, permits_per_second: f64) -> Result<(), Error> {
        let now = self.now_micros();
        self.lock().set_rate(permits_per_second, now)
    }

    /// The configured rate in permits per second.
    pub fn rate(&self) -> f64 {
        self.lock().rate()
    }

    // No ledger operation can panic between field updates, so a poisoned
    // lock cannot expose a torn record; recover instead of propagating.
    fn lock(&self) -> MutexGuard<'_, PermitLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
