use crate::Error;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// The permit accounting state machine.
///
/// A `PermitLedger` is pure bookkeeping: it owns no clock and never sleeps.
/// Every operation takes the current instant as a microsecond timestamp and
/// runs in O(1). Concurrent reservations serialize through
/// `next_free_ticket_micros`, an advancing virtual-time cursor, so the owner
/// only needs to hold a lock for the arithmetic itself.
///
/// [`RecyclingLimiter`](crate::RecyclingLimiter) wraps a ledger in a mutex
/// and supplies timestamps from a monotonic clock; use that type unless you
/// are driving time yourself.
#[derive(Debug)]
pub struct PermitLedger {
    /// Credit currently banked. Always within `0.0..=max_permits`.
    stored_permits: f64,
    /// Burst cap: rate times the burst window. Recomputed on rate changes.
    max_permits: f64,
    /// Microseconds representing one permit at the current rate.
    stable_interval_micros: f64,
    /// The instant at which the next reservation is fully satisfied. In the
    /// past for an idle ledger, in the future for a busy one. Saturates at
    /// `u64::MAX` rather than wrapping.
    next_free_ticket_micros: u64,
    /// Seconds of unused rate that may be banked. Fixed at construction.
    max_burst_seconds: f64,
}

impl PermitLedger {
    /// Creates a ledger with no banked credit.
    ///
    /// A zero `max_burst_seconds` disables banking entirely: credit never
    /// accumulates and every permit is paid for with wait time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRate`] unless `permits_per_second` is finite
    /// and positive, and [`Error::InvalidBurstWindow`] unless
    /// `max_burst_seconds` is finite and non-negative.
    pub fn new(permits_per_second: f64, max_burst_seconds: f64) -> Result<Self, Error> {
        if !max_burst_seconds.is_finite() || max_burst_seconds < 0.0 {
            return Err(Error::InvalidBurstWindow {
                seconds: max_burst_seconds,
            });
        }
        let mut ledger = Self {
            stored_permits: 0.0,
            max_permits: 0.0,
            stable_interval_micros: 0.0,
            next_free_ticket_micros: 0,
            max_burst_seconds,
        };
        ledger.set_rate(permits_per_second, 0)?;
        Ok(ledger)
    }

    /// Converts idle time since the last catch-up into stored credit.
    ///
    /// This is the only place elapsed time becomes permits. Every mutating
    /// operation calls it first so it observes a consistent snapshot.
    fn resync(&mut self, now_micros: u64) {
        if now_micros > self.next_free_ticket_micros {
            let idle_micros = (now_micros - self.next_free_ticket_micros) as f64;
            self.stored_permits = self
                .max_permits
                .min(self.stored_permits + idle_micros / self.stable_interval_micros);
            self.next_free_ticket_micros = now_micros;
        }
    }

    /// Current banked credit, after catching up to `now_micros`.
    pub fn available_permits(&mut self, now_micros: u64) -> f64 {
        self.resync(now_micros);
        self.stored_permits
    }

    /// Whether `permits` could be granted right now without any wait.
    pub fn immediately_available(&mut self, permits: u32, now_micros: u64) -> bool {
        self.available_permits(now_micros) >= f64::from(permits)
    }

    /// Reserves `permits` and returns the instant the reservation is
    /// satisfied.
    ///
    /// The returned ticket may be at or before `now_micros`, meaning the
    /// permits are available immediately. Otherwise the caller is expected to
    /// wait until the ticket before proceeding, or to undo the reservation
    /// with [`recycle`](Self::recycle).
    ///
    /// Stored credit is spent first; the remainder is paid for by pushing the
    /// cursor into the future, which is what any reservation made after this
    /// one queues behind.
    pub fn reserve(&mut self, permits: u32, now_micros: u64) -> u64 {
        self.resync(now_micros);
        let ticket = self.next_free_ticket_micros;
        let required = f64::from(permits);
        let spend = required.min(self.stored_permits);
        let fresh = required - spend;
        // An f64-to-u64 cast saturates, so an enormous backlog pins the
        // cursor at u64::MAX instead of wrapping.
        let wait_micros = (fresh * self.stable_interval_micros) as u64;
        self.next_free_ticket_micros = self.next_free_ticket_micros.saturating_add(wait_micros);
        self.stored_permits -= spend;
        ticket
    }

    /// The raw cursor, deliberately not resynced.
    ///
    /// This answers "when would a reservation made now be satisfied?" without
    /// committing to one and without mutating any state, which is all a
    /// deadline check needs.
    pub fn earliest_available(&self) -> u64 {
        self.next_free_ticket_micros
    }

    /// Returns permits that were reserved but never consumed.
    ///
    /// Permits still pending in the virtual-time queue are refunded by
    /// pulling the cursor back, shortening the wait for everything queued
    /// behind them. Anything beyond the pending amount is banked as
    /// immediately spendable credit, capped at the burst limit.
    pub fn recycle(&mut self, permits: u32, now_micros: u64) {
        self.resync(now_micros);
        let pending =
            (self.next_free_ticket_micros - now_micros) as f64 / self.stable_interval_micros;
        let surplus = f64::from(permits) - pending;
        if surplus <= 0.0 {
            let refund_micros = (f64::from(permits) * self.stable_interval_micros) as u64;
            self.next_free_ticket_micros =
                self.next_free_ticket_micros.saturating_sub(refund_micros);
        } else {
            self.next_free_ticket_micros = now_micros;
            self.stored_permits = self.max_permits.min(self.stored_permits + surplus);
        }
    }

    /// Changes the rate, preserving the banked *fraction* of burst capacity.
    ///
    /// A ledger holding half its capacity before the change holds half the
    /// new capacity after it. Reservations already pushed into the cursor are
    /// not rescaled. The very first rate assignment starts with zero credit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRate`] unless `permits_per_second` is finite
    /// and positive.
    pub fn set_rate(&mut self, permits_per_second: f64, now_micros: u64) -> Result<(), Error> {
        if !permits_per_second.is_finite() || permits_per_second <= 0.0 {
            return Err(Error::InvalidRate { permits_per_second });
        }
        self.resync(now_micros);
        self.stable_interval_micros = MICROS_PER_SECOND / permits_per_second;
        let old_max_permits = self.max_permits;
        self.max_permits = self.max_burst_seconds * permits_per_second;
        self.stored_permits = if old_max_permits == 0.0 {
            0.0
        } else {
            self.stored_permits * self.max_permits / old_max_permits
        };
        Ok(())
    }

    /// The configured rate in permits per second.
    pub fn rate(&self) -> f64 {
        MICROS_PER_SECOND / self.stable_interval_micros
    }
}
