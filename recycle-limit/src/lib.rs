//! # recycle-limit
//!
//! `recycle-limit` is a token bucket rate limiter that lets callers give
//! *unused* permits back.
//!
//! ## Core Philosophy
//!
//! Classic token buckets charge a caller the moment a permit is handed out,
//! even if the operation it was reserved for never runs. That wastes real
//! capacity on retries and abandoned speculative work. `recycle-limit`
//! tracks reservations on a virtual-time cursor so that returning permits is
//! as cheap as taking them: a recycled permit either shortens the wait for
//! everyone queued behind it, or is banked as burst credit for later.
//!
//! ## Key Concepts
//!
//! * **Stored credit**: idle seconds convert into spendable permits, up to a
//!   configurable burst window (which may be longer than one second).
//! * **Ticket scheduling**: concurrent reservations serialize through an
//!   advancing timestamp, never by sleeping while a lock is held. The lock is
//!   only ever held for O(1) arithmetic.
//! * **Recycling**: a permit that was reserved but not consumed can be
//!   returned, undoing its cost.
//!
//! ## Example
//!
//! ```rust
//! use recycle_limit::RecyclingLimiter;
//!
//! // 50 permits per second, banking up to 2 seconds of idle credit.
//! let limiter = RecyclingLimiter::new(50.0, 2.0).unwrap();
//!
//! let waited = limiter.acquire(1);
//! // ... issue the request ...
//! # let request_failed_before_send = true;
//! if request_failed_before_send {
//!     // The request never went out; don't charge for it.
//!     limiter.recycle(1);
//! }
//! # let _ = waited;
//! ```

mod ledger;
mod limiter;

pub use ledger::PermitLedger;
pub use limiter::RecyclingLimiter;

/// Construction and reconfiguration failures.
///
/// These are precondition violations: the limiter never clamps a bad value
/// into range silently.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The requested rate was zero, negative, or not finite.
    #[error("permits per second must be finite and positive, got {permits_per_second}")]
    InvalidRate {
        /// The rejected rate.
        permits_per_second: f64,
    },

    /// The burst window was negative or not finite.
    #[error("burst window must be finite and non-negative, got {seconds} seconds")]
    InvalidBurstWindow {
        /// The rejected window, in seconds.
        seconds: f64,
    },
}
