//! # Tower Recycle
//!
//! `tower-recycle` puts a [`recycle_limit::RecyclingLimiter`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## Why recycling matters in middleware
//!
//! A rate limiting layer reserves capacity *before* it knows whether the
//! request will actually be dispatched. Fail-fast rejections, exceeded wait
//! budgets, and callers that drop a pending request would all normally leave
//! a phantom charge in the limiter. This crate's [`RecycleLimitService`]
//! returns the permit in every one of those cases, so the configured rate is
//! spent only on requests that really went out.
//!
//! ## The Managed Stack
//!
//! [`ManagedRecycleLayer`] composes the pieces production deployments
//! usually want:
//!
//! 1. **Load Shedding**: excess traffic is rejected immediately with
//!    `RecycleError::Overloaded` instead of queuing in memory, and the shed
//!    request's permit goes back to the limiter.
//! 2. **Timeouts**: a hard deadline on the whole request, failing with
//!    `RecycleError::Timeout`.
//! 3. **Error Mapping**: internal Tower errors are converted into a unified,
//!    cloneable [`RecycleError`] domain.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`RecycleError`], allowing automatic
//!   conversion to HTTP status codes (408, 503, 429, 500).

mod error;
mod layer;
mod managed_layer;
mod service;

#[cfg(test)]
mod tests;

pub use error::RecycleError;
pub use layer::RecycleLimitLayer;
pub use managed_layer::ManagedRecycleLayer;
pub use service::RecycleLimitService;
