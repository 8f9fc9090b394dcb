use std::sync::Arc;
use std::time::Duration;

use recycle_limit::RecyclingLimiter;
use tower::Layer;

use crate::service::RecycleLimitService;

/// Applies recyclable-permit rate limiting to requests.
#[derive(Clone, Debug)]
pub struct RecycleLimitLayer {
    limiter: Arc<RecyclingLimiter>,
    fail_fast: bool,
    timeout: Option<Duration>,
}

impl RecycleLimitLayer {
    /// Create a RecycleLimitLayer sharing the supplied limiter.
    ///
    /// Every service produced by this layer draws on the same permit pool,
    /// so cloning the layer (or the services it builds) does not multiply
    /// the configured rate.
    pub fn new(limiter: Arc<RecyclingLimiter>) -> Self {
        RecycleLimitLayer {
            limiter,
            fail_fast: false,
            timeout: None,
        }
    }

    /// Set whether the service should fail immediately when no permit is
    /// available.
    ///
    /// If `true`, the service returns `RecycleError::RateLimited` carrying
    /// the exact wait the limiter would have required, and the permit
    /// reserved for the rejected request is recycled.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set a unified budget covering both the permit wait and request
    /// execution.
    ///
    /// A request whose permit wait alone would exceed the budget is rejected
    /// with `RecycleError::Timeout` without waiting at all, and its permit is
    /// recycled.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<S> Layer<S> for RecycleLimitLayer {
    type Service = RecycleLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = RecycleLimitService::new(service, Arc::clone(&self.limiter))
            .with_fail_fast(self.fail_fast);
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}
