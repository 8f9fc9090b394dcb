use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tokio::time::Instant;
use tokio::time::Sleep;
use tokio::time::Timeout;
use tokio::time::sleep;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;

use recycle_limit::RecyclingLimiter;

use crate::error::RecycleError;

#[derive(Clone, Debug)]
struct RecycleLimitMetrics {
    early_wake: Counter<u64>,
    recycled_permits: Counter<u64>,
}

impl RecycleLimitMetrics {
    fn new() -> Self {
        let meter = global::meter("recycle_limit_service");
        Self {
            early_wake: meter.u64_counter("early_wake").build(),
            recycled_permits: meter.u64_counter("recycled_permits").build(),
        }
    }
}

/// A `tower::Service` that spends one permit per dispatched request.
///
/// The permit is reserved up front and the exact wait the ledger quotes is
/// slept off inside `poll_ready`, so backpressure is visible to callers
/// before the request is ever constructed. A reservation that does not end
/// in a dispatch (fail-fast rejection, an unpayable wait budget, an inner
/// service failure, or the service being dropped mid-wait) is recycled
/// rather than left charged against the rate.
#[derive(Debug)]
pub struct RecycleLimitService<S> {
    inner: S,
    limiter: Arc<RecyclingLimiter>,
    sleep: Option<Pin<Box<Sleep>>>,
    /// A permit is currently charged to the ledger for the request being
    /// admitted. Cleared on dispatch or recycle.
    reserved: bool,
    fail_fast: bool,
    timeout: Option<Duration>,
    wait_start: Option<Instant>,
    instruments: RecycleLimitMetrics,
}

pin_project! {
    /// A future that wraps the inner service future with a timeout.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Timeout<F>,
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: From<BoxError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(Box::new(RecycleError::Timeout)))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// Manually implement Clone because Pin<Box<Sleep>> cannot be cloned, and
// because a clone must never inherit the original's reservation.
impl<S> Clone for RecycleLimitService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            sleep: None,
            reserved: false,
            fail_fast: self.fail_fast,
            timeout: self.timeout,
            wait_start: None,
            instruments: self.instruments.clone(),
        }
    }
}

impl<S> Drop for RecycleLimitService<S> {
    fn drop(&mut self) {
        // A reservation that never dispatched must not stay charged.
        self.release_permit();
    }
}

impl<S, Req> Service<Req> for RecycleLimitService<S>
where
    S: Service<Req, Error = BoxError>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 1. If we are waiting out a reservation, check the timer first
        if let Some(ref mut fut) = self.sleep {
            match fut.as_mut().poll(cx) {
                Poll::Ready(_) => {
                    self.sleep = None;
                }
                Poll::Pending => {
                    // Early Wake
                    self.instruments.early_wake.add(1, &[]);
                    return Poll::Pending;
                }
            }
        }

        // 2. Check inner service readiness FIRST to avoid charging the
        // ledger for a request that cannot be dispatched yet
        match self.inner.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => {
                // Whatever this permit was reserved for will never run.
                self.release_permit();
                return Poll::Ready(Err(e));
            }
            Poll::Ready(Ok(())) => {}
        }

        // 3. Reserve a permit if this request doesn't hold one yet
        if !self.reserved {
            let start = *self.wait_start.get_or_insert(Instant::now());
            let remaining = self.timeout.map(|t| t.saturating_sub(start.elapsed()));

            let wait = self.limiter.reserve(1);
            self.reserved = true;

            if wait.is_zero() {
                // Covered by stored credit or an idle queue.
            } else if self.fail_fast {
                self.release_permit();
                self.wait_start = None;
                return Poll::Ready(Err(Box::new(RecycleError::RateLimited {
                    retry_after: wait,
                })));
            } else if matches!(remaining, Some(remaining) if wait > remaining) {
                // The ledger quotes the wait exactly, so an unpayable one is
                // known before sleeping a single tick. Don't hold the
                // reservation through it.
                self.release_permit();
                self.wait_start = None;
                return Poll::Ready(Err(Box::new(RecycleError::Timeout)));
            } else {
                let mut sleep_fut = Box::pin(sleep(wait));
                match sleep_fut.as_mut().poll(cx) {
                    Poll::Pending => {
                        self.sleep = Some(sleep_fut);
                        return Poll::Pending;
                    }
                    Poll::Ready(_) => {
                        // Sub-tick wait; the permit is already due.
                    }
                }
            }
        }

        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // The permit leaves with the request.
        self.reserved = false;
        let start = self.wait_start.take();
        let timeout_duration = match (self.timeout, start) {
            (Some(t), Some(s)) => t.saturating_sub(s.elapsed()),
            (Some(t), None) => t,
            (None, _) => Duration::from_secs(3600 * 24 * 365), // Effective infinity
        };

        ResponseFuture {
            inner: timeout(timeout_duration, self.inner.call(req)),
        }
    }
}

impl<S> RecycleLimitService<S> {
    pub fn new(inner: S, limiter: Arc<RecyclingLimiter>) -> Self {
        Self {
            inner,
            limiter,
            sleep: None,
            reserved: false,
            fail_fast: false,
            timeout: None,
            wait_start: None,
            instruments: RecycleLimitMetrics::new(),
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn release_permit(&mut self) {
        if self.reserved {
            self.limiter.recycle(1);
            self.instruments.recycled_permits.add(1, &[]);
            self.reserved = false;
        }
        self.sleep = None;
    }
}
