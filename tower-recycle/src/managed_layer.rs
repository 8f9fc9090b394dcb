use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use recycle_limit::RecyclingLimiter;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::RecycleError;
use crate::RecycleLimitService;

/// A pre-composed rate limiting stack with load shedding.
///
/// Instead of queuing excess requests in memory (which inflates latency and
/// risks OOM), this stack rejects them immediately: any request whose permit
/// is not instantly due is shed with `RecycleError::Overloaded` at the
/// `poll_ready` stage. The shed request's reservation is recycled when its
/// service clone is torn down, so shedding never leaks capacity.
///
/// ### Error Responsibilities:
/// - **LoadShedding (`RecycleError::Overloaded`)**: the limiter had no
///   immediately available permit. Near-instant.
/// - **Timeout (`RecycleError::Timeout`)**: the *inner service* took longer
///   than `max_wait` to respond (e.g. a slow downstream call).
pub struct ManagedRecycleLayer<Req> {
    limiter: Arc<RecyclingLimiter>,
    max_wait: Duration, // Required here for the "Managed" experience
    _phantom: PhantomData<fn(Req)>,
}

// Note: Deriving Clone adds a spurious Req: Clone bound. Implement it
// explicitly.
impl<Req> Clone for ManagedRecycleLayer<Req> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            max_wait: self.max_wait,
            _phantom: PhantomData,
        }
    }
}

impl<S, Req> Layer<S> for ManagedRecycleLayer<Req>
where
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let rl = RecycleLimitService::new(inner, Arc::clone(&self.limiter));

        // Timeout is outer to ensure a hard deadline on the entire process.
        let svc = tower::ServiceBuilder::new()
            .timeout(self.max_wait)
            .load_shed()
            .service(rl);

        // Map the mixed errors into RecycleError
        let mapped_svc = tower::util::MapErr::new(svc, |err: BoxError| {
            if err.is::<tower::timeout::error::Elapsed>() {
                BoxError::from(RecycleError::Timeout)
            } else if err.is::<tower::load_shed::error::Overloaded>() {
                BoxError::from(RecycleError::Overloaded)
            } else if err.is::<RecycleError>() {
                err
            } else {
                // Wrap any other inner service errors
                Box::from(RecycleError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<Req> ManagedRecycleLayer<Req> {
    pub fn new(limiter: Arc<RecyclingLimiter>, max_wait: Duration) -> Self {
        Self {
            limiter,
            max_wait,
            _phantom: PhantomData,
        }
    }
}
