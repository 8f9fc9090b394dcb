use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use quanta::Clock;
use recycle_limit::RecyclingLimiter;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;

use super::*;

use futures::future::Ready;
use futures::future::ready;

#[derive(Clone, Debug)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl Service<()> for MockService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }
}

fn mock_service() -> MockService {
    MockService {
        count: Arc::new(AtomicUsize::new(0)),
    }
}

// A limiter on a frozen clock: waits are fully deterministic.
fn frozen_limiter(rate: f64, burst: f64) -> Arc<RecyclingLimiter> {
    let (clock, _mock) = Clock::mock();
    Arc::new(RecyclingLimiter::with_clock(rate, burst, clock).unwrap())
}

#[tokio::test]
async fn test_poll_ready_backpressure() {
    tokio::time::pause();

    // 10/sec with no burst credit: the second request owes 100ms.
    let limiter = frozen_limiter(10.0, 0.0);
    let mut service = RecycleLimitService::new(mock_service(), Arc::clone(&limiter));

    let _ = service.ready().await.unwrap();
    service.call(()).await.unwrap();

    // 2. This poll must stay Pending
    let mut ready_fut = service.ready();
    tokio::select! {
        _ = &mut ready_fut => panic!("Should be throttled!"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }

    // 3. Advance past the quoted wait
    tokio::time::advance(Duration::from_millis(100)).await;

    // 4. Now it should succeed
    ready_fut.await.expect("Should recover");
    service.call(()).await.unwrap();
}

#[tokio::test]
async fn test_fail_fast_recycles_the_permit() {
    let limiter = frozen_limiter(1.0, 0.0);
    let mut service =
        RecycleLimitService::new(mock_service(), Arc::clone(&limiter)).with_fail_fast(true);

    service.ready().await.unwrap();
    service.call(()).await.unwrap();
    assert_eq!(limiter.earliest_available(), 1_000_000);

    // Rejected immediately, carrying the exact wait as the retry hint...
    let err = service.ready().await.unwrap_err();
    match err.downcast_ref::<RecycleError>() {
        Some(RecycleError::RateLimited { retry_after }) => {
            assert_eq!(*retry_after, Duration::from_secs(1));
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }

    // ...and the failed attempt is not charged against the rate.
    assert_eq!(limiter.earliest_available(), 1_000_000);
}

#[tokio::test]
async fn test_unpayable_wait_budget_is_rejected_upfront() {
    let limiter = frozen_limiter(1.0, 0.0);
    let mut service = RecycleLimitService::new(mock_service(), Arc::clone(&limiter))
        .with_timeout(Duration::from_millis(100));

    service.ready().await.unwrap();
    service.call(()).await.unwrap();

    // The next permit is a full second away; a 100ms budget can never
    // cover it, so no time is spent sleeping.
    let err = service.ready().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RecycleError>(),
        Some(RecycleError::Timeout)
    ));
    assert_eq!(limiter.earliest_available(), 1_000_000);
}

#[tokio::test]
async fn test_dropping_a_waiting_service_recycles() {
    let limiter = frozen_limiter(1.0, 0.0);
    let mut service = RecycleLimitService::new(mock_service(), Arc::clone(&limiter));

    service.ready().await.unwrap();
    service.call(()).await.unwrap();
    assert_eq!(limiter.earliest_available(), 1_000_000);

    // The second request reserves and starts waiting out its second...
    assert!(futures::poll!(service.ready()).is_pending());
    assert_eq!(limiter.earliest_available(), 2_000_000);

    // ...but the service is torn down before the wait elapses. The
    // abandoned reservation must come back.
    drop(service);
    assert_eq!(limiter.earliest_available(), 1_000_000);
}

#[tokio::test]
async fn test_layer_integration() {
    let limiter = Arc::new(RecyclingLimiter::new(100.0, 1.0).unwrap());

    let mut service = ServiceBuilder::new()
        .layer(RecycleLimitLayer::new(limiter))
        .service(mock_service());

    // Verify it handles a basic request
    service.ready().await.unwrap().call(()).await.unwrap();
}

#[tokio::test]
async fn test_shared_state_across_clones() {
    let limiter = frozen_limiter(1.0, 0.0);
    let layer = RecycleLimitLayer::new(limiter);

    let mut svc1 = layer.layer(mock_service());
    let mut svc2 = layer.layer(mock_service());

    svc1.ready().await.unwrap().call(()).await.unwrap();

    // svc2 queues behind the permit svc1 just spent
    assert!(futures::poll!(svc2.ready()).is_pending());
}

#[tokio::test]
async fn test_managed_layer_cloning_concurrency() {
    // Bank the full burst window: 5 instantly available permits, then a
    // 200ms interval per permit on a frozen clock.
    let (clock, mock) = Clock::mock();
    let limiter = Arc::new(RecyclingLimiter::with_clock(5.0, 1.0, clock).unwrap());
    mock.increment(Duration::from_secs(1));

    let layer = ManagedRecycleLayer::new(Arc::clone(&limiter), Duration::from_millis(100));

    let mock_count = Arc::new(AtomicUsize::new(0));
    let service = ServiceBuilder::new().layer(layer).service(MockService {
        count: mock_count.clone(),
    });

    let mut handles = vec![];

    // Fire 20 requests from 20 different clones
    for _ in 0..20 {
        let mut cloned_svc = service.clone();
        handles.push(tokio::spawn(async move {
            let ready_svc = cloned_svc.ready().await?;
            ready_svc.call(()).await
        }));
    }

    let mut success = 0;
    let mut failure = 0;

    for h in handles {
        match h.await.unwrap() {
            Ok(_) => success += 1,
            Err(_) => failure += 1,
        }
    }

    // ASSERTIONS
    assert_eq!(success, 5, "Should have exactly 5 successes");
    assert_eq!(failure, 15, "Remaining 15 should have been shed");
    assert_eq!(
        mock_count.load(Ordering::SeqCst),
        5,
        "Inner service should only see 5 hits"
    );

    // Every shed request's reservation was recycled on teardown, so the
    // queue is exactly where the 5 dispatched requests left it.
    assert_eq!(limiter.earliest_available(), 1_000_000);
}
