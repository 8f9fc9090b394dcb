use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use recycle_limit::RecyclingLimiter;
use std::sync::Arc;
use std::time::Duration;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_recycle::{ManagedRecycleLayer, RecycleError};

#[tokio::main]
async fn main() {
    // 1. Setup the limiter: 10 requests/sec, banking up to 3 seconds of
    // idle credit for bursts
    let limiter = Arc::new(RecyclingLimiter::new(10.0, 3.0).expect("valid limiter parameters"));

    // 2. Setup Managed Layer
    let managed_layer = ManagedRecycleLayer::<Request>::new(limiter, Duration::from_millis(500));

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Recycle!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_recycle_error))
                // 2. The middle layer: introduces BoxError
                .layer(managed_layer)
                // 3. The secret sauce: converts the Route's Infallible to BoxError
                // so that ManagedRecycleLayer is happy wrapping it.
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}

/// The signature must match BoxError -> IntoResponse
async fn handle_recycle_error(err: tower::BoxError) -> impl IntoResponse {
    if let Some(recycle_err) = err.downcast_ref::<RecycleError>() {
        recycle_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
