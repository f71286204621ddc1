//! Compile-time prelude coverage test.
use std::sync::Arc;
use std::time::Duration;
use tollgate::prelude::*;
use tower::service_fn;
use tower_layer::Layer;
use tower_service::Service;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let registry = LimitRegistry::new();
    let config: RateLimitConfig = TokenBucketConfig::new(5.0, Duration::from_secs(1)).build().unwrap();
    registry.register("calls", config).unwrap();
    let _window: FixedWindowConfig = RateLimitConfig::fixed_window(1.0, Duration::from_secs(60));
    let _clock: &dyn Clock = &SystemClock;

    let limiter = Arc::new(RateLimiter::new(InMemoryShardStore::new()));
    let layer = RateLimitLayer::new(limiter, registry.request("calls").unwrap());
    let mut svc = layer.layer(service_fn(|_req: ()| async { Ok::<_, std::io::Error>(()) }));
    svc.call(()).await.expect("service call failed");

    let _: Option<ConfigurationError> = None;
    let _: Option<LimiterError> = None;
    let _: Option<Decision> = None;
    let _: Option<Request> = None;
}
