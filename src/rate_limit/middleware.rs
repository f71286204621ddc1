use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

use crate::error::LimiterError;
use crate::rate_limit::{RateLimiter, Request, ShardStore};

type KeyFn<Req> = Arc<dyn Fn(&Req) -> Option<String> + Send + Sync>;

/// Errors returned by [`RateLimitService`].
#[derive(thiserror::Error, Debug)]
pub enum AdmissionError<E, SE = std::convert::Infallible> {
    /// The limiter refused the request or failed to decide.
    #[error(transparent)]
    Limiter(LimiterError<SE>),
    /// The wrapped service failed.
    #[error("inner service failed")]
    Inner(#[source] E),
}

impl<E, SE> AdmissionError<E, SE> {
    /// Wait before retrying, when the request was rate limited.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Limiter(e) => e.retry_after(),
            Self::Inner(_) => None,
        }
    }

    /// Check if the limiter rejected the request.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Limiter(e) if e.is_rate_limited())
    }
}

/// A layer that consumes from a limit before each call.
///
/// Every request is charged `template.count` tokens against `template.name`, keyed by the
/// extractor (global when it returns `None`).
pub struct RateLimitLayer<St, Req> {
    limiter: Arc<RateLimiter<St>>,
    template: Request,
    key: KeyFn<Req>,
}

impl<St, Req> RateLimitLayer<St, Req> {
    /// Limit every request against the global limiter described by `template`.
    pub fn new(limiter: Arc<RateLimiter<St>>, template: Request) -> Self {
        Self { limiter, template, key: Arc::new(|_: &Req| -> Option<String> { None }) }
    }

    /// Limit per key extracted from each request.
    pub fn keyed<F>(limiter: Arc<RateLimiter<St>>, template: Request, key: F) -> Self
    where
        F: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    {
        Self { limiter, template, key: Arc::new(key) }
    }
}

impl<St, Req> Clone for RateLimitLayer<St, Req> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), template: self.template.clone(), key: self.key.clone() }
    }
}

impl<St, Req> fmt::Debug for RateLimitLayer<St, Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer").field("template", &self.template).finish_non_exhaustive()
    }
}

impl<S, St, Req> Layer<S> for RateLimitLayer<St, Req> {
    type Service = RateLimitService<S, St, Req>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            template: self.template.clone(),
            key: self.key.clone(),
        }
    }
}

/// Middleware service that enforces a rate limit.
pub struct RateLimitService<S, St, Req> {
    inner: S,
    limiter: Arc<RateLimiter<St>>,
    template: Request,
    key: KeyFn<Req>,
}

impl<S: Clone, St, Req> Clone for RateLimitService<S, St, Req> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            template: self.template.clone(),
            key: self.key.clone(),
        }
    }
}

impl<S, St, Req> fmt::Debug for RateLimitService<S, St, Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService").field("template", &self.template).finish_non_exhaustive()
    }
}

impl<S, St, Req> Service<Req> for RateLimitService<S, St, Req>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    St: ShardStore + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error, St::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut request = self.template.clone().with_throws(true);
        request.key = (self.key)(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            limiter.consume(&request).await.map_err(AdmissionError::Limiter)?;
            inner.call(req).await.map_err(AdmissionError::Inner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitConfig;
    use crate::rate_limit::InMemoryShardStore;
    use std::convert::Infallible;
    use std::io;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn limiter() -> Arc<RateLimiter<InMemoryShardStore>> {
        Arc::new(RateLimiter::new(InMemoryShardStore::new()).with_clock(ManualClock::new(0)))
    }

    fn template() -> Request {
        Request::new("api", RateLimitConfig::token_bucket(2.0, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn rejects_once_the_limit_is_spent() {
        let svc = ServiceBuilder::new()
            .layer(RateLimitLayer::new(limiter(), template()))
            .service(service_fn(|req: u32| async move { Ok::<_, io::Error>(req * 2) }));

        assert_eq!(svc.clone().oneshot(1).await.unwrap(), 2);
        assert_eq!(svc.clone().oneshot(2).await.unwrap(), 4);
        let err = svc.oneshot(3).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn keys_are_limited_separately() {
        let layer = RateLimitLayer::keyed(limiter(), template().with_count(2.0), |req: &&'static str| {
            Some(req.to_string())
        });
        let svc = ServiceBuilder::new()
            .layer(layer)
            .service(service_fn(|req: &'static str| async move { Ok::<_, io::Error>(req) }));

        assert!(svc.clone().oneshot("alice").await.is_ok());
        assert!(svc.clone().oneshot("bob").await.is_ok());
        assert!(svc.oneshot("alice").await.unwrap_err().is_rate_limited());
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        let svc = ServiceBuilder::new()
            .layer(RateLimitLayer::new(limiter(), template()))
            .service(service_fn(|_: ()| async { Err::<(), _>(io::Error::new(io::ErrorKind::Other, "boom")) }));

        let err: AdmissionError<io::Error, Infallible> = svc.oneshot(()).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Inner(ref e) if e.to_string() == "boom"));
        assert!(err.retry_after().is_none());
        // The inner message is reported once, through the source chain.
        assert_eq!(err.to_string(), "inner service failed");
        assert_eq!(std::error::Error::source(&err).map(|s| s.to_string()), Some("boom".to_string()));
    }

    #[tokio::test]
    async fn unsatisfiable_requests_surface_configuration_errors() {
        let svc = ServiceBuilder::new()
            .layer(RateLimitLayer::new(limiter(), template().with_count(5.0)))
            .service(service_fn(|_: ()| async { Ok::<_, io::Error>(()) }));

        let err = svc.oneshot(()).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Limiter(ref e) if e.is_configuration()));
    }
}
