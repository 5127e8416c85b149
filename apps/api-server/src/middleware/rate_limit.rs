//! Rate limiting middleware.
//!
//! Wrap a resource or scope with [`RateLimit`] to give every (method, path,
//! caller) triple its own token bucket. Requests that find the bucket empty
//! get `429 {"message": "Rate Limit Exceeded"}` and never reach the handler.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;

use tollgate_core::domain::{BucketKey, BucketParams};
use tollgate_core::ports::RateLimiter;
use tollgate_shared::{ErrorResponse, MessageResponse};

use super::identity::current_caller;

/// What to do with a request when the limiter itself cannot answer.
///
/// Chosen once for the whole process so every guarded route behaves alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit the request.
    #[default]
    FailOpen,
    /// Answer `503` without running the handler.
    FailClosed,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailOpen => "open",
            FailurePolicy::FailClosed => "closed",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "fail-open" => Ok(FailurePolicy::FailOpen),
            "closed" | "fail-closed" => Ok(FailurePolicy::FailClosed),
            _ => Err(()),
        }
    }
}

/// Rate limiting middleware factory.
///
/// Parameters are validated when the [`BucketParams`] are built, so a bad
/// policy fails at startup rather than on the first request.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<dyn RateLimiter>,
    params: BucketParams,
    failure_policy: FailurePolicy,
}

impl RateLimit {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        params: BucketParams,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            limiter,
            params,
            failure_policy,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            guard: self.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    guard: RateLimit,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let guard = self.guard.clone();

        Box::pin(async move {
            let caller = current_caller(&req);
            let key = BucketKey::new(req.method().as_str(), req.path(), &caller);

            match guard.limiter.try_acquire(&key, &guard.params).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(key = %key, "Rate limit exceeded");
                    let response =
                        HttpResponse::TooManyRequests().json(MessageResponse::rate_limit_exceeded());
                    return Ok(req.into_response(response).map_into_right_body());
                }
                Err(e) => match guard.failure_policy {
                    FailurePolicy::FailOpen => {
                        tracing::error!(
                            key = %key,
                            error = %e,
                            timeout = e.is_timeout(),
                            "Rate limiter unavailable, failing open"
                        );
                    }
                    FailurePolicy::FailClosed => {
                        tracing::error!(
                            key = %key,
                            error = %e,
                            timeout = e.is_timeout(),
                            "Rate limiter unavailable, failing closed"
                        );
                        let response = HttpResponse::ServiceUnavailable()
                            .json(ErrorResponse::service_unavailable("Rate limiter unavailable"));
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                },
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
