//! Caller identity middleware and extractor.
//!
//! Resolves who is calling from an optional `Authorization: Bearer` token and
//! records it in the request extensions. Requests without a valid token pass
//! through as anonymous; rejecting them is left to the handlers that care.

use actix_web::{
    Error, FromRequest, HttpMessage, HttpRequest,
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header,
};
use std::future::{Ready, ready};
use std::sync::Arc;

use tollgate_core::domain::Caller;
use tollgate_core::ports::TokenService;

/// The caller recorded for a request, anonymous if none was.
pub fn current_caller(req: &impl HttpMessage) -> Caller {
    req.extensions()
        .get::<Caller>()
        .cloned()
        .unwrap_or(Caller::Anonymous)
}

fn resolve_caller(req: &ServiceRequest, tokens: &dyn TokenService) -> Caller {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return Caller::Anonymous;
    };

    let Some(token) = value.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) else {
        tracing::debug!("Ignoring non-bearer authorization header");
        return Caller::Anonymous;
    };

    match tokens.validate_token(token) {
        Ok(claims) => Caller::User(claims.subject),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring invalid bearer token");
            Caller::Anonymous
        }
    }
}

/// Identity middleware factory.
pub struct Identity {
    tokens: Arc<dyn TokenService>,
}

impl Identity {
    pub fn new(tokens: Arc<dyn TokenService>) -> Self {
        Self { tokens }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Identity
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = IdentityService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityService {
            service,
            tokens: Arc::clone(&self.tokens),
        }))
    }
}

pub struct IdentityService<S> {
    service: S,
    tokens: Arc<dyn TokenService>,
}

impl<S, B> Service<ServiceRequest> for IdentityService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = S::Future;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let caller = resolve_caller(&req, self.tokens.as_ref());
        req.extensions_mut().insert(caller);
        self.service.call(req)
    }
}

/// Extractor for the resolved caller. Never fails.
#[derive(Debug, Clone)]
pub struct RequestCaller(pub Caller);

impl FromRequest for RequestCaller {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Ok(RequestCaller(current_caller(req))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};
    use tollgate_infra::{JwtConfig, JwtTokenService};

    fn token_service() -> Arc<dyn TokenService> {
        Arc::new(JwtTokenService::new(JwtConfig {
            secret: "identity-test-secret".to_string(),
            ..JwtConfig::default()
        }))
    }

    async fn echo(caller: RequestCaller) -> HttpResponse {
        HttpResponse::Ok().body(caller.0.key_segment().to_string())
    }

    async fn caller_for(request: test::TestRequest, tokens: Arc<dyn TokenService>) -> String {
        let app = test::init_service(
            App::new()
                .wrap(Identity::new(tokens))
                .route("/whoami", web::get().to(echo)),
        )
        .await;

        let body = test::call_and_read_body(&app, request.uri("/whoami").to_request()).await;
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[actix_web::test]
    async fn test_missing_header_is_anonymous() {
        let caller = caller_for(test::TestRequest::get(), token_service()).await;
        assert_eq!(caller, "anonymous");
    }

    #[actix_web::test]
    async fn test_valid_token_resolves_user() {
        let tokens = token_service();
        let token = tokens.generate_token("123").unwrap();

        let request = test::TestRequest::get()
            .insert_header((header::AUTHORIZATION, format!("Bearer {token}")));

        assert_eq!(caller_for(request, tokens).await, "123");
    }

    #[actix_web::test]
    async fn test_invalid_token_is_anonymous() {
        let request = test::TestRequest::get()
            .insert_header((header::AUTHORIZATION, "Bearer not-a-jwt"));

        assert_eq!(caller_for(request, token_service()).await, "anonymous");
    }

    #[actix_web::test]
    async fn test_basic_auth_is_anonymous() {
        let request =
            test::TestRequest::get().insert_header((header::AUTHORIZATION, "Basic dXNlcjpwdw=="));

        assert_eq!(caller_for(request, token_service()).await, "anonymous");
    }
}
