//! Demonstration endpoints behind the rate limiter.

use actix_web::HttpResponse;
use serde::Serialize;

use tollgate_core::domain::Caller;
use tollgate_shared::{ApiResponse, MessageResponse};

use crate::middleware::identity::RequestCaller;

#[derive(Serialize)]
pub struct CallerResponse {
    pub caller: String,
    pub authenticated: bool,
}

/// GET /api/test
pub async fn test() -> HttpResponse {
    HttpResponse::Ok().json(MessageResponse::new("ok"))
}

/// Report which bucket owner the request was attributed to.
///
/// GET /api/whoami
pub async fn whoami(RequestCaller(caller): RequestCaller) -> HttpResponse {
    let response = CallerResponse {
        caller: caller.key_segment().to_string(),
        authenticated: matches!(caller, Caller::User(_)),
    };

    HttpResponse::Ok().json(ApiResponse::ok(response))
}

/// Stricter policy than the other routes: 5 requests, then one every 2s.
///
/// POST /api/burst
pub async fn burst() -> HttpResponse {
    HttpResponse::Ok().json(MessageResponse::new("burst accepted"))
}
