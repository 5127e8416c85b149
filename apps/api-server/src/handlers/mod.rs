//! HTTP handlers and route configuration.

mod health;
mod probe;

use actix_web::web;

use crate::state::AppState;

/// Configure all application routes.
///
/// Each guarded resource carries its own rate limit so policies can differ
/// per route.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.service(
        web::scope("/api")
            // Public routes
            .route("/health", web::get().to(health::health_check))
            // Rate-limited routes
            .service(
                web::resource("/test")
                    .wrap(state.rate_limit(state.default_policy))
                    .route(web::get().to(probe::test)),
            )
            .service(
                web::resource("/whoami")
                    .wrap(state.rate_limit(state.default_policy))
                    .route(web::get().to(probe::whoami)),
            )
            .service(
                web::resource("/burst")
                    .wrap(state.rate_limit(state.burst_policy))
                    .route(web::post().to(probe::burst)),
            ),
    );
}
