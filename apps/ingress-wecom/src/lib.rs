//! WeCom callback ingress: verification and delivery routes in front of the
//! conversation router, plus the YAML config and startup wiring shared with
//! the binary.

pub mod callback;
pub mod config;
pub mod notify;
pub mod reqid;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};

pub use callback::{CALLBACK_PATH, CallbackState, SUCCESS_BODY};
pub use config::{AppConfig, ConfigError};

/// Full HTTP surface: callback routes, health probes and request logging.
pub fn build_router(state: CallbackState) -> Router {
    Router::new()
        .route(
            CALLBACK_PATH,
            get(callback::verify_url).post(callback::deliver),
        )
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz))
        .with_state(state)
        .layer(middleware::from_fn(reqid::with_request_id))
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
