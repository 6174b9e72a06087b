//! Operator API: status, record lookup by document id, and the live feed.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::intercept::Interceptor;

#[derive(Clone)]
pub struct AdminState {
    pub interceptor: Arc<Interceptor>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(interceptor: Arc<Interceptor>, api_key: &str) -> Self {
        Self {
            interceptor,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/requests/{id}", get(get_request))
        .route("/admin/responses/{id}", get(get_response))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .merge(protected)
        .route("/ws", get(observer_ws))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
