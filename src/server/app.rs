//! Router assembly: middleware stack, shared state, route table.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::domain::auth::AuthVerifier;
use crate::metrics::Metrics;
use crate::server::middleware::{auth_middleware, request_id_middleware};
use crate::server::routes;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{middleware, Router};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub auth_verifier: Arc<dyn AuthVerifier>,
    pub metrics: Arc<Metrics>,
    pub pool: PgPool,
}

pub fn build_app(state: AppState, config: &Config) -> Router {
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(40)
            .finish()
            .expect("rate limiter configuration is valid"),
    );

    let public_routes = Router::new()
        .route("/health", get(routes::health::health_handler))
        .route("/ready", get(routes::ready::ready_handler))
        .route("/metrics", get(routes::metrics::metrics_handler))
        .with_state(state.clone());

    let authenticated_routes = Router::new()
        .route("/v1/mcp/:operation", post(routes::mcp::dispatch))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(GovernorLayer { config: governor_config });

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    public_routes
        .merge(authenticated_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(Duration::from_millis(config.executor_timeout_ms as u64)))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
