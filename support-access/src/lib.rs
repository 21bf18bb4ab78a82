pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    body::Body,
    http::Request,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    make_request_span, request_id_middleware, security_headers_middleware,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::SupportAccessConfig;
use crate::services::{AccessOrchestrator, HostServices, RedisOptionStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SupportAccessConfig>,
    pub orchestrator: Arc<AccessOrchestrator>,
    pub host: HostServices,
}

/// Wire the engine to its host, start the expiry worker and re-arm timers
/// that were lost with the previous process.
pub async fn assemble(config: SupportAccessConfig, host: HostServices) -> Result<AppState, AppError> {
    let config = Arc::new(config);

    let host = match &config.option_store.redis_url {
        Some(url) => {
            let store = RedisOptionStore::new(url, config.namespace()).await?;
            store.health_check().await?;
            host.with_options(Arc::new(store))
        }
        None => {
            tracing::info!("Using in-process option store");
            host
        }
    };

    let orchestrator = AccessOrchestrator::new(config.clone(), host.clone())?.start();

    match orchestrator.rearm().await {
        Ok(report) if report.expired > 0 => {
            tracing::info!(expired = report.expired, "Revoked access that expired while offline");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Could not re-arm expiry timers"),
    }

    Ok(AppState {
        config,
        orchestrator,
        host,
    })
}

pub fn build_router(state: AppState) -> Router {
    let support_routes = Router::new()
        .route("/support-access/generate", post(handlers::generate))
        .route("/support-access/nonce", get(handlers::issue_nonce))
        .route("/support-access/extend", post(handlers::extend))
        .route("/support-access/revoke", get(handlers::revoke))
        .route("/support-access/users", get(handlers::list_support_users));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(support_routes)
        .route("/:endpoint/:identifier", get(handlers::login))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| make_request_span(request)),
        )
        // Outside the trace layer so the span sees the request id
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}
