use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use cache::CounterStore;
use config::Config;
use validations::PolicyResolver;

pub mod cache;
pub mod config;
pub mod error;
pub mod result;
pub mod routes;
pub mod utils;
pub mod validations;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub resolver: Arc<PolicyResolver>,
}

impl AppState {
    /// 注册表在这里一次性建好，之后所有请求只读共享
    pub fn new(config: Config, store: Arc<dyn CounterStore>) -> Self {
        let resolver = PolicyResolver::new(store, config.quota_strategy);
        tracing::info!(
            "Registered policies: {}",
            resolver.policy_ids().join(", ")
        );
        Self {
            config,
            resolver: Arc::new(resolver),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let rule_routes = Router::new()
        .route("/rules/validate", post(routes::rule::validate_rule))
        .route("/rules/usage", post(routes::rule::rule_usage))
        .route("/rules/reset", post(routes::rule::reset_usage))
        .route("/health", get(routes::health));

    // axum 不支持在根路径 nest
    let router = if state.config.api_base_uri.is_empty() {
        Router::new().merge(rule_routes)
    } else {
        Router::new().nest(&state.config.api_base_uri, rule_routes)
    };

    router
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
