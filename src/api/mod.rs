pub mod control;
pub mod health;
pub mod intents;
pub mod overrides;
pub mod positions;
pub mod profiles;

use crate::db::Repository;
use crate::orchestration::AdminService;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub admin: AdminService,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, admin: AdminService) -> Self {
        Self { repo, admin }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/control",
            get(control::get_control).put(control::put_control),
        )
        .route("/v1/profiles", get(profiles::list_profiles))
        .route(
            "/v1/profiles/:id",
            get(profiles::get_profile).put(profiles::put_profile),
        )
        .route("/v1/overrides", get(overrides::list_overrides))
        .route(
            "/v1/overrides/:symbol",
            get(overrides::get_override)
                .put(overrides::put_override)
                .delete(overrides::delete_override),
        )
        .route("/v1/positions/:id/state", get(positions::get_state))
        .route("/v1/positions/:id/atr", put(positions::put_atr))
        .route("/v1/positions/:id/intents", get(positions::list_intents))
        .route("/v1/positions/:id/exit", post(positions::create_exit))
        .route("/v1/intents/:id/approve", post(intents::approve))
        .route("/v1/intents/:id/cancel", post(intents::cancel))
        .layer(cors)
        .with_state(state)
}
