use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::auth::{self, AppState};
use crate::discussions;
use crate::middleware::{ADMIN_ONLY, require_auth, require_role};

/// Public routes, the authenticated discussion surface and the admin routes.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let admin_routes = Router::new()
        .route(
            "/admin/users/{user_id}/backbone-identity",
            post(auth::create_backbone_identity),
        )
        .route_layer(middleware::from_fn_with_state(ADMIN_ONLY, require_role));

    let protected_routes = Router::new()
        .route("/discussions", get(discussions::list))
        .route("/discussions/unread-count", get(discussions::unread_count))
        .route("/discussions/{discussion_id}", get(discussions::detail))
        .route("/discussions/{discussion_id}/read", post(discussions::mark_read))
        .route("/discussions/{discussion_id}/messages", get(discussions::messages))
        .route("/deals/{deal_id}/discussions", post(discussions::start))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
