use axum::{
    extract::Query,
    middleware::from_fn,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::CoreError;
use crate::middleware::auth::auth_middleware;
use crate::middleware::AuthContext;
use crate::models::account::{GuideQuery, ProfileFields};
use crate::AppState;

pub fn user_routes() -> Router {
    let public = Router::new().route("/api/guides", get(list_guides));

    let protected = Router::new()
        .route("/api/users", post(upsert_profile))
        .route("/api/me", get(me))
        .layer(from_fn(auth_middleware));

    public.merge(protected)
}

async fn upsert_profile(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(profile): Json<ProfileFields>,
) -> Result<Json<Value>, CoreError> {
    let account = state.identity.upsert_profile(&auth.external_uid, profile).await?;
    Ok(Json(json!({ "success": true, "user": account })))
}

async fn me(Extension(auth): Extension<AuthContext>) -> Result<Json<Value>, CoreError> {
    let account = auth.require_account()?;
    Ok(Json(json!({ "success": true, "user": account })))
}

async fn list_guides(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<GuideQuery>,
) -> Result<Json<Value>, CoreError> {
    let guides = state.directory.list_guides(query).await?;
    Ok(Json(json!({ "success": true, "count": guides.len(), "guides": guides })))
}
