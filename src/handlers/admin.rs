use axum::{
    extract::Path,
    middleware::from_fn,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::middleware::admin::admin_middleware;
use crate::middleware::auth::auth_middleware;
use crate::middleware::AuthContext;
use crate::models::account::UpdateRoleRequest;
use crate::AppState;

/// Upper bound on sessions settled by one manual sweep.
const MANUAL_SWEEP_LIMIT: i64 = 500;

pub fn admin_routes() -> Router {
    Router::new()
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/:id/role", patch(update_role))
        .route("/api/admin/settlements/run", post(run_settlements))
        .layer(from_fn(admin_middleware))
        .layer(from_fn(auth_middleware))
}

async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Value>, CoreError> {
    let users = state.directory.list_accounts(auth.require_account()?).await?;
    Ok(Json(json!({ "success": true, "count": users.len(), "users": users })))
}

async fn update_role(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<Value>, CoreError> {
    let user = state
        .directory
        .set_role(auth.require_account()?, account_id, &request.role)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("User role updated to {}", user.role),
        "user": user
    })))
}

async fn run_settlements(Extension(state): Extension<Arc<AppState>>) -> Result<Json<Value>, CoreError> {
    let summary = state.settlement.settle_pending(MANUAL_SWEEP_LIMIT).await?;
    Ok(Json(json!({
        "success": true,
        "settled": summary.settled,
        "failed": summary.failed
    })))
}
