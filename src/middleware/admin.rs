use axum::{extract::Request, middleware::Next, response::Response};

use super::auth::AuthContext;
use crate::error::CoreError;
use crate::services::directory::require_admin;

/// Must be layered inside `auth_middleware`.
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, CoreError> {
    let auth = request
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(|| CoreError::Authentication("Authentication required for admin access".to_string()))?;
    require_admin(auth.require_account()?)?;

    Ok(next.run(request).await)
}
