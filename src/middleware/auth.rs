use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
    Extension,
};
use std::sync::Arc;

use crate::error::CoreError;
use crate::models::Account;
use crate::AppState;

/// Who is calling. `account` is `None` until the caller has created a profile.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub external_uid: String,
    pub account: Option<Account>,
}

impl AuthContext {
    pub fn require_account(&self) -> Result<&Account, CoreError> {
        self.account
            .as_ref()
            .ok_or_else(|| CoreError::not_found("Profile not found, create it first"))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, CoreError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| CoreError::Authentication("Missing Authorization header".to_string()))?;
    let value = header
        .to_str()
        .map_err(|_| CoreError::Authentication("Invalid Authorization header format".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            CoreError::Authentication("Invalid Authorization header format. Expected 'Bearer <token>'".to_string())
        })
}

pub async fn auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, CoreError> {
    let token = bearer_token(&headers)?;
    let external_uid = state.identity.verify_token(token).await?;
    let account = state.identity.find_account(&external_uid).await?;

    request.extensions_mut().insert(AuthContext { external_uid, account });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(CoreError::Authentication(_))));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(bearer_token(&headers), Err(CoreError::Authentication(_))));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }
}
