// Session chat endpoints. Routed from session_routes() so they share its auth layer.
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::middleware::AuthContext;
use crate::models::message::{MessageListQuery, MessageListResponse, MessageResponse, SendMessageRequest};
use crate::AppState;

pub async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<MessageListResponse>, CoreError> {
    let messages = state
        .chat
        .list_since(session_id, auth.require_account()?, query.since)
        .await?;
    Ok(Json(MessageListResponse { success: true, messages }))
}

pub async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), CoreError> {
    let message = state
        .chat
        .send(session_id, auth.require_account()?, request.text.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(MessageResponse { success: true, message })))
}
