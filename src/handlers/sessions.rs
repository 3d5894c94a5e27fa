use axum::{
    extract::{Path, Query},
    http::StatusCode,
    middleware::from_fn,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::messages::{list_messages, send_message};
use crate::error::CoreError;
use crate::middleware::auth::auth_middleware;
use crate::middleware::AuthContext;
use crate::models::session::{
    BookSessionRequest, ChatModeRequest, ChatModeResponse, FeedbackRequest, SessionListQuery,
    SessionListResponse, SessionResponse, StartSessionResponse,
};
use crate::AppState;

pub fn session_routes() -> Router {
    Router::new()
        .route("/api/sessions", post(book_session))
        .route("/api/sessions/my", get(my_sessions))
        .route("/api/sessions/guide", get(guide_sessions))
        .route("/api/sessions/feedback", post(submit_feedback))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/start", post(start_session))
        .route("/api/sessions/:id/end", post(end_session))
        .route("/api/sessions/:id/chat-mode", patch(set_chat_mode))
        .route("/api/sessions/:id/messages", get(list_messages).post(send_message))
        .layer(from_fn(auth_middleware))
}

async fn book_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BookSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), CoreError> {
    let session = state.ledger.book(auth.require_account()?, request).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { success: true, session })))
}

async fn my_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<SessionListResponse>, CoreError> {
    let sessions = state
        .ledger
        .list_for_user(auth.require_account()?, query.status.as_deref())
        .await?;
    Ok(Json(SessionListResponse { success: true, sessions }))
}

async fn guide_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<SessionListResponse>, CoreError> {
    let sessions = state
        .ledger
        .list_for_guide(auth.require_account()?, query.status.as_deref())
        .await?;
    Ok(Json(SessionListResponse { success: true, sessions }))
}

async fn get_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, CoreError> {
    let session = state.ledger.get_session(session_id, auth.require_account()?).await?;
    Ok(Json(SessionResponse { success: true, session }))
}

async fn start_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<StartSessionResponse>, CoreError> {
    let session = state.ledger.start(session_id, auth.require_account()?).await?;
    let room_id = session.room_id.clone().unwrap_or_default();
    Ok(Json(StartSessionResponse { success: true, room_id, session }))
}

async fn end_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, CoreError> {
    let session = state.ledger.end(session_id, auth.require_account()?).await?;
    Ok(Json(SessionResponse { success: true, session }))
}

async fn submit_feedback(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<SessionResponse>, CoreError> {
    let session = state
        .ledger
        .submit_feedback(
            request.session_id,
            auth.require_account()?,
            request.rating,
            request.feedback,
        )
        .await?;
    Ok(Json(SessionResponse { success: true, session }))
}

async fn set_chat_mode(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ChatModeRequest>,
) -> Result<Json<ChatModeResponse>, CoreError> {
    let session = state
        .ledger
        .set_chat_mode(session_id, auth.require_account()?, &request.mode)
        .await?;
    Ok(Json(ChatModeResponse {
        success: true,
        session_id: session.id,
        chat_mode: session.chat_mode,
    }))
}
