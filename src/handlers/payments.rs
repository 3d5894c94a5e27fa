use axum::{
    http::StatusCode,
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use std::sync::Arc;

use crate::error::CoreError;
use crate::middleware::auth::auth_middleware;
use crate::middleware::AuthContext;
use crate::models::payment::{
    CreateOrderRequest, OrderResponse, PaymentResponse, RefundPaymentRequest, VerifyPaymentRequest,
};
use crate::models::ErrorResponse;
use crate::services::VerificationOutcome;
use crate::AppState;

pub fn payment_routes() -> Router {
    Router::new()
        .route("/api/payments/create-order", post(create_order))
        .route("/api/payments/verify", post(verify_payment))
        .route("/api/payments/refund", post(refund_payment))
        .layer(from_fn(auth_middleware))
}

async fn create_order(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<OrderResponse>, CoreError> {
    let order = state
        .payments
        .create_order(request.session_id, auth.require_account()?)
        .await?;
    Ok(Json(OrderResponse { success: true, order }))
}

async fn verify_payment(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Response, CoreError> {
    let outcome = state
        .payments
        .verify_payment(auth.require_account()?, &request)
        .await?;

    let response = match outcome {
        VerificationOutcome::Verified(session) => Json(PaymentResponse {
            success: true,
            message: "Payment verified successfully".to_string(),
            session,
        })
        .into_response(),
        // a bad signature is an expected outcome, not a server fault
        VerificationOutcome::Rejected(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                kind: None,
                message: "Payment verification failed".to_string(),
            }),
        )
            .into_response(),
    };
    Ok(response)
}

async fn refund_payment(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<Json<PaymentResponse>, CoreError> {
    let session = state
        .payments
        .refund(request.session_id, auth.require_account()?, request.reason)
        .await?;
    Ok(Json(PaymentResponse {
        success: true,
        message: "Refund processed successfully".to_string(),
        session,
    }))
}
