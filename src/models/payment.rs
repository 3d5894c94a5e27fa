// src/models/payment.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Session;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub session_id: Uuid,
}

/// Fields posted back by the checkout widget after the user pays.
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub session_id: Uuid,
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundPaymentRequest {
    pub session_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub session_id: Uuid,
    pub order_id: String,
    /// Display amount, same as the session total.
    pub amount: Decimal,
    /// Minor units, as the checkout widget expects.
    pub amount_minor: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub success: bool,
    #[serde(flatten)]
    pub order: OrderDetails,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub message: String,
    pub session: Session,
}
