// src/razorpay_client.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::error::CoreError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
}

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        CoreError::ExternalService {
            service: "payment_gateway",
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Amount in the smallest currency unit (paise for INR).
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Minor units as accepted by the gateway.
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub amount: i64,
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub status: String,
}

/// Order creation and refunds against the external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the checkout widget.
    fn key_id(&self) -> &str;

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError>;

    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<GatewayRefund, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    base_url: String,
    timeout: Duration,
}

impl RazorpayClient {
    pub fn new(key_id: String, key_secret: String, base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            key_id,
            key_secret,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    // Payment calls are not idempotent, so unlike room provisioning there is no retry here
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { GatewayError::Timeout } else { GatewayError::Http(e) })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Razorpay API error ({}) on {}: {}", status, path, body);
            return Err(GatewayError::Api { status: status.as_u16(), body });
        }

        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        tracing::debug!(receipt = %request.receipt, amount = request.amount, "creating Razorpay order");
        self.post_json("/orders", request).await
    }

    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        tracing::debug!(payment_id = %payment_id, amount = request.amount, "requesting Razorpay refund");
        self.post_json(&format!("/payments/{}/refund", payment_id), request).await
    }
}
