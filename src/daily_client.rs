// src/daily_client.rs
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("room provisioning timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomProperties {
    pub enable_screenshare: bool,
    pub enable_chat: bool,
    pub start_audio_off: bool,
    pub start_video_off: bool,
}

impl Default for RoomProperties {
    fn default() -> Self {
        Self {
            enable_screenshare: true,
            enable_chat: true,
            start_audio_off: false,
            start_video_off: false,
        }
    }
}

/// Idempotent video-room creation.
#[async_trait]
pub trait RoomProvisioner: Send + Sync {
    async fn ensure_room(&self, room_id: &str, properties: &RoomProperties) -> Result<RoomOutcome, RoomError>;
}

#[derive(Debug, Serialize)]
struct CreateRoomRequest<'a> {
    name: &'a str,
    properties: &'a RoomProperties,
}

#[derive(Debug, Clone)]
pub struct DailyClient {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl DailyClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl RoomProvisioner for DailyClient {
    async fn ensure_room(&self, room_id: &str, properties: &RoomProperties) -> Result<RoomOutcome, RoomError> {
        let request = CreateRoomRequest { name: room_id, properties };

        // Room creation is idempotent, so transient failures are safe to retry
        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(2),
            multiplier: 2.0,
            max_elapsed_time: Some(self.timeout),
            ..Default::default()
        };

        let operation = || async {
            let response = self
                .client
                .post(format!("{}/rooms", self.base_url))
                .bearer_auth(&self.api_key)
                .timeout(self.timeout)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("Daily API connection error (retrying): {}", e);
                        backoff::Error::transient(RoomError::Request(e.to_string()))
                    } else {
                        backoff::Error::permanent(RoomError::Request(e.to_string()))
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(RoomOutcome::Created);
            }
            if status == StatusCode::CONFLICT {
                return Ok(RoomOutcome::AlreadyExists);
            }

            let body = response.text().await.unwrap_or_default();
            let error = RoomError::Api { status: status.as_u16(), body };
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!("Daily API returned {} (retrying)", status);
                Err(backoff::Error::transient(error))
            } else {
                Err(backoff::Error::permanent(error))
            }
        };

        retry(backoff_config, operation).await
    }
}
