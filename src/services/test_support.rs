// Shared fixtures for service unit tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::daily_client::{RoomError, RoomOutcome, RoomProperties, RoomProvisioner};
use crate::models::account::ProfileFields;
use crate::models::session::Preference;
use crate::models::{Account, AccountRole, ChatMode, PaymentStatus, Session, SessionStatus};
use crate::razorpay_client::{
    GatewayError, GatewayOrder, GatewayRefund, OrderRequest, PaymentGateway, RefundRequest,
};
use crate::services::pricing::FeeSplit;

pub const KEY_SECRET: &str = "rzp_test_secret";

pub fn account(role: AccountRole) -> Account {
    Account::new(
        format!("uid-{}", Uuid::new_v4()),
        role,
        ProfileFields {
            name: Some("Test".into()),
            email: Some("test@example.com".into()),
            ..Default::default()
        },
    )
}

pub fn booked_session(guide_id: Uuid, user_id: Uuid) -> Session {
    let now = Utc::now();
    let preferences = vec![
        Preference { kind: "Strategy".into(), price: Decimal::from(1000) },
        Preference { kind: "ExamDay".into(), price: Decimal::from(500) },
    ];
    let split = FeeSplit::from_preferences(&preferences).unwrap();
    Session {
        id: Uuid::new_v4(),
        guide_id,
        user_id,
        preferences,
        total_amount: split.total_amount,
        platform_fee: split.platform_fee,
        guide_amount: split.guide_amount,
        scheduled_at: now + Duration::days(1),
        duration_minutes: 60,
        status: SessionStatus::Booked,
        payment_status: PaymentStatus::Pending,
        order_id: None,
        payment_id: None,
        refund_id: None,
        refund_requested_at: None,
        paid_at: None,
        payment_transferred: false,
        transferred_at: None,
        room_id: None,
        started_at: None,
        ended_at: None,
        rating: None,
        feedback: None,
        feedback_at: None,
        chat_mode: ChatMode::TwoWay,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub orders: Mutex<Vec<OrderRequest>>,
    pub refunds: Mutex<Vec<(String, RefundRequest)>>,
    pub fail: AtomicBool,
    /// Holds each refund call open this long, so concurrent callers overlap.
    pub refund_delay_ms: AtomicU64,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn key_id(&self) -> &str {
        "rzp_test_key"
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Api { status: 500, body: "down".into() });
        }
        let mut orders = self.orders.lock().unwrap();
        orders.push(request.clone());
        Ok(GatewayOrder {
            id: format!("order_{}", orders.len()),
            amount: request.amount,
            status: "created".into(),
        })
    }

    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        let delay = self.refund_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((payment_id.to_string(), request.clone()));
        Ok(GatewayRefund {
            id: format!("rfnd_{}", refunds.len()),
            amount: request.amount,
            status: "processed".into(),
        })
    }
}

#[derive(Default)]
pub struct FakeRooms {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl RoomProvisioner for FakeRooms {
    async fn ensure_room(&self, _room_id: &str, _properties: &RoomProperties) -> Result<RoomOutcome, RoomError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RoomError::Api { status: 503, body: "unavailable".into() });
        }
        Ok(RoomOutcome::Created)
    }
}
