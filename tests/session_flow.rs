use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use examin_backend::daily_client::{RoomError, RoomOutcome, RoomProperties, RoomProvisioner};
use examin_backend::error::CoreError;
use examin_backend::models::account::ProfileFields;
use examin_backend::models::payment::VerifyPaymentRequest;
use examin_backend::models::session::{BookSessionRequest, Preference};
use examin_backend::models::{Account, AccountRole, ChatMode, PaymentStatus, SessionStatus};
use examin_backend::razorpay_client::{
    GatewayError, GatewayOrder, GatewayRefund, OrderRequest, PaymentGateway, RefundRequest,
};
use examin_backend::services::payments::sign;
use examin_backend::services::{
    ChatGate, PaymentOrchestrator, SessionLedger, SettlementEngine, VerificationOutcome,
};
use examin_backend::store::{
    AccountStore, MemoryAccountStore, MemoryMessageStore, MemorySessionStore,
};

const KEY_SECRET: &str = "integration_secret";

#[derive(Default)]
struct RecordingGateway {
    orders: Mutex<Vec<OrderRequest>>,
    refunds: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    fn key_id(&self) -> &str {
        "rzp_test_integration"
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        self.orders.lock().unwrap().push(request.clone());
        Ok(GatewayOrder {
            id: "order_e2e".to_string(),
            amount: request.amount,
            status: "created".to_string(),
        })
    }

    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        self.refunds.lock().unwrap().push((payment_id.to_string(), request.amount));
        Ok(GatewayRefund {
            id: "rfnd_e2e".to_string(),
            amount: request.amount,
            status: "processed".to_string(),
        })
    }
}

#[derive(Default)]
struct CountingRooms {
    calls: AtomicUsize,
}

#[async_trait]
impl RoomProvisioner for CountingRooms {
    async fn ensure_room(&self, _room_id: &str, _properties: &RoomProperties) -> Result<RoomOutcome, RoomError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RoomOutcome::Created)
    }
}

struct Marketplace {
    accounts: Arc<MemoryAccountStore>,
    ledger: SessionLedger,
    payments: PaymentOrchestrator,
    chat: ChatGate,
    gateway: Arc<RecordingGateway>,
    rooms: Arc<CountingRooms>,
    guide: Account,
    user: Account,
}

async fn marketplace() -> Marketplace {
    let accounts = Arc::new(MemoryAccountStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let gateway = Arc::new(RecordingGateway::default());
    let rooms = Arc::new(CountingRooms::default());

    let (_admin, _) = accounts
        .create_if_absent("uid-admin", profile("Admin"))
        .await
        .unwrap();
    let (user, _) = accounts.create_if_absent("uid-user", profile("Ravi")).await.unwrap();
    let (guide, _) = accounts.create_if_absent("uid-guide", profile("Meera")).await.unwrap();
    let guide = accounts.set_role(guide.id, AccountRole::Guide).await.unwrap().unwrap();

    let settlement = SettlementEngine::new(sessions.clone());
    let ledger = SessionLedger::new(
        sessions.clone(),
        accounts.clone(),
        settlement,
        Some(rooms.clone() as Arc<dyn RoomProvisioner>),
        Duration::from_secs(1),
    );
    let payments = PaymentOrchestrator::new(
        sessions.clone(),
        gateway.clone(),
        KEY_SECRET.to_string(),
        "INR".to_string(),
    );
    let chat = ChatGate::new(sessions, Arc::new(MemoryMessageStore::new()));

    Marketplace {
        accounts,
        ledger,
        payments,
        chat,
        gateway,
        rooms,
        guide,
        user,
    }
}

fn profile(name: &str) -> ProfileFields {
    ProfileFields {
        name: Some(name.to_string()),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        ..Default::default()
    }
}

fn strategy_and_exam_day(guide: &Account) -> BookSessionRequest {
    BookSessionRequest {
        guide_id: Some(guide.id),
        preferences: vec![
            Preference { kind: "Strategy Session".to_string(), price: Decimal::from(1000) },
            Preference { kind: "Exam Day Support".to_string(), price: Decimal::from(500) },
        ],
        scheduled_at: Some(Utc::now() + ChronoDuration::days(2)),
        duration_minutes: Some(60),
    }
}

async fn book_and_pay(m: &Marketplace) -> uuid::Uuid {
    let session = m.ledger.book(&m.user, strategy_and_exam_day(&m.guide)).await.unwrap();
    let order = m.payments.create_order(session.id, &m.user).await.unwrap();
    let request = VerifyPaymentRequest {
        session_id: session.id,
        order_id: order.order_id.clone(),
        payment_id: "pay_e2e".to_string(),
        signature: sign(KEY_SECRET, &order.order_id, "pay_e2e"),
    };
    match m.payments.verify_payment(&m.user, &request).await.unwrap() {
        VerificationOutcome::Verified(_) => session.id,
        VerificationOutcome::Rejected(_) => panic!("valid signature was rejected"),
    }
}

#[tokio::test]
async fn end_to_end_session_with_payout_and_feedback() {
    let m = marketplace().await;

    let session = m.ledger.book(&m.user, strategy_and_exam_day(&m.guide)).await.unwrap();
    assert_eq!(session.total_amount, Decimal::from(1500));
    assert_eq!(session.platform_fee, Decimal::from(75));
    assert_eq!(session.guide_amount, Decimal::from(1425));

    let order = m.payments.create_order(session.id, &m.user).await.unwrap();
    assert_eq!(order.amount, Decimal::from(1500));
    assert_eq!(order.amount_minor, 150_000);
    assert_eq!(m.gateway.orders.lock().unwrap().len(), 1);

    let request = VerifyPaymentRequest {
        session_id: session.id,
        order_id: order.order_id.clone(),
        payment_id: "pay_e2e".to_string(),
        signature: sign(KEY_SECRET, &order.order_id, "pay_e2e"),
    };
    let paid = match m.payments.verify_payment(&m.user, &request).await.unwrap() {
        VerificationOutcome::Verified(session) => session,
        VerificationOutcome::Rejected(_) => panic!("valid signature was rejected"),
    };
    assert_eq!(paid.payment_status, PaymentStatus::Completed);

    let started = m.ledger.start(session.id, &m.guide).await.unwrap();
    assert_eq!(started.status, SessionStatus::InProgress);
    assert!(started.room_id.is_some());
    assert_eq!(m.rooms.calls.load(Ordering::SeqCst), 1);

    m.chat.send(session.id, &m.user, Some("Hi, ready when you are")).await.unwrap();
    m.ledger.set_chat_mode(session.id, &m.guide, "one-way").await.unwrap();
    assert!(matches!(
        m.chat.send(session.id, &m.user, Some("one more thing")).await,
        Err(CoreError::Authorization(_))
    ));
    m.chat.send(session.id, &m.guide, Some("Let's begin")).await.unwrap();
    assert_eq!(m.chat.list_since(session.id, &m.user, None).await.unwrap().len(), 2);

    let ended = m.ledger.end(session.id, &m.guide).await.unwrap();
    assert_eq!(ended.status, SessionStatus::Completed);
    assert!(ended.payment_transferred);
    assert_eq!(ended.chat_mode, ChatMode::OneWay);

    let rated = m
        .ledger
        .submit_feedback(session.id, &m.user, 5, Some("Great guidance".to_string()))
        .await
        .unwrap();
    assert_eq!(rated.rating, Some(5));

    let guide = m.accounts.find_by_id(m.guide.id).await.unwrap().unwrap();
    assert_eq!(guide.review_count, 1);
    assert_eq!(guide.rating, Decimal::new(50, 1));

    // completed sessions are no longer refundable
    assert!(matches!(
        m.payments.refund(session.id, &m.user, None).await,
        Err(CoreError::InvalidState(_))
    ));
}

#[tokio::test]
async fn refund_before_start_cancels_session() {
    let m = marketplace().await;
    let session_id = book_and_pay(&m).await;

    let refunded = m
        .payments
        .refund(session_id, &m.user, Some("schedule clash".to_string()))
        .await
        .unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(refunded.status, SessionStatus::Cancelled);
    assert_eq!(refunded.refund_id.as_deref(), Some("rfnd_e2e"));
    assert_eq!(
        m.gateway.refunds.lock().unwrap().clone(),
        vec![("pay_e2e".to_string(), 150_000)]
    );

    assert!(matches!(
        m.ledger.start(session_id, &m.guide).await,
        Err(CoreError::InvalidState(_))
    ));
    assert!(matches!(
        m.payments.refund(session_id, &m.guide, None).await,
        Err(CoreError::Conflict(_))
    ));
    assert_eq!(m.rooms.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_starts_have_one_winner() {
    let m = Arc::new(marketplace().await);
    let session_id = book_and_pay(&m).await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let m = m.clone();
            tokio::spawn(async move { m.ledger.start(session_id, &m.guide).await })
        })
        .collect();

    let mut started = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(CoreError::InvalidState(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(rejected, 3);
    assert_eq!(m.rooms.calls.load(Ordering::SeqCst), 1);
}
