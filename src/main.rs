use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use examin_backend::config::{AppConfig, JwtKey};
use examin_backend::daily_client::{DailyClient, RoomProvisioner};
use examin_backend::identity::{IdentityResolver, JwtTokenVerifier, TokenVerifier};
use examin_backend::razorpay_client::RazorpayClient;
use examin_backend::services::{
    AccountDirectory, ChatGate, PaymentOrchestrator, SessionLedger, SettlementEngine,
};
use examin_backend::store::{
    AccountStore, MessageStore, PgAccountStore, PgMessageStore, PgSessionStore, SessionStore,
};
use examin_backend::{db, handlers, middleware, AppState};

/// Batch size for each background settlement pass.
const SWEEP_BATCH: i64 = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    init_logging()?;

    let config = AppConfig::from_env()?;

    let db_pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    let accounts: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(db_pool.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(db_pool.clone()));
    let messages: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(db_pool.clone()));

    let issuer = config.auth.issuer.as_deref();
    let audience = config.auth.audience.as_deref();
    let verifier: Arc<dyn TokenVerifier> = match &config.auth.key {
        JwtKey::Secret(secret) => {
            tracing::info!("Verifying bearer tokens with HS256 shared secret");
            Arc::new(JwtTokenVerifier::hs256(secret.as_bytes(), issuer, audience))
        }
        JwtKey::RsaPublicPem(pem) => {
            tracing::info!("Verifying bearer tokens with RS256 public key");
            Arc::new(JwtTokenVerifier::rs256_pem(pem.as_bytes(), issuer, audience)?)
        }
    };

    let gateway = Arc::new(RazorpayClient::new(
        config.payments.key_id.clone(),
        config.payments.key_secret.clone(),
        config.payments.base_url.clone(),
        config.external_timeout,
    ));

    let rooms: Option<Arc<dyn RoomProvisioner>> = match &config.rooms {
        Some(rooms) => {
            tracing::info!("Initializing Daily room provisioning client...");
            Some(Arc::new(DailyClient::new(
                rooms.api_key.clone(),
                rooms.base_url.clone(),
                config.external_timeout,
            )))
        }
        None => {
            tracing::warn!("DAILY_API_KEY not found. Video rooms will not be provisioned.");
            None
        }
    };

    let settlement = SettlementEngine::new(sessions.clone());

    let shared_state = Arc::new(AppState {
        db_pool,
        identity: IdentityResolver::new(verifier, accounts.clone()),
        ledger: SessionLedger::new(
            sessions.clone(),
            accounts.clone(),
            settlement.clone(),
            rooms,
            config.external_timeout,
        ),
        payments: PaymentOrchestrator::new(
            sessions.clone(),
            gateway,
            config.payments.key_secret.clone(),
            config.payments.currency.clone(),
        ),
        settlement,
        chat: ChatGate::new(sessions, messages),
        directory: AccountDirectory::new(accounts),
    });

    let app = Router::new()
        .merge(handlers::users::user_routes())
        .merge(handlers::sessions::session_routes())
        .merge(handlers::payments::payment_routes())
        .merge(handlers::admin::admin_routes())
        .route("/api/status", get(api_status))
        .layer(axum::middleware::from_fn(middleware::logging::request_logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state.clone()));

    match config.settlement_sweep {
        Some(interval) => spawn_settlement_sweep(shared_state.clone(), interval),
        None => tracing::info!("Background settlement sweep disabled (SETTLEMENT_SWEEP_SECS=0)"),
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}

// Retry path for payouts that failed right after a session ended
fn spawn_settlement_sweep(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        tracing::info!("💸 Starting settlement sweep every {:?}", interval);
        loop {
            tokio::time::sleep(interval).await;
            match state.settlement.settle_pending(SWEEP_BATCH).await {
                Ok(summary) => tracing::debug!(
                    settled = summary.settled.len(),
                    failed = summary.failed,
                    "settlement sweep cycle completed"
                ),
                Err(e) => tracing::error!("❌ Settlement sweep failed: {}", e),
            }
        }
    });
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,examin_backend=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,examin_backend=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for log aggregation
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();

    tracing::info!("🎓 Examin backend starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);

    Ok(())
}

async fn api_status(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status
        }
    }))
}
