mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, HeaderValue, Method};
use config::Config;
use db::{DBClient, LedgerExt};
use dotenv::dotenv;
use middleware::{
    rate_limit::{payment_rate_limiter, webhook_rate_limiter},
    RateLimiter,
};
use routes::create_router;
use service::{
    background_jobs::start_escrow_auto_release_job,
    escrow_service::EscrowService,
    payment_method_service::PaymentMethodService,
    payment_provider::{MercadoPagoGateway, PaymentGateway},
    payment_service::PaymentService,
    withdrawal_service::WithdrawalService,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::filter::LevelFilter;
use utils::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub store: Arc<dyn LedgerExt>,
    pub payment_service: PaymentService,
    pub escrow_service: EscrowService,
    pub withdrawal_service: WithdrawalService,
    pub payment_method_service: PaymentMethodService,
    pub payment_limiter: Arc<RateLimiter>,
    pub webhook_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        env: Config,
        store: Arc<dyn LedgerExt>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = env.ledger.clone();
        AppState {
            payment_service: PaymentService::new(
                store.clone(),
                gateway,
                clock.clone(),
                policy.clone(),
                env.webhook_secret.clone(),
            ),
            escrow_service: EscrowService::new(store.clone(), clock.clone(), policy.clone()),
            withdrawal_service: WithdrawalService::new(store.clone(), clock.clone(), policy),
            payment_method_service: PaymentMethodService::new(store.clone(), clock),
            payment_limiter: Arc::new(payment_rate_limiter()),
            webhook_limiter: Arc::new(webhook_rate_limiter()),
            store,
            env,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .init();

    dotenv().ok();

    let config = Config::init();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    tracing::info!("Connection to the database is successful");

    let allowed_origins = vec![
        HeaderValue::from_static("https://laburar.com.ar"),
        HeaderValue::from_static("http://localhost:5173"),
        HeaderValue::from_static("http://localhost:8000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT]);

    let gateway = MercadoPagoGateway::new(&config).context("failed to build the payment gateway client")?;

    let app_state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(DBClient::new(pool)),
        Arc::new(gateway),
        Arc::new(SystemClock),
    ));

    tokio::spawn(start_escrow_auto_release_job(app_state.clone()));

    let app = create_router(app_state).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    tracing::info!("Server is running on http://localhost:{}", config.port);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
