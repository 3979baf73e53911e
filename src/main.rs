use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use innkeeper::config::AppConfig;
use innkeeper::db;
use innkeeper::handlers;
use innkeeper::models::AccommodationRegistry;
use innkeeper::services::channel::http::HttpChannelManager;
use innkeeper::services::notify::WebhookNotifier;
use innkeeper::services::outbox;
use innkeeper::services::payments::http::HttpPaymentProvider;
use innkeeper::state::{AdmissionQueues, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let accommodations = if config.accommodations_json.is_empty() {
        tracing::info!("ACCOMMODATIONS_JSON not set, using built-in units");
        AccommodationRegistry::default_units()
    } else {
        AccommodationRegistry::from_json(&config.accommodations_json)?
    };

    let payments = HttpPaymentProvider::new(
        config.payment_api_url.clone(),
        config.payment_api_key.clone(),
    );
    let channel = HttpChannelManager::new(
        config.channel_api_url.clone(),
        config.channel_api_key.clone(),
    );
    let notifier = WebhookNotifier::new(config.notify_webhook_url.clone());

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        admission: AdmissionQueues::new(&config),
        accommodations,
        payments: Box::new(payments),
        channel: Box::new(channel),
        notifier: Box::new(notifier),
        config: config.clone(),
    });

    tokio::spawn(outbox::run(state.clone()));

    let app = handlers::app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
