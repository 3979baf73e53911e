use std::env;
use std::time::Duration;

/// Tuning for one admission class (see `services::admission`).
#[derive(Clone, Debug)]
pub struct AdmissionClassConfig {
    pub max_concurrent: usize,
    pub max_queue_depth: usize,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub payment_api_url: String,
    pub payment_api_key: String,
    pub payment_webhook_secret: String,
    pub channel_api_url: String,
    pub channel_api_key: String,
    pub channel_webhook_secret: String,
    pub notify_webhook_url: String,
    pub accommodations_json: String,
    pub outbox_sweep_secs: u64,
    pub booking_class: AdmissionClassConfig,
    pub payment_class: AdmissionClassConfig,
    pub general_class: AdmissionClassConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "innkeeper.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            payment_api_url: env::var("PAYMENT_API_URL")
                .unwrap_or_else(|_| "https://api.payments.example.com".to_string()),
            payment_api_key: env::var("PAYMENT_API_KEY").unwrap_or_default(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            channel_api_url: env::var("CHANNEL_API_URL")
                .unwrap_or_else(|_| "https://api.channel.example.com".to_string()),
            channel_api_key: env::var("CHANNEL_API_KEY").unwrap_or_default(),
            channel_webhook_secret: env::var("CHANNEL_WEBHOOK_SECRET").unwrap_or_default(),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
            accommodations_json: env::var("ACCOMMODATIONS_JSON").unwrap_or_default(),
            outbox_sweep_secs: env::var("OUTBOX_SWEEP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            booking_class: AdmissionClassConfig {
                max_concurrent: env_usize("BOOKING_MAX_CONCURRENT", 3),
                max_queue_depth: env_usize("BOOKING_QUEUE_DEPTH", 20),
                timeout: Duration::from_millis(env_u64("BOOKING_QUEUE_TIMEOUT_MS", 15_000)),
            },
            payment_class: AdmissionClassConfig {
                max_concurrent: env_usize("PAYMENT_MAX_CONCURRENT", 2),
                max_queue_depth: env_usize("PAYMENT_QUEUE_DEPTH", 10),
                timeout: Duration::from_millis(env_u64("PAYMENT_QUEUE_TIMEOUT_MS", 30_000)),
            },
            general_class: AdmissionClassConfig {
                max_concurrent: env_usize("GENERAL_MAX_CONCURRENT", 10),
                max_queue_depth: env_usize("GENERAL_QUEUE_DEPTH", 50),
                timeout: Duration::from_millis(env_u64("GENERAL_QUEUE_TIMEOUT_MS", 5_000)),
            },
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
