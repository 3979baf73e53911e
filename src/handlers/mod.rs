pub mod admin;
pub mod bookings;
pub mod health;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::services::admission::AdmissionError;
use crate::state::AppState;

pub(crate) fn admission_error(err: AdmissionError) -> AppError {
    match err {
        AdmissionError::QueueFull => AppError::QueueFull,
        AdmissionError::TimedOut => AppError::QueueTimeout,
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/pay", post(bookings::create_payment_session))
        .route("/api/admin/bookings/:id/cancel", post(admin::cancel_booking))
        .route("/api/admin/bookings/:id/deposit/claim", post(admin::claim_deposit))
        .route(
            "/api/admin/bookings/:id/deposit/release",
            post(admin::release_deposit),
        )
        .route("/api/admin/bookings/:id/sync", post(admin::retry_sync))
        .route("/api/admin/bookings/:id/refund", post(admin::refund_booking))
        .route("/webhook/payments", post(webhook::payment_webhook))
        .route("/webhook/channel", post(webhook::channel_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
