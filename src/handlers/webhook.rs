use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use super::admission_error;
use crate::errors::AppError;
use crate::services::admission::Priority;
use crate::services::{bookings, sync};
use crate::state::AppState;

/// HMAC-SHA1 over the raw request body, base64 encoded, compared against the
/// `x-webhook-signature` header. An empty secret skips verification (dev).
fn verify_signature(secret: &str, headers: &HeaderMap, body: &str) -> Result<(), Response> {
    if secret.is_empty() {
        return Ok(());
    }

    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if signature.is_empty() {
        tracing::warn!("missing x-webhook-signature header");
        return Err((StatusCode::FORBIDDEN, "Missing signature").into_response());
    }

    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return Err((StatusCode::FORBIDDEN, "Invalid signature").into_response()),
    };
    mac.update(body.as_bytes());
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    if expected != signature {
        tracing::warn!("invalid webhook signature");
        return Err((StatusCode::FORBIDDEN, "Invalid signature").into_response());
    }
    Ok(())
}

#[derive(Deserialize)]
struct PaymentEvent {
    #[serde(rename = "type")]
    event_type: String,
    booking_id: Option<String>,
    payment_ref: Option<String>,
    deposit_auth_ref: Option<String>,
    amount_cents: Option<i64>,
}

// POST /webhook/payments
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(resp) = verify_signature(&state.config.payment_webhook_secret, &headers, &body) {
        return resp;
    }

    let event: PaymentEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!("malformed payment webhook: {err}");
            return AppError::Validation("malformed payment event".to_string()).into_response();
        }
    };

    tracing::info!(event_type = %event.event_type, "payment webhook received");

    let result = match event.event_type.as_str() {
        "checkout.completed" => {
            let (Some(booking_id), Some(payment_ref)) = (event.booking_id, event.payment_ref)
            else {
                return AppError::Validation("event missing booking_id or payment_ref".to_string())
                    .into_response();
            };
            state
                .admission
                .booking
                .submit(
                    Priority::High,
                    bookings::mark_paid(
                        &state.db,
                        &booking_id,
                        &payment_ref,
                        event.deposit_auth_ref.as_deref(),
                    ),
                )
                .await
                .map_err(admission_error)
                .and_then(|inner| inner)
                .map(|_| ())
        }
        "checkout.failed" => {
            let Some(booking_id) = event.booking_id else {
                return AppError::Validation("event missing booking_id".to_string())
                    .into_response();
            };
            state
                .admission
                .booking
                .submit(Priority::High, bookings::mark_failed(&state.db, &booking_id))
                .await
                .map_err(admission_error)
                .and_then(|inner| inner)
                .map(|_| ())
        }
        "charge.refunded" => {
            let Some(booking_id) = event.booking_id else {
                return AppError::Validation("event missing booking_id".to_string())
                    .into_response();
            };
            state
                .admission
                .booking
                .submit(
                    Priority::High,
                    bookings::apply_refund_event(&state.db, &booking_id, event.amount_cents),
                )
                .await
                .map_err(admission_error)
                .and_then(|inner| inner)
                .map(|_| ())
        }
        other => {
            // Acknowledge so the provider stops redelivering.
            tracing::info!(event_type = other, "ignoring unrecognized payment event");
            Ok(())
        }
    };

    match result {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "received": true })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// POST /webhook/channel
pub async fn channel_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(resp) = verify_signature(&state.config.channel_webhook_secret, &headers, &body) {
        return resp;
    }

    let event: sync::ChannelEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!("malformed channel webhook: {err}");
            return AppError::Validation("malformed channel event".to_string()).into_response();
        }
    };

    tracing::info!(event_type = %event.event_type, remote_id = %event.remote_id, "channel webhook received");

    let result = state
        .admission
        .booking
        .submit(Priority::High, sync::handle_webhook(&state.db, event))
        .await
        .map_err(admission_error)
        .and_then(|inner| inner);

    match result {
        Ok(outcome) => {
            let label = match outcome {
                sync::WebhookOutcome::Applied => "applied",
                sync::WebhookOutcome::Ignored => "ignored",
            };
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "received": true, "outcome": label })),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}
