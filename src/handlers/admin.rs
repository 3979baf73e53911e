use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::admission_error;
use crate::errors::AppError;
use crate::models::Booking;
use crate::services::admission::Priority;
use crate::services::deposits::{self, DepositOutcome};
use crate::services::{bookings, sync};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

#[derive(Deserialize, Default)]
pub struct CancelBody {
    pub reason: Option<String>,
}

// POST /api/admin/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let reason = body.and_then(|Json(b)| b.reason);

    let booking = state
        .admission
        .booking
        .submit(Priority::High, bookings::cancel(&state.db, &id, reason))
        .await
        .map_err(admission_error)??;
    Ok(Json(booking))
}

#[derive(Deserialize)]
pub struct ClaimBody {
    pub amount_cents: i64,
    pub reason: String,
}

// POST /api/admin/bookings/:id/deposit/claim
pub async fn claim_deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ClaimBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = state
        .admission
        .payment
        .submit(
            Priority::High,
            deposits::claim(
                &state.db,
                state.payments.as_ref(),
                &id,
                body.amount_cents,
                &body.reason,
            ),
        )
        .await
        .map_err(admission_error)??;

    Ok(Json(deposit_outcome_json(outcome)))
}

// POST /api/admin/bookings/:id/deposit/release
pub async fn release_deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = state
        .admission
        .payment
        .submit(
            Priority::High,
            deposits::release(&state.db, state.payments.as_ref(), &id),
        )
        .await
        .map_err(admission_error)??;

    Ok(Json(deposit_outcome_json(outcome)))
}

fn deposit_outcome_json(outcome: DepositOutcome) -> serde_json::Value {
    match outcome {
        DepositOutcome::Claimed { amount_cents } => {
            serde_json::json!({ "outcome": "claimed", "amount_cents": amount_cents })
        }
        DepositOutcome::Released => serde_json::json!({ "outcome": "released" }),
        DepositOutcome::AlreadyClaimed { amount_cents } => {
            serde_json::json!({ "outcome": "already_claimed", "amount_cents": amount_cents })
        }
        DepositOutcome::AlreadyReleased => serde_json::json!({ "outcome": "already_released" }),
    }
}

// POST /api/admin/bookings/:id/sync
pub async fn retry_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let remote_id = state
        .admission
        .booking
        .submit(
            Priority::High,
            sync::sync_booking(&state.db, state.channel.as_ref(), &id),
        )
        .await
        .map_err(admission_error)??;

    Ok(Json(serde_json::json!({ "external_sync_ref": remote_id })))
}

#[derive(Deserialize, Default)]
pub struct RefundBody {
    pub amount_cents: Option<i64>,
}

// POST /api/admin/bookings/:id/refund
pub async fn refund_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<RefundBody>>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let amount_cents = body.and_then(|Json(b)| b.amount_cents);

    let booking = state
        .admission
        .payment
        .submit(
            Priority::High,
            bookings::refund(&state.db, state.payments.as_ref(), &id, amount_cents),
        )
        .await
        .map_err(admission_error)??;
    Ok(Json(booking))
}
