use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::admission_error;
use crate::errors::AppError;
use crate::models::{Booking, GuestContact};
use crate::services::admission::Priority;
use crate::services::bookings::{self, CreateBookingRequest};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateBookingBody {
    pub accommodation_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_count: i32,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: Option<String>,
    pub notes: Option<String>,
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBookingBody>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let request = CreateBookingRequest {
        accommodation_id: body.accommodation_id,
        check_in: body.check_in,
        check_out: body.check_out,
        guest_count: body.guest_count,
        guest: GuestContact {
            name: body.guest_name,
            email: body.guest_email,
            phone: body.guest_phone,
        },
        notes: body.notes,
    };

    let booking = state
        .admission
        .booking
        .submit(
            Priority::Normal,
            bookings::create(
                &state.db,
                &state.accommodations,
                state.channel.as_ref(),
                request,
            ),
        )
        .await
        .map_err(admission_error)??;

    Ok((StatusCode::CREATED, Json(booking)))
}

#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let limit = query.limit.unwrap_or(50);
    let list = state
        .admission
        .general
        .submit(
            Priority::Normal,
            bookings::list(&state.db, query.status.as_deref(), limit),
        )
        .await
        .map_err(admission_error)??;
    Ok(Json(list))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .admission
        .general
        .submit(Priority::Normal, bookings::get(&state.db, &id))
        .await
        .map_err(admission_error)??;
    Ok(Json(booking))
}

#[derive(Serialize)]
pub struct PaymentSessionResponse {
    pub session_id: String,
    pub url: String,
}

// POST /api/bookings/:id/pay
pub async fn create_payment_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentSessionResponse>, AppError> {
    let session = state
        .admission
        .payment
        .submit(
            Priority::Normal,
            bookings::create_payment_session(&state.db, state.payments.as_ref(), &id),
        )
        .await
        .map_err(admission_error)??;

    Ok(Json(PaymentSessionResponse {
        session_id: session.session_id,
        url: session.url,
    }))
}
