use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{queries, retry};
use crate::errors::AppError;
use crate::models::{
    Accommodation, AccommodationRegistry, Booking, BookingStatus, DepositStatus, GuestContact,
    PaymentStatus,
};
use crate::services::availability;
use crate::services::channel::ChannelManager;

const MAX_DB_ATTEMPTS: u32 = 3;

pub type Db = Arc<Mutex<Connection>>;

#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub accommodation_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_count: i32,
    pub guest: GuestContact,
    pub notes: Option<String>,
}

fn validate<'a>(
    registry: &'a AccommodationRegistry,
    req: &CreateBookingRequest,
    today: NaiveDate,
) -> Result<&'a Accommodation, AppError> {
    let unit = registry
        .get(&req.accommodation_id)
        .ok_or_else(|| AppError::Validation(format!("unknown accommodation: {}", req.accommodation_id)))?;

    if req.check_out <= req.check_in {
        return Err(AppError::Validation(
            "check-out must be after check-in".to_string(),
        ));
    }
    if req.check_in < today {
        return Err(AppError::Validation(
            "check-in must not be in the past".to_string(),
        ));
    }
    if req.guest_count < 1 || req.guest_count > unit.capacity {
        return Err(AppError::Validation(format!(
            "guest count must be between 1 and {}",
            unit.capacity
        )));
    }
    if req.guest.name.trim().is_empty() {
        return Err(AppError::Validation("guest name is required".to_string()));
    }
    if !req.guest.email.contains('@') || req.guest.email.trim().len() < 3 {
        return Err(AppError::Validation("guest email is invalid".to_string()));
    }

    Ok(unit)
}

/// Creates a booking in `pending`/`pending` after the availability check.
/// The internal check and the insert run inside one transaction; the
/// channel-manager check is advisory and fails open.
pub async fn create(
    db: &Db,
    registry: &AccommodationRegistry,
    channel: &dyn ChannelManager,
    req: CreateBookingRequest,
) -> Result<Booking, AppError> {
    let today = Utc::now().date_naive();
    let unit = validate(registry, &req, today)?;

    let nights = (req.check_out - req.check_in).num_days();
    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: Uuid::new_v4().to_string(),
        accommodation_id: req.accommodation_id.clone(),
        check_in: req.check_in,
        check_out: req.check_out,
        guest_count: req.guest_count,
        guest: req.guest,
        total_price_cents: nights * unit.nightly_rate_cents,
        notes: req.notes,
        status: BookingStatus::Pending,
        payment_status: PaymentStatus::Pending,
        external_payment_ref: None,
        external_session_ref: None,
        deposit_amount_cents: unit.deposit_cents,
        deposit_auth_ref: None,
        deposit_status: DepositStatus::Pending,
        deposit_claimed_cents: 0,
        external_sync_ref: None,
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    };

    if !availability::external_check(channel, &req.accommodation_id, req.check_in, req.check_out)
        .await
    {
        return Err(AppError::DatesNotAvailable(format!(
            "{} is not available from {} to {}",
            req.accommodation_id, req.check_in, req.check_out
        )));
    }

    let inserted = retry::with_retry("create_booking", MAX_DB_ATTEMPTS, || {
        let mut conn = db.lock().unwrap();
        queries::insert_if_available(&mut conn, &booking)
    })
    .await?;

    if !inserted {
        return Err(AppError::DatesNotAvailable(format!(
            "{} is not available from {} to {}",
            booking.accommodation_id, booking.check_in, booking.check_out
        )));
    }

    tracing::info!(
        booking_id = %booking.id,
        accommodation_id = %booking.accommodation_id,
        "booking created"
    );
    Ok(booking)
}

pub fn load(conn: &Connection, id: &str) -> Result<Booking, AppError> {
    queries::get_booking(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

pub async fn get(db: &Db, id: &str) -> Result<Booking, AppError> {
    let conn = db.lock().unwrap();
    load(&conn, id)
}

pub async fn list(db: &Db, status: Option<&str>, limit: i64) -> Result<Vec<Booking>, AppError> {
    let conn = db.lock().unwrap();
    Ok(queries::list_bookings(&conn, status, limit)?)
}

async fn guarded_transition(
    db: &Db,
    id: &str,
    to: BookingStatus,
    reason: Option<String>,
) -> Result<Booking, AppError> {
    let current = get(db, id).await?;
    if !current.status.can_transition_to(to) {
        return Err(AppError::InvalidTransition(format!(
            "booking {id}: {} -> {}",
            current.status.as_str(),
            to.as_str()
        )));
    }

    let changed = retry::with_retry("transition_status", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::transition_status(&conn, id, current.status, to, reason.as_deref())
    })
    .await?;

    if !changed {
        return Err(AppError::InvalidTransition(format!(
            "booking {id}: state changed concurrently"
        )));
    }

    tracing::info!(booking_id = %id, status = to.as_str(), "booking status changed");
    get(db, id).await
}

pub async fn confirm(db: &Db, id: &str) -> Result<Booking, AppError> {
    guarded_transition(db, id, BookingStatus::Confirmed, None).await
}

/// Cancels a booking. When the booking was already pushed to the channel
/// manager, an outbox entry takes care of the remote cancellation, in the
/// same transaction as the status write.
pub async fn cancel(db: &Db, id: &str, reason: Option<String>) -> Result<Booking, AppError> {
    let current = get(db, id).await?;
    if !current.status.can_transition_to(BookingStatus::Cancelled) {
        return Err(AppError::InvalidTransition(format!(
            "booking {id}: {} -> cancelled",
            current.status.as_str()
        )));
    }

    let synced = current.external_sync_ref.is_some();
    let changed = retry::with_retry("cancel_booking", MAX_DB_ATTEMPTS, || {
        let mut conn = db.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = queries::transition_status(
            &tx,
            id,
            current.status,
            BookingStatus::Cancelled,
            reason.as_deref(),
        )?;
        if changed && synced {
            queries::enqueue_outbox(&tx, "channel_cancel", id)?;
        }
        tx.commit()?;
        Ok(changed)
    })
    .await?;

    if !changed {
        return Err(AppError::InvalidTransition(format!(
            "booking {id}: state changed concurrently"
        )));
    }

    tracing::info!(booking_id = %id, "booking cancelled");
    get(db, id).await
}

/// Charge-succeeded webhook entry point. Confirms the booking, completes the
/// payment and, in the same transaction, queues the external sync and the
/// confirmation notification. Redelivery of the same charge is a no-op.
pub async fn mark_paid(
    db: &Db,
    id: &str,
    payment_ref: &str,
    deposit_auth_ref: Option<&str>,
) -> Result<Booking, AppError> {
    let changed = retry::with_retry("mark_paid", MAX_DB_ATTEMPTS, || {
        let mut conn = db.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = queries::mark_paid(&tx, id, payment_ref, deposit_auth_ref)?;
        if changed {
            queries::enqueue_outbox(&tx, "sync", id)?;
            queries::enqueue_outbox(&tx, "notify_confirmed", id)?;
        }
        tx.commit()?;
        Ok(changed)
    })
    .await?;

    let booking = get(db, id).await?;
    if changed {
        tracing::info!(booking_id = %id, payment_ref, "payment completed, booking confirmed");
        return Ok(booking);
    }

    // Webhook redelivery for a charge we already recorded.
    if booking.external_payment_ref.as_deref() == Some(payment_ref) {
        return Ok(booking);
    }

    Err(AppError::InvalidTransition(format!(
        "booking {id}: payment {} -> completed",
        booking.payment_status.as_str()
    )))
}

pub async fn mark_failed(db: &Db, id: &str) -> Result<Booking, AppError> {
    let changed = retry::with_retry("mark_payment_failed", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::mark_payment_failed(&conn, id)
    })
    .await?;

    let booking = get(db, id).await?;
    if changed || booking.payment_status == PaymentStatus::Failed {
        tracing::info!(booking_id = %id, "payment marked failed");
        return Ok(booking);
    }

    Err(AppError::InvalidTransition(format!(
        "booking {id}: payment {} -> failed",
        booking.payment_status.as_str()
    )))
}

/// Creates the checkout session for a pending booking: the stay charge plus
/// a manual-capture hold for the security deposit. The session ref is
/// written at most once; a second attempt is a conflict.
pub async fn create_payment_session(
    db: &Db,
    payments: &dyn crate::services::payments::PaymentProvider,
    id: &str,
) -> Result<crate::services::payments::CheckoutSession, AppError> {
    let booking = get(db, id).await?;

    if booking.status != BookingStatus::Pending
        || booking.payment_status != PaymentStatus::Pending
    {
        return Err(AppError::InvalidTransition(format!(
            "booking {id} is not awaiting payment"
        )));
    }
    if booking.external_session_ref.is_some() {
        return Err(AppError::InvalidTransition(format!(
            "booking {id} already has a payment session"
        )));
    }

    let deposit_hold = (booking.deposit_amount_cents > 0).then_some(booking.deposit_amount_cents);
    let session = payments
        .create_checkout_session(&booking, deposit_hold)
        .await
        .map_err(|e| AppError::Provider(e.to_string()))?;

    let written = retry::with_retry("set_session_ref", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::set_session_ref(&conn, id, &session.session_id)
    })
    .await?;

    if !written {
        return Err(AppError::InvalidTransition(format!(
            "booking {id} already has a payment session"
        )));
    }

    tracing::info!(booking_id = %id, session_id = %session.session_id, "payment session created");
    Ok(session)
}

/// Refund state targets shared by the admin path and the provider webhook.
fn refund_targets(
    booking: &Booking,
    amount_cents: Option<i64>,
) -> Result<(PaymentStatus, BookingStatus), AppError> {
    if let Some(amount) = amount_cents {
        if amount < 1 || amount >= booking.total_price_cents {
            return Err(AppError::Validation(
                "partial refund amount must be positive and below the total".to_string(),
            ));
        }
    }

    let payment_target = match amount_cents {
        Some(_) => PaymentStatus::PartiallyRefunded,
        None => PaymentStatus::Refunded,
    };
    if !booking.payment_status.can_transition_to(payment_target) {
        return Err(AppError::InvalidTransition(format!(
            "booking {}: payment {} -> {}",
            booking.id,
            booking.payment_status.as_str(),
            payment_target.as_str()
        )));
    }

    let status_target = match amount_cents {
        Some(_) => BookingStatus::PartiallyRefunded,
        None if booking.status.can_transition_to(BookingStatus::Cancelled) => {
            BookingStatus::Cancelled
        }
        None => BookingStatus::PartiallyRefunded,
    };
    if !booking.status.can_transition_to(status_target) {
        return Err(AppError::InvalidTransition(format!(
            "booking {}: {} -> {}",
            booking.id,
            booking.status.as_str(),
            status_target.as_str()
        )));
    }

    Ok((payment_target, status_target))
}

/// Records a refund reported by the payment provider's webhook. The money
/// already moved; this only brings local state in line.
pub async fn apply_refund_event(
    db: &Db,
    id: &str,
    amount_cents: Option<i64>,
) -> Result<Booking, AppError> {
    let booking = get(db, id).await?;
    let (payment_target, status_target) = refund_targets(&booking, amount_cents)?;

    let changed = retry::with_retry("set_payment_refunded", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::set_payment_refunded(&conn, id, payment_target, status_target)
    })
    .await?;

    if !changed {
        return Err(AppError::InvalidTransition(format!(
            "booking {id}: state changed concurrently"
        )));
    }

    tracing::info!(booking_id = %id, amount_cents, "refund recorded from webhook");
    get(db, id).await
}

/// Admin-triggered refund. Full refunds cancel the booking; partial refunds
/// leave the stay in place and mark it partially refunded.
pub async fn refund(
    db: &Db,
    payments: &dyn crate::services::payments::PaymentProvider,
    id: &str,
    amount_cents: Option<i64>,
) -> Result<Booking, AppError> {
    let booking = get(db, id).await?;

    let payment_ref = booking
        .external_payment_ref
        .as_deref()
        .ok_or_else(|| AppError::Validation(format!("booking {id} has no captured payment")))?;

    let (payment_target, status_target) = refund_targets(&booking, amount_cents)?;

    payments
        .refund(payment_ref, amount_cents)
        .await
        .map_err(|e| AppError::Provider(e.to_string()))?;

    let changed = retry::with_retry("set_payment_refunded", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::set_payment_refunded(&conn, id, payment_target, status_target)
    })
    .await?;

    if !changed {
        return Err(AppError::InvalidTransition(format!(
            "booking {id}: state changed concurrently"
        )));
    }

    tracing::info!(booking_id = %id, amount_cents, "refund recorded");
    get(db, id).await
}
