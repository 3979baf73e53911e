use crate::db::{queries, retry};
use crate::errors::AppError;
use crate::models::DepositStatus;
use crate::services::bookings::{self, Db};
use crate::services::payments::PaymentProvider;

const MAX_DB_ATTEMPTS: u32 = 3;

/// Outcome of a claim or release. Replays against an already-terminal
/// deposit report the prior outcome instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    Claimed { amount_cents: i64 },
    Released,
    AlreadyClaimed { amount_cents: i64 },
    AlreadyReleased,
}

fn prior_outcome(status: DepositStatus, claimed_cents: i64) -> DepositOutcome {
    match status {
        DepositStatus::Claimed => DepositOutcome::AlreadyClaimed {
            amount_cents: claimed_cents,
        },
        _ => DepositOutcome::AlreadyReleased,
    }
}

/// Captures `amount_cents` from the security-deposit hold. Terminal: once
/// claimed (or released) the deposit never transitions again.
///
/// The row is reserved with a conditional pending-to-claimed update before
/// the provider is called, so two racing claims produce exactly one
/// capture; the loser reports the winner's outcome. A failed capture puts
/// the row back to pending.
pub async fn claim(
    db: &Db,
    payments: &dyn PaymentProvider,
    booking_id: &str,
    amount_cents: i64,
    reason: &str,
) -> Result<DepositOutcome, AppError> {
    let booking = bookings::get(db, booking_id).await?;

    if booking.deposit_status.is_terminal() {
        return Ok(prior_outcome(
            booking.deposit_status,
            booking.deposit_claimed_cents,
        ));
    }

    if amount_cents < 1 || amount_cents > booking.deposit_amount_cents {
        return Err(AppError::Validation(format!(
            "claim amount must be between 1 and {}",
            booking.deposit_amount_cents
        )));
    }

    let auth_ref = booking.deposit_auth_ref.as_deref().ok_or_else(|| {
        AppError::Validation(format!("booking {booking_id} has no authorization hold"))
    })?;

    let reserved = retry::with_retry("claim_deposit", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::claim_deposit(&conn, booking_id, amount_cents)
    })
    .await?;

    if !reserved {
        // Lost the reservation to another claim/release; report what won.
        let booking = bookings::get(db, booking_id).await?;
        return Ok(prior_outcome(
            booking.deposit_status,
            booking.deposit_claimed_cents,
        ));
    }

    if let Err(err) = payments.capture(auth_ref, amount_cents).await {
        reopen(db, booking_id, DepositStatus::Claimed).await;
        return Err(AppError::Provider(err.to_string()));
    }

    tracing::info!(booking_id, amount_cents, reason, "deposit claimed");
    Ok(DepositOutcome::Claimed { amount_cents })
}

/// Cancels the security-deposit hold. Terminal, idempotent against replay.
pub async fn release(
    db: &Db,
    payments: &dyn PaymentProvider,
    booking_id: &str,
) -> Result<DepositOutcome, AppError> {
    let booking = bookings::get(db, booking_id).await?;

    if booking.deposit_status.is_terminal() {
        return Ok(prior_outcome(
            booking.deposit_status,
            booking.deposit_claimed_cents,
        ));
    }

    let auth_ref = booking.deposit_auth_ref.as_deref().ok_or_else(|| {
        AppError::Validation(format!("booking {booking_id} has no authorization hold"))
    })?;

    let reserved = retry::with_retry("release_deposit", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::release_deposit(&conn, booking_id)
    })
    .await?;

    if !reserved {
        let booking = bookings::get(db, booking_id).await?;
        return Ok(prior_outcome(
            booking.deposit_status,
            booking.deposit_claimed_cents,
        ));
    }

    if let Err(err) = payments.cancel_authorization(auth_ref).await {
        reopen(db, booking_id, DepositStatus::Released).await;
        return Err(AppError::Provider(err.to_string()));
    }

    tracing::info!(booking_id, "deposit released");
    Ok(DepositOutcome::Released)
}

/// Best-effort undo of a reservation whose provider call failed. The
/// deposit stays capturable for a later attempt.
async fn reopen(db: &Db, booking_id: &str, from: DepositStatus) {
    let result = retry::with_retry("reopen_deposit", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::reopen_deposit(&conn, booking_id, from.as_str())
    })
    .await;
    if let Err(err) = result {
        tracing::error!(
            booking_id,
            from = from.as_str(),
            "deposit reservation not reopened after provider failure: {err}"
        );
    }
}
