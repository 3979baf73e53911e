use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};

use crate::models::{Booking, BookingStatus, DepositStatus, GuestContact, PaymentStatus};

const BOOKING_COLUMNS: &str = "id, accommodation_id, check_in, check_out, guest_count, \
     guest_name, guest_email, guest_phone, total_price_cents, notes, status, payment_status, \
     external_payment_ref, external_session_ref, deposit_amount_cents, deposit_auth_ref, \
     deposit_status, deposit_claimed_cents, external_sync_ref, cancellation_reason, \
     created_at, updated_at";

fn now_str() -> String {
    Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn date_str(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

// ── Bookings ──

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!("INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"),
        params![
            booking.id,
            booking.accommodation_id,
            date_str(&booking.check_in),
            date_str(&booking.check_out),
            booking.guest_count,
            booking.guest.name,
            booking.guest.email,
            booking.guest.phone,
            booking.total_price_cents,
            booking.notes,
            booking.status.as_str(),
            booking.payment_status.as_str(),
            booking.external_payment_ref,
            booking.external_session_ref,
            booking.deposit_amount_cents,
            booking.deposit_auth_ref,
            booking.deposit_status.as_str(),
            booking.deposit_claimed_cents,
            booking.external_sync_ref,
            booking.cancellation_reason,
            booking.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            booking.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

/// Bookings holding the unit in `pending` or `confirmed` whose stored
/// `[check_in, check_out)` overlaps the candidate range.
pub fn count_overlapping(
    conn: &Connection,
    accommodation_id: &str,
    check_in: &NaiveDate,
    check_out: &NaiveDate,
    exclude_id: Option<&str>,
) -> anyhow::Result<i64> {
    // Half-open overlap: existing.check_in < candidate.check_out
    //                AND candidate.check_in < existing.check_out
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE accommodation_id = ?1
           AND status IN ('pending', 'confirmed')
           AND check_in < ?3
           AND ?2 < check_out
           AND id != COALESCE(?4, '')",
        params![
            accommodation_id,
            date_str(check_in),
            date_str(check_out),
            exclude_id,
        ],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Availability check and insert inside one IMMEDIATE transaction, so two
/// concurrent creates for the same unit cannot both pass the check.
/// Returns false (nothing written) when the range is taken.
pub fn insert_if_available(conn: &mut Connection, booking: &Booking) -> anyhow::Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let taken = count_overlapping(
        &tx,
        &booking.accommodation_id,
        &booking.check_in,
        &booking.check_out,
        None,
    )? > 0;

    if taken {
        return Ok(false);
    }

    insert_booking(&tx, booking)?;
    tx.commit()?;
    Ok(true)
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    );

    match result {
        Ok(booking) => Ok(Some(booking)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_bookings(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1 \
                 ORDER BY check_in DESC LIMIT ?2"
            ),
            vec![
                Box::new(status.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
        None => (
            format!("SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY check_in DESC LIMIT ?1"),
            vec![Box::new(limit) as Box<dyn rusqlite::types::ToSql>],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

/// Guarded status transition: only touches the row while it still holds the
/// expected current status. Returns false when the guard did not match.
pub fn transition_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
    reason: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET status = ?1,
             cancellation_reason = COALESCE(?2, cancellation_reason),
             updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![to.as_str(), reason, now_str(), id, from.as_str()],
    )?;
    Ok(count > 0)
}

/// Charge-succeeded webhook: confirm the booking, complete the payment and
/// record the provider refs in one write. The payment ref is set only here.
pub fn mark_paid(
    conn: &Connection,
    id: &str,
    payment_ref: &str,
    deposit_auth_ref: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET status = 'confirmed',
             payment_status = 'completed',
             external_payment_ref = ?1,
             deposit_auth_ref = COALESCE(deposit_auth_ref, ?2),
             updated_at = ?3
         WHERE id = ?4
           AND status = 'pending'
           AND payment_status = 'pending'
           AND external_payment_ref IS NULL",
        params![payment_ref, deposit_auth_ref, now_str(), id],
    )?;
    Ok(count > 0)
}

pub fn mark_payment_failed(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET payment_status = 'failed', updated_at = ?1
         WHERE id = ?2 AND payment_status = 'pending'",
        params![now_str(), id],
    )?;
    Ok(count > 0)
}

pub fn set_payment_refunded(
    conn: &Connection,
    id: &str,
    payment_status: PaymentStatus,
    booking_status: BookingStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET payment_status = ?1, status = ?2, updated_at = ?3
         WHERE id = ?4 AND payment_status = 'completed'",
        params![payment_status.as_str(), booking_status.as_str(), now_str(), id],
    )?;
    Ok(count > 0)
}

/// Checkout session ref is written at most once.
pub fn set_session_ref(conn: &Connection, id: &str, session_ref: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET external_session_ref = ?1, updated_at = ?2
         WHERE id = ?3 AND external_session_ref IS NULL",
        params![session_ref, now_str(), id],
    )?;
    Ok(count > 0)
}

/// The idempotency marker for external sync: written exactly once, retries
/// against a set ref touch nothing.
pub fn set_sync_ref(conn: &Connection, id: &str, sync_ref: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET external_sync_ref = ?1, updated_at = ?2
         WHERE id = ?3 AND external_sync_ref IS NULL",
        params![sync_ref, now_str(), id],
    )?;
    Ok(count > 0)
}

pub fn claim_deposit(conn: &Connection, id: &str, amount_cents: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET deposit_status = 'claimed', deposit_claimed_cents = ?1, updated_at = ?2
         WHERE id = ?3 AND deposit_status = 'pending'",
        params![amount_cents, now_str(), id],
    )?;
    Ok(count > 0)
}

pub fn release_deposit(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET deposit_status = 'released', updated_at = ?1
         WHERE id = ?2 AND deposit_status = 'pending'",
        params![now_str(), id],
    )?;
    Ok(count > 0)
}

/// Puts a reserved deposit back to pending after the provider call behind
/// the reservation failed.
pub fn reopen_deposit(conn: &Connection, id: &str, from_status: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET deposit_status = 'pending', deposit_claimed_cents = 0, updated_at = ?1
         WHERE id = ?2 AND deposit_status = ?3",
        params![now_str(), id, from_status],
    )?;
    Ok(count > 0)
}

/// Insert-or-update keyed by the booking id, as one transaction. Kept as an
/// explicit two-step write so it stays portable across storage engines.
pub fn upsert_booking(conn: &mut Connection, booking: &Booking) -> anyhow::Result<()> {
    let tx = conn.transaction()?;

    let exists: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM bookings WHERE id = ?1",
        params![booking.id],
        |row| row.get(0),
    )?;

    if exists {
        tx.execute(
            "UPDATE bookings
             SET accommodation_id = ?1, check_in = ?2, check_out = ?3, guest_count = ?4,
                 guest_name = ?5, guest_email = ?6, guest_phone = ?7,
                 total_price_cents = ?8, status = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                booking.accommodation_id,
                date_str(&booking.check_in),
                date_str(&booking.check_out),
                booking.guest_count,
                booking.guest.name,
                booking.guest.email,
                booking.guest.phone,
                booking.total_price_cents,
                booking.status.as_str(),
                now_str(),
                booking.id,
            ],
        )?;
    } else {
        insert_booking(&tx, booking)?;
    }

    tx.commit()?;
    Ok(())
}

fn parse_booking_row(row: &rusqlite::Row) -> rusqlite::Result<Booking> {
    let check_in_str: String = row.get(2)?;
    let check_out_str: String = row.get(3)?;
    let status_str: String = row.get(10)?;
    let payment_status_str: String = row.get(11)?;
    let deposit_status_str: String = row.get(16)?;
    let created_at_str: String = row.get(20)?;
    let updated_at_str: String = row.get(21)?;

    let today = Utc::now().date_naive();
    let check_in =
        NaiveDate::parse_from_str(&check_in_str, "%Y-%m-%d").unwrap_or(today);
    let check_out =
        NaiveDate::parse_from_str(&check_out_str, "%Y-%m-%d").unwrap_or(today);
    let created_at = NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc());
    let updated_at = NaiveDateTime::parse_from_str(&updated_at_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc());

    Ok(Booking {
        id: row.get(0)?,
        accommodation_id: row.get(1)?,
        check_in,
        check_out,
        guest_count: row.get(4)?,
        guest: GuestContact {
            name: row.get(5)?,
            email: row.get(6)?,
            phone: row.get(7)?,
        },
        total_price_cents: row.get(8)?,
        notes: row.get(9)?,
        status: BookingStatus::parse(&status_str),
        payment_status: PaymentStatus::parse(&payment_status_str),
        external_payment_ref: row.get(12)?,
        external_session_ref: row.get(13)?,
        deposit_amount_cents: row.get(14)?,
        deposit_auth_ref: row.get(15)?,
        deposit_status: DepositStatus::parse(&deposit_status_str),
        deposit_claimed_cents: row.get(17)?,
        external_sync_ref: row.get(18)?,
        cancellation_reason: row.get(19)?,
        created_at,
        updated_at,
    })
}

// ── Outbox ──

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: i64,
    pub kind: String,
    pub booking_id: String,
    pub attempts: i64,
}

pub fn enqueue_outbox(conn: &Connection, kind: &str, booking_id: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO outbox (kind, booking_id) VALUES (?1, ?2)",
        params![kind, booking_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_pending_outbox(conn: &Connection, limit: i64) -> anyhow::Result<Vec<OutboxEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, booking_id, attempts FROM outbox
         WHERE status = 'pending' ORDER BY id ASC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(OutboxEntry {
            id: row.get(0)?,
            kind: row.get(1)?,
            booking_id: row.get(2)?,
            attempts: row.get(3)?,
        })
    })?;

    let mut entries = vec![];
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

pub fn mark_outbox_done(conn: &Connection, id: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE outbox SET status = 'done', updated_at = datetime('now') WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Records a failed attempt; the entry becomes `failed` (and stops being
/// swept) once `give_up` is set.
pub fn record_outbox_failure(
    conn: &Connection,
    id: i64,
    error: &str,
    give_up: bool,
) -> anyhow::Result<()> {
    let status = if give_up { "failed" } else { "pending" };
    conn.execute(
        "UPDATE outbox
         SET attempts = attempts + 1, last_error = ?1, status = ?2, updated_at = datetime('now')
         WHERE id = ?3",
        params![error, status, id],
    )?;
    Ok(())
}
