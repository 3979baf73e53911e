use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::db::{queries, retry};
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, DepositStatus, GuestContact, PaymentStatus};
use crate::services::bookings::{self, Db};
use crate::services::channel::ChannelManager;

const MAX_DB_ATTEMPTS: u32 = 3;

/// Pushes a confirmed booking to the channel manager. Idempotent: once
/// `external_sync_ref` is set, every further call returns it without any
/// external traffic. A failed push leaves the field null for retry.
pub async fn sync_booking(
    db: &Db,
    channel: &dyn ChannelManager,
    booking_id: &str,
) -> Result<String, AppError> {
    let booking = bookings::get(db, booking_id).await?;

    if let Some(existing) = booking.external_sync_ref {
        return Ok(existing);
    }

    if !matches!(
        booking.status,
        BookingStatus::Confirmed | BookingStatus::Completed
    ) {
        return Err(AppError::Validation(format!(
            "booking {booking_id} is {}, only confirmed bookings are synced",
            booking.status.as_str()
        )));
    }

    let payload = serde_json::json!({
        "reference": booking.id,
        "unit": booking.accommodation_id,
        "check_in": booking.check_in,
        "check_out": booking.check_out,
        "guest_name": booking.guest.name,
        "guest_email": booking.guest.email,
        "guest_count": booking.guest_count,
        "total_price_cents": booking.total_price_cents,
    });

    let remote_id = channel
        .create_booking(&payload)
        .await
        .map_err(|e| AppError::Provider(e.to_string()))?;

    let written = retry::with_retry("set_sync_ref", MAX_DB_ATTEMPTS, || {
        let conn = db.lock().unwrap();
        queries::set_sync_ref(&conn, booking_id, &remote_id)
    })
    .await?;

    if !written {
        // Another sync won the race; its ref stands. Cancel the remote
        // booking this call created so no duplicate lingers on the channel.
        let booking = bookings::get(db, booking_id).await?;
        if let Some(existing) = booking.external_sync_ref {
            tracing::warn!(
                booking_id,
                remote_id = %remote_id,
                existing = %existing,
                "sync raced, cancelling duplicate remote booking"
            );
            if let Err(err) = channel.cancel_booking(&remote_id).await {
                tracing::error!(
                    booking_id,
                    remote_id = %remote_id,
                    "duplicate remote booking not cancelled: {err}"
                );
            }
            return Ok(existing);
        }
    }

    tracing::info!(booking_id, remote_id = %remote_id, "booking synced to channel manager");
    Ok(remote_id)
}

/// Inbound channel-manager webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub remote_id: String,
    pub accommodation_id: Option<String>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_count: Option<i32>,
    pub total_price_cents: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Acknowledged so the provider stops redelivering, but not processed.
    Ignored,
}

/// Ingests a booking made on an external platform. The booking id is the
/// deterministic `external:<remote_id>`, so redelivery of the same event is
/// an idempotent update, never a duplicate row.
pub async fn handle_webhook(db: &Db, event: ChannelEvent) -> Result<WebhookOutcome, AppError> {
    match event.event_type.as_str() {
        "booking.created" | "booking.updated" => {}
        other => {
            tracing::info!(event_type = other, "ignoring unrecognized channel event");
            return Ok(WebhookOutcome::Ignored);
        }
    }

    let check_in = event
        .check_in
        .ok_or_else(|| AppError::Validation("channel event missing check_in".to_string()))?;
    let check_out = event
        .check_out
        .ok_or_else(|| AppError::Validation("channel event missing check_out".to_string()))?;
    if check_out <= check_in {
        return Err(AppError::Validation(
            "channel event has invalid date range".to_string(),
        ));
    }

    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: format!("external:{}", event.remote_id),
        accommodation_id: event.accommodation_id.unwrap_or_default(),
        check_in,
        check_out,
        guest_count: event.guest_count.unwrap_or(1),
        guest: GuestContact {
            name: event.guest_name.unwrap_or_else(|| "External guest".to_string()),
            email: event.guest_email.unwrap_or_default(),
            phone: None,
        },
        total_price_cents: event.total_price_cents.unwrap_or(0),
        notes: None,
        status: event
            .status
            .as_deref()
            .map(BookingStatus::parse)
            .unwrap_or(BookingStatus::Confirmed),
        // Paid on the external platform; nothing to collect here.
        payment_status: PaymentStatus::Completed,
        external_payment_ref: None,
        external_session_ref: None,
        deposit_amount_cents: 0,
        deposit_auth_ref: None,
        deposit_status: DepositStatus::Pending,
        deposit_claimed_cents: 0,
        external_sync_ref: Some(event.remote_id.clone()),
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    };

    retry::with_retry("upsert_external_booking", MAX_DB_ATTEMPTS, || {
        let mut conn = db.lock().unwrap();
        queries::upsert_booking(&mut conn, &booking)
    })
    .await?;

    tracing::info!(remote_id = %event.remote_id, "channel booking upserted");
    Ok(WebhookOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct CountingChannel {
        creates: AtomicUsize,
        fail_next: AtomicBool,
        create_delay: std::time::Duration,
        cancelled: Mutex<Vec<String>>,
    }

    impl CountingChannel {
        fn new() -> Self {
            Self {
                creates: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                create_delay: std::time::Duration::ZERO,
                cancelled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChannelManager for CountingChannel {
        async fn create_booking(&self, _payload: &serde_json::Value) -> anyhow::Result<String> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("HTTP 500 from channel manager");
            }
            if !self.create_delay.is_zero() {
                tokio::time::sleep(self.create_delay).await;
            }
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(format!("remote-{n}"))
        }
        async fn cancel_booking(&self, remote_id: &str) -> anyhow::Result<()> {
            self.cancelled.lock().unwrap().push(remote_id.to_string());
            Ok(())
        }
        async fn check_availability(
            &self,
            _accommodation_id: &str,
            _check_in: NaiveDate,
            _check_out: NaiveDate,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn confirmed_booking(id: &str) -> Booking {
        let now = Utc::now().naive_utc();
        Booking {
            id: id.to_string(),
            accommodation_id: "cabin-1".to_string(),
            check_in: NaiveDate::from_ymd_opt(2027, 6, 1).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2027, 6, 5).unwrap(),
            guest_count: 2,
            guest: GuestContact {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                phone: None,
            },
            total_price_cents: 48_000,
            notes: None,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Completed,
            external_payment_ref: Some("pay_1".to_string()),
            external_session_ref: None,
            deposit_amount_cents: 20_000,
            deposit_auth_ref: None,
            deposit_status: DepositStatus::Pending,
            deposit_claimed_cents: 0,
            external_sync_ref: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn seeded_db(booking: &Booking) -> Db {
        let conn: Connection = db::init_db(":memory:").unwrap();
        queries::insert_booking(&conn, booking).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let booking = confirmed_booking("bk-1");
        let db = seeded_db(&booking);
        let channel = CountingChannel::new();

        let first = sync_booking(&db, &channel, "bk-1").await.unwrap();
        let second = sync_booking(&db, &channel, "bk-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(channel.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_sync_leaves_ref_null_then_retry_succeeds() {
        let booking = confirmed_booking("bk-1");
        let db = seeded_db(&booking);
        let channel = CountingChannel::new();
        channel.fail_next.store(true, Ordering::SeqCst);

        let err = sync_booking(&db, &channel, "bk-1").await.unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
        {
            let conn = db.lock().unwrap();
            let stored = queries::get_booking(&conn, "bk-1").unwrap().unwrap();
            assert!(stored.external_sync_ref.is_none());
        }

        // Manual retry succeeds and pins the ref.
        let remote = sync_booking(&db, &channel, "bk-1").await.unwrap();
        {
            let conn = db.lock().unwrap();
            let stored = queries::get_booking(&conn, "bk-1").unwrap().unwrap();
            assert_eq!(stored.external_sync_ref.as_deref(), Some(remote.as_str()));
        }

        // A third call makes zero additional external calls.
        sync_booking(&db, &channel, "bk-1").await.unwrap();
        assert_eq!(channel.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_racing_syncs_cancel_duplicate_remote_booking() {
        let booking = confirmed_booking("bk-1");
        let db = seeded_db(&booking);
        let mut channel = CountingChannel::new();
        // Keep both external calls in flight long enough to overlap.
        channel.create_delay = std::time::Duration::from_millis(30);

        // The admin manual retry racing the background sweep.
        let (a, b) = tokio::join!(
            sync_booking(&db, &channel, "bk-1"),
            sync_booking(&db, &channel, "bk-1"),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        // Both callers see the same ref, and it is the stored one.
        assert_eq!(a, b);
        {
            let conn = db.lock().unwrap();
            let stored = queries::get_booking(&conn, "bk-1").unwrap().unwrap();
            assert_eq!(stored.external_sync_ref.as_deref(), Some(a.as_str()));
        }

        // Two remote bookings were created; the loser cancelled its own.
        assert_eq!(channel.creates.load(Ordering::SeqCst), 2);
        let cancelled = channel.cancelled.lock().unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_ne!(cancelled[0], a);
    }

    #[tokio::test]
    async fn test_pending_booking_is_not_synced() {
        let mut booking = confirmed_booking("bk-1");
        booking.status = BookingStatus::Pending;
        let db = seeded_db(&booking);
        let channel = CountingChannel::new();

        let err = sync_booking(&db, &channel, "bk-1").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(channel.creates.load(Ordering::SeqCst), 0);
    }

    fn event(kind: &str) -> ChannelEvent {
        ChannelEvent {
            event_type: kind.to_string(),
            remote_id: "rm-42".to_string(),
            accommodation_id: Some("cabin-1".to_string()),
            check_in: Some(NaiveDate::from_ymd_opt(2027, 7, 1).unwrap()),
            check_out: Some(NaiveDate::from_ymd_opt(2027, 7, 4).unwrap()),
            guest_name: Some("Bob".to_string()),
            guest_email: Some("bob@example.com".to_string()),
            guest_count: Some(3),
            total_price_cents: Some(36_000),
            status: Some("confirmed".to_string()),
        }
    }

    #[tokio::test]
    async fn test_webhook_redelivery_is_single_row() {
        let db = Arc::new(Mutex::new(db::init_db(":memory:").unwrap()));

        assert_eq!(
            handle_webhook(&db, event("booking.created")).await.unwrap(),
            WebhookOutcome::Applied
        );
        assert_eq!(
            handle_webhook(&db, event("booking.created")).await.unwrap(),
            WebhookOutcome::Applied
        );

        let conn = db.lock().unwrap();
        let all = queries::list_bookings(&conn, None, 10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "external:rm-42");
        assert_eq!(all[0].external_sync_ref.as_deref(), Some("rm-42"));
    }

    #[tokio::test]
    async fn test_webhook_update_changes_dates() {
        let db = Arc::new(Mutex::new(db::init_db(":memory:").unwrap()));
        handle_webhook(&db, event("booking.created")).await.unwrap();

        let mut updated = event("booking.updated");
        updated.check_out = Some(NaiveDate::from_ymd_opt(2027, 7, 6).unwrap());
        handle_webhook(&db, updated).await.unwrap();

        let conn = db.lock().unwrap();
        let stored = queries::get_booking(&conn, "external:rm-42").unwrap().unwrap();
        assert_eq!(stored.check_out, NaiveDate::from_ymd_opt(2027, 7, 6).unwrap());
    }

    #[tokio::test]
    async fn test_unrecognized_event_ignored() {
        let db = Arc::new(Mutex::new(db::init_db(":memory:").unwrap()));
        let outcome = handle_webhook(&db, event("listing.photo_updated")).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);

        let conn = db.lock().unwrap();
        assert!(queries::list_bookings(&conn, None, 10).unwrap().is_empty());
    }
}
