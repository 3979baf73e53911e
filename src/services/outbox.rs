use std::sync::Arc;
use std::time::Duration;

use crate::db::queries;
use crate::services::bookings::{self, Db};
use crate::services::channel::ChannelManager;
use crate::services::notify::Notifier;
use crate::services::sync;
use crate::state::AppState;

const SWEEP_BATCH: i64 = 20;
const MAX_ATTEMPTS: i64 = 5;

/// Background sweep: retries pending outbox entries (external sync, remote
/// cancellations, notifications) until they succeed or exhaust their
/// attempts. Runs alongside the admin manual-retry path.
pub async fn run(state: Arc<AppState>) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.outbox_sweep_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match sweep_once(&state.db, state.channel.as_ref(), state.notifier.as_ref()).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(processed = n, "outbox sweep finished"),
            Err(err) => tracing::error!("outbox sweep failed: {err}"),
        }
    }
}

/// Processes one batch of pending entries. Returns how many were handled.
pub async fn sweep_once(
    db: &Db,
    channel: &dyn ChannelManager,
    notifier: &dyn Notifier,
) -> anyhow::Result<usize> {
    let entries = {
        let conn = db.lock().unwrap();
        queries::list_pending_outbox(&conn, SWEEP_BATCH)?
    };

    let mut processed = 0;
    for entry in entries {
        let result = dispatch(db, channel, notifier, &entry.kind, &entry.booking_id).await;
        processed += 1;

        match result {
            Ok(()) => {
                let conn = db.lock().unwrap();
                queries::mark_outbox_done(&conn, entry.id)?;
            }
            Err(err) => {
                let give_up = entry.attempts + 1 >= MAX_ATTEMPTS;
                tracing::warn!(
                    outbox_id = entry.id,
                    kind = %entry.kind,
                    booking_id = %entry.booking_id,
                    attempts = entry.attempts + 1,
                    give_up,
                    "outbox entry failed: {err}"
                );
                {
                    let conn = db.lock().unwrap();
                    queries::record_outbox_failure(&conn, entry.id, &err.to_string(), give_up)?;
                }
                if give_up && entry.kind == "sync" {
                    if let Err(notify_err) =
                        notifier.sync_failed(&entry.booking_id, &err.to_string()).await
                    {
                        tracing::warn!("sync-failure notification not delivered: {notify_err}");
                    }
                }
            }
        }
    }

    Ok(processed)
}

async fn dispatch(
    db: &Db,
    channel: &dyn ChannelManager,
    notifier: &dyn Notifier,
    kind: &str,
    booking_id: &str,
) -> anyhow::Result<()> {
    match kind {
        "sync" => {
            sync::sync_booking(db, channel, booking_id)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(())
        }
        "channel_cancel" => {
            let booking = bookings::get(db, booking_id)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            match booking.external_sync_ref {
                Some(remote_id) => channel.cancel_booking(&remote_id).await,
                // Never synced, nothing to cancel remotely.
                None => Ok(()),
            }
        }
        "notify_confirmed" => {
            let booking = bookings::get(db, booking_id)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            notifier.booking_confirmed(&booking).await
        }
        other => anyhow::bail!("unknown outbox kind: {other}"),
    }
}
