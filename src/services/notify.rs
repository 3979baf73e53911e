use anyhow::Context;
use async_trait::async_trait;

use crate::models::Booking;

/// Fire-and-forget notification collaborator. Failures are logged by the
/// caller and never roll back a booking state change.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_confirmed(&self, booking: &Booking) -> anyhow::Result<()>;

    async fn sync_failed(&self, booking_id: &str, error: &str) -> anyhow::Result<()>;
}

/// Posts notification events to a configured webhook URL. An empty URL
/// disables delivery (useful in dev).
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn booking_confirmed(&self, booking: &Booking) -> anyhow::Result<()> {
        if self.url.is_empty() {
            tracing::info!(booking_id = %booking.id, "booking confirmed (notifications disabled)");
            return Ok(());
        }

        self.client
            .post(&self.url)
            .json(&serde_json::json!({
                "event": "booking_confirmed",
                "booking_id": booking.id,
                "accommodation_id": booking.accommodation_id,
                "check_in": booking.check_in,
                "check_out": booking.check_out,
                "guest_email": booking.guest.email,
            }))
            .send()
            .await
            .context("failed to deliver confirmation notification")?
            .error_for_status()
            .context("notification endpoint returned error")?;
        Ok(())
    }

    async fn sync_failed(&self, booking_id: &str, error: &str) -> anyhow::Result<()> {
        if self.url.is_empty() {
            tracing::warn!(booking_id, error, "sync failed (notifications disabled)");
            return Ok(());
        }

        self.client
            .post(&self.url)
            .json(&serde_json::json!({
                "event": "sync_failed",
                "booking_id": booking_id,
                "error": error,
            }))
            .send()
            .await
            .context("failed to deliver sync-failure notification")?
            .error_for_status()
            .context("notification endpoint returned error")?;
        Ok(())
    }
}
