pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;

/// Channel-manager collaborator (the external system of record for listings
/// on booking platforms). Slow, rate-limited and sometimes down; callers
/// must treat every method as failure-prone.
#[async_trait]
pub trait ChannelManager: Send + Sync {
    /// Pushes a booking and returns the remote id.
    async fn create_booking(&self, payload: &serde_json::Value) -> anyhow::Result<String>;

    async fn cancel_booking(&self, remote_id: &str) -> anyhow::Result<()>;

    /// Advisory only; the internal availability check is authoritative.
    async fn check_availability(
        &self,
        accommodation_id: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> anyhow::Result<bool>;
}
