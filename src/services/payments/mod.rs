pub mod http;

use async_trait::async_trait;

use crate::models::Booking;

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Payment provider collaborator. The checkout session charges the stay and,
/// when a deposit amount is passed, places a manual-capture authorization
/// hold that is captured or cancelled later through `capture` /
/// `cancel_authorization`.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        booking: &Booking,
        deposit_hold_cents: Option<i64>,
    ) -> anyhow::Result<CheckoutSession>;

    async fn capture(&self, auth_ref: &str, amount_cents: i64) -> anyhow::Result<()>;

    async fn cancel_authorization(&self, auth_ref: &str) -> anyhow::Result<()>;

    async fn refund(&self, payment_ref: &str, amount_cents: Option<i64>) -> anyhow::Result<()>;
}
