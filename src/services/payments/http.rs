use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use super::{CheckoutSession, PaymentProvider};
use crate::models::Booking;

pub struct HttpPaymentProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpPaymentProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_checkout_session(
        &self,
        booking: &Booking,
        deposit_hold_cents: Option<i64>,
    ) -> anyhow::Result<CheckoutSession> {
        let mut body = serde_json::json!({
            "reference": booking.id,
            "amount_cents": booking.total_price_cents,
            "description": format!(
                "Stay at {} {} to {}",
                booking.accommodation_id, booking.check_in, booking.check_out
            ),
            "customer_email": booking.guest.email,
        });
        if let Some(hold) = deposit_hold_cents {
            body["deposit_hold_cents"] = serde_json::json!(hold);
            body["capture_method"] = serde_json::json!("manual");
        }

        let resp: SessionResponse = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach payment provider")?
            .error_for_status()
            .context("payment provider rejected session creation")?
            .json()
            .await
            .context("invalid session response")?;

        Ok(CheckoutSession {
            session_id: resp.id,
            url: resp.url,
        })
    }

    async fn capture(&self, auth_ref: &str, amount_cents: i64) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/v1/holds/{auth_ref}/capture", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "amount_cents": amount_cents }))
            .send()
            .await
            .context("failed to reach payment provider")?
            .error_for_status()
            .context("capture failed")?;
        Ok(())
    }

    async fn cancel_authorization(&self, auth_ref: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/v1/holds/{auth_ref}/cancel", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to reach payment provider")?
            .error_for_status()
            .context("hold cancellation failed")?;
        Ok(())
    }

    async fn refund(&self, payment_ref: &str, amount_cents: Option<i64>) -> anyhow::Result<()> {
        let mut body = serde_json::json!({ "payment_ref": payment_ref });
        if let Some(amount) = amount_cents {
            body["amount_cents"] = serde_json::json!(amount);
        }

        self.client
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach payment provider")?
            .error_for_status()
            .context("refund failed")?;
        Ok(())
    }
}
