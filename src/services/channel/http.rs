use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use super::ChannelManager;

pub struct HttpChannelManager {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpChannelManager {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Deserialize)]
struct AvailabilityResponse {
    available: bool,
}

#[async_trait]
impl ChannelManager for HttpChannelManager {
    async fn create_booking(&self, payload: &serde_json::Value) -> anyhow::Result<String> {
        let resp: CreateResponse = self
            .client
            .post(format!("{}/v1/bookings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .context("failed to reach channel manager")?
            .error_for_status()
            .context("channel manager rejected booking")?
            .json()
            .await
            .context("invalid channel manager response")?;

        Ok(resp.id)
    }

    async fn cancel_booking(&self, remote_id: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/v1/bookings/{remote_id}/cancel", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to reach channel manager")?
            .error_for_status()
            .context("channel manager cancel failed")?;
        Ok(())
    }

    async fn check_availability(
        &self,
        accommodation_id: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> anyhow::Result<bool> {
        let resp: AvailabilityResponse = self
            .client
            .get(format!("{}/v1/availability", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[
                ("unit", accommodation_id),
                ("from", &check_in.to_string()),
                ("to", &check_out.to_string()),
            ])
            .send()
            .await
            .context("failed to reach channel manager")?
            .error_for_status()
            .context("channel availability check failed")?
            .json()
            .await
            .context("invalid availability response")?;

        Ok(resp.available)
    }
}
