use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to reach alert gateway: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Alert gateway answered with status {code}: {body}")]
    Status { code: u16, body: String },
}

/// Best-effort, one-shot operational notification.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), Error>;
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    tlf: &'a str,
    body: &'a str,
}

/// Posts alerts to a messaging gateway's `/send-text` endpoint.
pub struct GatewayAlerts {
    client: Client,
    api_url: String,
    recipient: String,
}

impl GatewayAlerts {
    pub fn new(api_url: String, recipient: String) -> Result<Self, Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            recipient,
        })
    }
}

#[async_trait]
impl AlertSink for GatewayAlerts {
    async fn notify(&self, message: &str) -> Result<(), Error> {
        let response = self
            .client
            .post(format!("{}/send-text", self.api_url))
            .json(&AlertPayload {
                tlf: &self.recipient,
                body: message,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                code: status.as_u16(),
                body,
            });
        }

        info!("alert delivered to {}", self.recipient);
        Ok(())
    }
}

/// Used when no gateway is configured. The failure itself is already logged
/// by the caller and startup warns once that alerting is off.
pub struct DisabledAlerts;

#[async_trait]
impl AlertSink for DisabledAlerts {
    async fn notify(&self, message: &str) -> Result<(), Error> {
        debug!("alerting disabled, dropping alert: {}", message);
        Ok(())
    }
}
