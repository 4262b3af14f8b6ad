//! SMS gateway adapter — fire-and-forget delivery of verification codes.
//!
//! Two implementations behind one enum: an HTTP gateway for production and
//! a dev sink that only logs. Whether the API echoes codes back in dev
//! responses is policy owned by the caller, not this adapter.

use anyhow::{Context, Result};

use hush_common::config::{RunMode, SmsConfig};

#[derive(Clone)]
pub enum SmsSender {
    /// Logs the code instead of sending. Development only.
    DevEcho,
    Http(HttpSms),
}

#[derive(Clone)]
pub struct HttpSms {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    sender: String,
}

impl SmsSender {
    pub fn from_config(cfg: &SmsConfig, mode: RunMode) -> Self {
        if cfg.gateway_url.is_empty() {
            if mode.is_production() {
                tracing::warn!("No SMS gateway configured in production — request-code will fail");
            }
            return SmsSender::DevEcho;
        }
        SmsSender::Http(HttpSms {
            client: reqwest::Client::new(),
            gateway_url: cfg.gateway_url.clone(),
            api_key: cfg.api_key.clone(),
            sender: cfg.sender.clone(),
        })
    }

    /// Deliver a verification code. Errors are the caller's to absorb (dev)
    /// or surface as `upstream_unavailable` (production).
    pub async fn send_verification_code(&self, phone: &str, code: &str) -> Result<()> {
        match self {
            SmsSender::DevEcho => {
                tracing::info!(phone = %phone, code = %code, "DEV SMS (not dispatched)");
                Ok(())
            }
            SmsSender::Http(http) => http.send(phone, code).await,
        }
    }
}

impl HttpSms {
    async fn send(&self, phone: &str, code: &str) -> Result<()> {
        let body = serde_json::json!({
            "to": phone,
            "from": self.sender,
            "body": format!("Your Hush verification code is {code}"),
        });

        let response = self
            .client
            .post(&self.gateway_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("SMS gateway unreachable")?;

        if !response.status().is_success() {
            anyhow::bail!("SMS gateway returned {}", response.status());
        }
        tracing::debug!(phone = %phone, "Verification SMS dispatched");
        Ok(())
    }
}
