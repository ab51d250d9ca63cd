//! Success and failure webhooks.
//!
//! The orchestrator decides which URL to call and when; a [`Notifier`]
//! performs the call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str) -> Result<()>;
}

/// Calls webhooks with a plain `GET`.
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to call webhook {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Webhook {url} returned status {status}");
        }

        tracing::debug!("Webhook {} returned {}", url, status);
        Ok(())
    }
}
