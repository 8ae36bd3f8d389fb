use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use querymon_common::types::UserSnapshot;

use crate::Notifier;

/// Webhook destination transport. Destinations map a destination id to an
/// HTTP endpoint; sends POST a JSON envelope and retry transient failures
/// with exponential backoff.
pub struct WebhookNotifier {
    client: reqwest::Client,
    destinations: RwLock<HashMap<String, String>>,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            destinations: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_destination(&self, destination_id: &str, url: &str) {
        self.destinations
            .write()
            .unwrap()
            .insert(destination_id.to_string(), url.to_string());
    }

    fn url_for(&self, destination_id: &str) -> Option<String> {
        self.destinations.read().unwrap().get(destination_id).cloned()
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(
        &self,
        action_id: &str,
        destination_id: &str,
        subject: &str,
        body: &str,
        principal: Option<&UserSnapshot>,
    ) -> Result<()> {
        let url = self
            .url_for(destination_id)
            .ok_or_else(|| anyhow!("unknown destination '{destination_id}'"))?;

        let payload = serde_json::json!({
            "action_id": action_id,
            "subject": subject,
            "body": body,
            "sender": principal.map(|u| u.name.as_str()),
        });

        let mut last_err = None;
        for attempt in 0..3u32 {
            match self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    tracing::warn!(
                        action_id,
                        attempt,
                        status = %status,
                        "webhook returned non-success status, retrying"
                    );
                    last_err = Some(anyhow!("webhook returned HTTP {status}"));
                }
                Err(e) => {
                    tracing::warn!(action_id, attempt, error = %e, "webhook send failed, retrying");
                    last_err = Some(e.into());
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("webhook send failed")))
    }
}
