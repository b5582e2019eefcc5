//! Threema Gateway notifier (basic "simple" mode, server-side encryption).

use async_trait::async_trait;

use super::Notifier;
use crate::config::ThreemaConfig;
use crate::error::AlertError;

// ---

pub struct ThreemaGateway {
    http: reqwest::Client,
    api_url: String,
    identity: String,
    secret: String,
}

impl ThreemaGateway {
    // ---
    pub fn new(http: reqwest::Client, cfg: &ThreemaConfig) -> Self {
        Self {
            http,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            identity: cfg.identity.clone(),
            secret: cfg.secret.clone(),
        }
    }

    async fn send_one(&self, recipient: &str, text: &str) -> Result<(), AlertError> {
        // ---
        let url = format!("{}/send_simple", self.api_url);
        let form = [
            ("from", self.identity.as_str()),
            ("to", recipient),
            ("secret", self.secret.as_str()),
            ("text", text),
        ];

        let resp = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AlertError::Notify(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AlertError::Notify(format!(
                "gateway returned status {status} for recipient {recipient}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for ThreemaGateway {
    /// Try every recipient; report the first failure after all were attempted.
    async fn notify(&self, recipients: &[String], text: &str) -> Result<(), AlertError> {
        // ---
        let mut first_error = None;

        for recipient in recipients {
            match self.send_one(recipient, text).await {
                Ok(()) => tracing::debug!(recipient = %recipient, "alert delivered"),
                Err(e) => {
                    tracing::warn!("Alert to {} failed: {}", recipient, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
