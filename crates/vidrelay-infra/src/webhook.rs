use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

use vidrelay_core::models::Job;
use vidrelay_core::{compute_retry_backoff, CompletionHook, WebhookConfig};

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_EVENT_COMPLETED: &str = "transfer.completed";
const MAX_BACKOFF_SECS: u64 = 60;

/// Configuration for the downstream clip-processing webhook
#[derive(Clone, Debug)]
pub struct ClipWebhookConfig {
    pub url: String,
    pub secret: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl ClipWebhookConfig {
    /// `None` when no endpoint is configured.
    pub fn from_config(config: &WebhookConfig) -> Option<Self> {
        let url = config.url.clone()?;
        Some(Self {
            url,
            secret: config.secret.clone(),
            timeout_secs: config.timeout_secs,
            max_attempts: config.max_attempts.max(1),
            backoff_base_ms: 1000,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipWebhookPayload {
    pub event: String,
    pub job_id: Uuid,
    pub result_ref: Option<String>,
    pub destination_key: String,
    pub source_ref: String,
    pub bytes_transferred: i64,
    pub context: Option<serde_json::Value>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for ClipWebhookPayload {
    fn from(job: &Job) -> Self {
        Self {
            event: WEBHOOK_EVENT_COMPLETED.to_string(),
            job_id: job.id,
            result_ref: job.result_ref.clone(),
            destination_key: job.destination_key.clone(),
            source_ref: job.source_ref.clone(),
            bytes_transferred: job.bytes_transferred,
            context: job.context.clone(),
            completed_at: job.completed_at,
        }
    }
}

/// Notifies the clip-processing service that a transfer completed.
///
/// Delivery is retried in-process with exponential backoff. The caller marks
/// the job as fired only after this returns `Ok`.
#[derive(Clone)]
pub struct ClipWebhookService {
    http_client: Client,
    config: ClipWebhookConfig,
}

impl ClipWebhookService {
    pub fn new(config: ClipWebhookConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for webhooks")?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Send one signed delivery attempt
    #[tracing::instrument(skip(self, payload), fields(job_id = %payload.job_id))]
    async fn send_webhook(&self, payload: &ClipWebhookPayload) -> Result<u16> {
        let body = serde_json::to_string(payload).context("Failed to serialize webhook payload")?;

        let mut request = self
            .http_client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "vidrelay-webhook/1.0");

        if let Some(ref secret) = self.config.secret {
            let signature = sign_payload(&body, secret)?;
            request = request.header("X-Webhook-Signature", format!("v1={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .context("Failed to send webhook request")?;

        let status_code = response.status().as_u16();
        if response.status().is_success() {
            return Ok(status_code);
        }

        let response_body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Failed to read response body"));
        Err(anyhow::anyhow!(
            "Webhook returned non-2xx status: {} - {}",
            status_code,
            response_body
        ))
    }

    /// Deliver `payload`, retrying up to `max_attempts` times
    pub async fn deliver(&self, payload: &ClipWebhookPayload) -> Result<()> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            match self.send_webhook(payload).await {
                Ok(status_code) => {
                    tracing::info!(
                        job_id = %payload.job_id,
                        status_code = status_code,
                        attempt = attempt,
                        "Webhook delivered successfully"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %payload.job_id,
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Webhook delivery failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.config.max_attempts {
                let delay = compute_retry_backoff(
                    (attempt - 1) as i32,
                    self.config.backoff_base_ms,
                    MAX_BACKOFF_SECS,
                );
                tokio::time::sleep(delay).await;
            }
        }

        let error = last_error.unwrap_or_else(|| anyhow::anyhow!("no delivery attempts made"));
        Err(error.context(format!(
            "Webhook delivery failed after {} attempts",
            self.config.max_attempts
        )))
    }
}

#[async_trait]
impl CompletionHook for ClipWebhookService {
    async fn job_completed(&self, job: &Job) -> Result<()> {
        self.deliver(&ClipWebhookPayload::from(job)).await
    }
}

/// Sign webhook body with HMAC-SHA256, hex encoded
pub fn sign_payload(body: &str, secret: &str) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid signing secret")?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received signature (the hex part after `v1=`)
pub fn verify_signature(body: &str, secret: &str, signature: &str) -> Result<bool> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid signing secret")?;
    mac.update(body.as_bytes());
    let Ok(expected) = hex::decode(signature) else {
        return Ok(false);
    };
    Ok(mac.verify_slice(&expected).is_ok())
}
