//! Out-of-band alert delivery
//!
//! Security alerts and verification codes leave the service through a
//! single send(recipient, subject, body) seam. Delivery goes to a
//! configurable alert-gateway webhook as a JSON POST; without a configured
//! gateway the message is written to the log instead. Delivery failures
//! never fail the enclosing operation.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
#[error("alert delivery failed: {0}")]
pub struct DeliveryError(String);

pub enum Notifier {
    Webhook(WebhookNotifier),
    /// No gateway configured; messages go to the log
    Log,
    #[cfg(test)]
    Recording(RecordingNotifier),
}

impl Notifier {
    pub fn from_config(config: &Config) -> Self {
        match &config.alert_webhook_url {
            Some(url) => {
                tracing::info!("Alert delivery via webhook gateway: {}", url);
                Notifier::Webhook(WebhookNotifier::new(url.clone()))
            }
            None => {
                tracing::warn!("ALERT_WEBHOOK_URL not set; alerts will only be logged");
                Notifier::Log
            }
        }
    }

    pub async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DeliveryError> {
        match self {
            Notifier::Webhook(webhook) => webhook.send(recipient, subject, body).await,
            Notifier::Log => {
                tracing::warn!("[ALERT] to={} subject={} body={:?}", recipient, subject, body);
                Ok(())
            }
            #[cfg(test)]
            Notifier::Recording(recording) => recording.send(recipient, subject, body),
        }
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let payload = serde_json::json!({
            "recipient": recipient,
            "subject": subject,
            "body": body,
            "sent_at": Utc::now().to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError(e.to_string()))?;

        response
            .error_for_status()
            .map_err(|e| DeliveryError(e.to_string()))?;

        tracing::info!("Alert sent to {}: {}", recipient, subject);
        Ok(())
    }
}

/// Sign-in from a device other than the last one on file. Comparison only;
/// the stored device is not updated.
pub async fn send_device_mismatch_alert(notifier: &Notifier, email: &str, presented_device: &str) {
    let subject = "TouchAlytics Security Alert - New Device Sign-In";
    let body = format!(
        "Hello,\n\n\
         A sign-in to your TouchAlytics account just happened from an \
         unrecognized device ({presented_device}).\n\n\
         If this wasn't you, we recommend changing your password.\n\
         — TouchAlytics Security"
    );

    if let Err(e) = notifier.send(email, subject, &body).await {
        tracing::error!("Failed to send device mismatch alert to {}: {}", email, e);
    }
}

#[cfg(test)]
pub struct RecordingNotifier {
    pub sent: parking_lot::Mutex<Vec<(String, String, String)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(DeliveryError("recording notifier set to fail".to_string()));
        }
        self.sent
            .lock()
            .push((recipient.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

#[cfg(test)]
impl Notifier {
    pub fn recording() -> Self {
        Notifier::Recording(RecordingNotifier::new())
    }

    pub fn sent_messages(&self) -> Vec<(String, String, String)> {
        match self {
            Notifier::Recording(recording) => recording.sent.lock().clone(),
            _ => Vec::new(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        if let Notifier::Recording(recording) = self {
            recording.fail.store(failing, std::sync::atomic::Ordering::Relaxed);
        }
    }
}
