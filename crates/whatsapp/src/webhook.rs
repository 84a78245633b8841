//! Outbound event webhook.
//!
//! Delivery is best effort: one POST per event, no retries. Failures are
//! logged and never reach the caller, so a webhook outage cannot disturb
//! session handling.

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    chrono::{SecondsFormat, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    thiserror::Error,
    tracing::{debug, info, warn},
};

use warelay_config::WebhookConfig;

/// Event payload posted to the webhook as `{"event_type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum WebhookEvent {
    QrGenerated {
        account_id: String,
        /// PNG data URL.
        qr_code: String,
    },
    Connected {
        account_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },
    MessageReceived {
        account_id: String,
        from: String,
        message: String,
        /// Receive time, RFC 3339 UTC with milliseconds.
        timestamp: String,
    },
}

impl WebhookEvent {
    /// A `message_received` event stamped with the current time.
    pub fn message_received(account_id: &str, from: String, message: String) -> Self {
        Self::MessageReceived {
            account_id: account_id.to_string(),
            from,
            message,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::QrGenerated { .. } => "qr_generated",
            Self::Connected { .. } => "connected",
            Self::MessageReceived { .. } => "message_received",
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            Self::QrGenerated { account_id, .. }
            | Self::Connected { account_id, .. }
            | Self::MessageReceived { account_id, .. } => account_id,
        }
    }
}

/// Receives lifecycle events. Implementations must not fail the caller.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn notify(&self, event: WebhookEvent);
}

/// Why a webhook delivery failed. Only ever logged.
#[derive(Debug, Error)]
pub enum WebhookDeliveryError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook responded with {status}")]
    Status { status: reqwest::StatusCode },
}

/// Posts events to the configured webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
    auth_token: Option<Secret<String>>,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build webhook HTTP client")?;

        match config.url {
            Some(ref url) => info!(url, "webhook notifications enabled"),
            None => warn!("no webhook URL configured, events will be dropped"),
        }

        Ok(Self {
            client,
            url: config.url.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// POST one event to `url`.
    pub async fn deliver(
        &self,
        url: &str,
        event: &WebhookEvent,
    ) -> Result<(), WebhookDeliveryError> {
        let mut request = self.client.post(url).json(event);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookDeliveryError::Status { status });
        }
        Ok(())
    }
}

#[async_trait]
impl EventNotifier for WebhookNotifier {
    async fn notify(&self, event: WebhookEvent) {
        let Some(ref url) = self.url else {
            debug!(
                event_type = event.event_type(),
                account_id = event.account_id(),
                "webhook disabled, dropping event"
            );
            return;
        };

        match self.deliver(url, &event).await {
            Ok(()) => info!(
                event_type = event.event_type(),
                account_id = event.account_id(),
                "webhook notified"
            ),
            Err(e) => warn!(
                event_type = event.event_type(),
                account_id = event.account_id(),
                error = %e,
                "webhook delivery failed"
            ),
        }
    }
}
