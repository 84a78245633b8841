//! Configuration schema and validation.

use std::{path::PathBuf, time::Duration};

use {
    anyhow::{Result, bail},
    secrecy::Secret,
    serde::Deserialize,
    url::Url,
};

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub sidecar: SidecarConfig,
    pub reconnect: ReconnectConfig,
}

impl RelayConfig {
    /// Check the settings that would otherwise only fail at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }

        if let Some(ref raw) = self.webhook.url {
            let url = Url::parse(raw)
                .map_err(|e| anyhow::anyhow!("webhook.url is not a valid URL ({raw}): {e}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("webhook.url must use http or https, got {}", url.scheme());
            }
        }

        let sidecar = Url::parse(&self.sidecar.url).map_err(|e| {
            anyhow::anyhow!("sidecar.url is not a valid URL ({}): {e}", self.sidecar.url)
        })?;
        if !matches!(sidecar.scheme(), "ws" | "wss") {
            bail!("sidecar.url must use ws or wss, got {}", sidecar.scheme());
        }

        if self.webhook.timeout_secs == 0 {
            bail!("webhook.timeout_secs must be non-zero");
        }
        if self.sidecar.send_timeout_secs == 0 {
            bail!("sidecar.send_timeout_secs must be non-zero");
        }

        if self.reconnect.max_attempts == Some(0) {
            bail!("reconnect.max_attempts must be at least 1 when set");
        }

        Ok(())
    }
}

/// HTTP control surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,
    /// Listen port.
    pub port: u16,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Outbound event webhook.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Destination for event notifications. Events are dropped when unset.
    pub url: Option<String>,

    /// Bearer token sent with every notification.
    pub auth_token: Option<Secret<String>>,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_token: None,
            timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Protocol sidecar connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// WebSocket URL of the sidecar.
    pub url: String,

    /// Root under which each account gets an `auth_<account_id>` directory.
    pub auth_dir: PathBuf,

    /// How long to wait for the sidecar to confirm an outbound message.
    pub send_timeout_secs: u64,
}

impl SidecarConfig {
    /// Credential directory for one account.
    pub fn account_auth_dir(&self, account_id: &str) -> PathBuf {
        self.auth_dir.join(format!("auth_{account_id}"))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9876".into(),
            auth_dir: PathBuf::from("."),
            send_timeout_secs: 30,
        }
    }
}

/// Reconnect policy after a recoverable disconnect.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed delay before re-opening a session.
    pub delay_ms: u64,

    /// Consecutive attempts allowed without reaching `open` (unset = unbounded).
    pub max_attempts: Option<u32>,
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 3000,
            max_attempts: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn defaults() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.server.addr(), "0.0.0.0:3000");
        assert!(cfg.webhook.url.is_none());
        assert_eq!(cfg.reconnect.delay(), Duration::from_secs(3));
        assert!(cfg.reconnect.max_attempts.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn account_auth_dir_is_per_account() {
        let cfg = SidecarConfig {
            auth_dir: PathBuf::from("/var/lib/warelay"),
            ..Default::default()
        };
        assert_eq!(
            cfg.account_auth_dir("acc1"),
            PathBuf::from("/var/lib/warelay/auth_acc1")
        );
    }

    #[test]
    fn rejects_zero_port() {
        let mut cfg = RelayConfig::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_http_webhook() {
        let mut cfg = RelayConfig::default();
        cfg.webhook.url = Some("ftp://example.com/hook".into());
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("http or https"), "{err}");

        cfg.webhook.url = Some("not a url".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_ws_sidecar() {
        let mut cfg = RelayConfig::default();
        cfg.sidecar.url = "http://127.0.0.1:9876".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let mut cfg = RelayConfig::default();
        cfg.reconnect.max_attempts = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut cfg = RelayConfig::default();
        cfg.webhook.timeout_secs = 0;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("webhook.timeout_secs"), "{err}");

        let mut cfg = RelayConfig::default();
        cfg.sidecar.send_timeout_secs = 0;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("sidecar.send_timeout_secs"), "{err}");
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = WebhookConfig {
            auth_token: Some(Secret::new("hunter2".into())),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
        assert_eq!(cfg.auth_token.unwrap().expose_secret(), "hunter2");
    }
}
