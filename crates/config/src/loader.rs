//! Config file discovery, parsing and environment overrides.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    secrecy::Secret,
    tracing::{debug, info},
};

use crate::schema::RelayConfig;

/// File picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "warelay.toml";

/// Parse a TOML document into a config. Missing sections take their defaults.
pub fn parse_config(raw: &str) -> Result<RelayConfig> {
    toml::from_str(raw).context("invalid configuration file")
}

/// Load the config from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists.
///
/// An explicit path must exist. Without one, a missing default file yields the
/// built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let path: PathBuf = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
                return Ok(RelayConfig::default());
            }
            default
        },
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config =
        parse_config(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Recognised: `PORT`, `WEBHOOK_URL`, `WEBHOOK_TOKEN`, `SIDECAR_URL`, `AUTH_DIR`.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(port) = non_empty("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("PORT must be a port number, got {port:?}"))?;
    }
    if let Some(url) = non_empty("WEBHOOK_URL") {
        config.webhook.url = Some(url);
    }
    if let Some(token) = non_empty("WEBHOOK_TOKEN") {
        config.webhook.auth_token = Some(Secret::new(token));
    }
    if let Some(url) = non_empty("SIDECAR_URL") {
        config.sidecar.url = url;
    }
    if let Some(dir) = non_empty("AUTH_DIR") {
        config.sidecar.auth_dir = PathBuf::from(dir);
    }

    Ok(())
}
