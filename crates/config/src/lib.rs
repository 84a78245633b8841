//! Configuration for the warelay relay.
//!
//! Settings come from, in increasing priority: built-in defaults, a TOML file
//! (`warelay.toml` in the working directory, or an explicit path), and
//! environment variables. The binary applies command-line overrides on top and
//! calls [`RelayConfig::validate`] before starting.

pub mod loader;
pub mod schema;

pub use {
    loader::{DEFAULT_CONFIG_FILE, apply_env_overrides, load_config, parse_config},
    schema::{ReconnectConfig, RelayConfig, ServerConfig, SidecarConfig, WebhookConfig},
};
