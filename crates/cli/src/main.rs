use std::path::PathBuf;

use {
    anyhow::Result,
    clap::Parser,
    tracing::{debug, info},
    tracing_subscriber::EnvFilter,
};

use warelay_config::{RelayConfig, apply_env_overrides, load_config};

#[derive(Parser)]
#[command(name = "warelay", about = "WhatsApp session relay", version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./warelay.toml when present)
    #[arg(short, long, env = "WARELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the HTTP API to
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Webhook URL that receives relay events
    #[arg(long)]
    webhook_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.webhook_url {
            config.webhook.url = Some(url.clone());
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    debug!(?config, "configuration loaded");

    info!(version = env!("CARGO_PKG_VERSION"), "starting warelay");
    warelay_gateway::run(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from([
            "warelay",
            "--port",
            "8080",
            "--webhook-url",
            "http://localhost:9000/hook",
        ]);
        let mut config = RelayConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(
            config.webhook.url.as_deref(),
            Some("http://localhost:9000/hook")
        );
    }
}
