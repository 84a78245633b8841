use std::{future::Future, sync::Arc};

use {
    anyhow::{Context, Result},
    axum::Router,
    tokio::net::TcpListener,
    tower_http::cors::CorsLayer,
    tracing::info,
};

use {
    warelay_config::RelayConfig,
    warelay_whatsapp::{ConnectionManager, SessionRegistry, SidecarConnector, WebhookNotifier},
};

use crate::routes::control_router;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: ConnectionManager,
}

impl AppState {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

/// Build the HTTP router with permissive CORS.
pub fn build_router(state: AppState) -> Router {
    control_router()
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the control API on `listener` until `shutdown` resolves, then close
/// every session.
pub async fn serve<F>(listener: TcpListener, manager: ConnectionManager, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(AppState::new(manager.clone()));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;

    manager.shutdown().await;
    Ok(())
}

/// Wire the sidecar connector, webhook notifier and registry from `config`
/// and run the relay until interrupted.
pub async fn run(config: &RelayConfig) -> Result<()> {
    let connector = Arc::new(SidecarConnector::new(config.sidecar.clone()));
    let notifier = Arc::new(WebhookNotifier::new(&config.webhook)?);
    let manager = ConnectionManager::new(
        connector,
        SessionRegistry::new(),
        notifier,
        config.reconnect.clone(),
    );

    let addr = config.server.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, sidecar = %config.sidecar.url, "relay listening");

    serve(listener, manager, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
