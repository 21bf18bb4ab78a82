use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use support_access::{
    assemble, build_router,
    config::SupportAccessConfig,
    services::{HostServices, MemoryHost},
};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Fail fast on an invalid configuration
    let config = SupportAccessConfig::load()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        namespace = %config.namespace(),
        "Starting support-access service"
    );

    // The in-process host starts with one administrator to act through
    let host = Arc::new(MemoryHost::new());
    let admin = host.add_identity("admin", "admin@localhost", &["administrator"])?;
    tracing::info!(actor = %admin, "Seeded administrator identity");

    let port = config.server.port;
    let state = assemble(config, HostServices::in_memory(host)).await?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
