//! Arrêt ordonné du service.

use crate::broker::BrokerConnection;
use crate::store::StoreConnection;
use tracing::{info, warn};

/// Résout au premier SIGINT (ou SIGTERM sous unix)
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

/// Libère la base puis le broker ; sûr à appeler plusieurs fois
pub async fn release(store: &StoreConnection, broker: &BrokerConnection) {
    store.close().await;
    broker.shutdown().await;
    info!("connections released");
}
