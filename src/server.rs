//! HTTP server lifecycle.

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, RelayApi};
use crate::error::ServerError;

/// Hosts the relay router on one listener.
///
/// `start()` binds and spawns the server task; `shutdown()` cancels in-flight
/// orchestrations, stops accepting connections and waits for the task.
pub struct RelayServer {
    addr: SocketAddr,
    app: Option<Router>,
    cancel: CancellationToken,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RelayServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        let cancel = state.shutdown.clone();
        Self {
            addr,
            app: Some(RelayApi::router(state)),
            cancel,
            local_addr: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Address actually bound, once started. Differs from the configured
    /// one when binding to port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and spawn the server.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        let Some(app) = self.app.take() else {
            return Err(ServerError::StartupFailed {
                addr: self.addr.to_string(),
                reason: "server already started".to_string(),
            });
        };

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::StartupFailed {
                addr: self.addr.to_string(),
                reason: format!("Failed to bind: {}", e),
            })?;
        let local_addr = listener.local_addr().unwrap_or(self.addr);
        self.local_addr = Some(local_addr);

        tracing::info!("Relay listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Relay shutting down");
                })
                .await
            {
                tracing::error!("Relay server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Cancel in-flight orchestrations and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
