//! Server lifecycle: bind, spawn, graceful shutdown.
//!
//! Pattern: bind a listener, spawn the serve loop in a background task,
//! return a handle carrying a shutdown channel.

use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::api_router;
use crate::api::types::ApiContext;

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ApiServer {
    /// Bind `addr` and start serving in a background task.
    pub async fn start(ctx: ApiContext, addr: &str) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = api_router(ctx);
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "API server exited with error");
            }
        });

        tracing::info!(%addr, "API server listening");
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    /// Signal shutdown and wait for in-flight requests to drain.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
        tracing::info!("API server stopped");
    }

    /// Run until the process receives ctrl-c, then drain.
    pub async fn wait_for_ctrl_c(self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("ctrl-c received, shutting down");
        self.shutdown().await;
        Ok(())
    }
}
