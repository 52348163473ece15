//! HTTP listener lifecycle shared by the endpoint and the local connector.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running listener.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound (resolves port 0).
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://` URL of the listener.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(error = %err, "server task ended abnormally");
        }
    }
}

/// Bind `addr` and serve `router` on a background task.
///
/// # Errors
/// Returns the bind error.
pub async fn spawn_server(router: Router, addr: SocketAddr) -> std::io::Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    spawn_on(listener, router)
}

/// Serve `router` on an already bound listener.
///
/// # Errors
/// Returns the error of reading the listener's local address.
pub fn spawn_on(listener: TcpListener, router: Router) -> std::io::Result<ServerHandle> {
    let local_addr = listener.local_addr()?;
    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async {
            let _ = rx.await;
        };
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %err, "server error");
        }
    });
    info!(%local_addr, "listening");
    Ok(ServerHandle {
        local_addr,
        shutdown: Some(tx),
        task,
    })
}

#[cfg(test)]
mod tests {
    use axum::routing::get;

    use super::*;

    #[tokio::test]
    async fn serves_and_shuts_down() {
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let handle = spawn_server(router, SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let body = reqwest::get(format!("{}/ping", handle.base_url()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");
        handle.shutdown().await;
    }
}
