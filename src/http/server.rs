//! HTTP server implementation.

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::router;
use super::state::AppState;
use crate::error::{ReelgateError, Result};

/// HTTP server for the admin API and the movie proxy.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared handler state
    state: AppState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        serve_on(listener, self.state, signal).await
    }
}

/// Serve on an already bound listener until `signal` resolves.
pub async fn serve_on<F>(listener: TcpListener, state: AppState, signal: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Starting HTTP server");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await
    .map_err(|e| {
        error!(error = %e, "HTTP server failed");
        ReelgateError::Http(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReelgateConfig;
    use crate::upstream::testing::ScriptedTransport;
    use crate::upstream::Payload;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn state() -> AppState {
        let transport = Arc::new(ScriptedTransport::always(Ok(Payload::json(r#"{"id":550}"#))));
        AppState::with_transport(&ReelgateConfig::default(), transport, CancellationToken::new())
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let _server = HttpServer::new(addr, state());
    }

    #[tokio::test]
    async fn test_serves_over_tcp_and_shuts_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        let server = tokio::spawn(serve_on(listener, state(), async move {
            signal.cancelled().await
        }));

        let client = reqwest::Client::new();
        let health = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), 200);

        let movie = client
            .get(format!("http://{}/api/movies/movie/550", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(movie.status(), 200);
        assert_eq!(movie.headers()["x-cache"], "MISS");
        assert_eq!(movie.text().await.unwrap(), r#"{"id":550}"#);

        shutdown.cancel();
        tokio_test::assert_ok!(server.await.unwrap());
    }
}
