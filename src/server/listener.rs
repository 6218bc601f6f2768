//! TCP gateway listener
//!
//! Accepts TCP connections, reads a [`Hello`](crate::protocol::Hello) line
//! and hands the connection to a [`Gateway`]. The broker's session ceiling is
//! the connection limit.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::config::GatewayConfig;
use super::gateway::Gateway;
use super::transport::{user_id_from_metadata, JsonLinesSink, JsonLinesSource};
use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::matching::Engine;
use crate::stats::{MetricsRecorder, NoopRecorder};

/// Ride stream gateway server
pub struct GatewayServer {
    config: GatewayConfig,
    broker: Arc<Broker>,
    engine: Arc<Engine>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl GatewayServer {
    /// Create a server with the given configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NoopRecorder))
    }

    /// Create a server that reports through `metrics`
    pub fn with_metrics(config: GatewayConfig, metrics: Arc<dyn MetricsRecorder>) -> Result<Self> {
        config.validate()?;

        let broker = Arc::new(Broker::from_config(&config.broker, Arc::clone(&metrics)));
        let engine = Arc::new(
            Engine::new(Arc::clone(&broker), config.engine.clone())
                .with_metrics(Arc::clone(&metrics)),
        );

        Ok(Self {
            config,
            broker,
            engine,
            metrics,
        })
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Bind the configured address and serve until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    ///
    /// On shutdown every session is cancelled and the worker pool and reaper
    /// are awaited before returning. The engine does not restart, so a
    /// server serves once.
    pub async fn serve_listener<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Gateway listening");

        let root = CancellationToken::new();
        let workers = self.engine.start(root.clone());
        let reaper = self.broker.spawn_reaper(
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
            root.clone(),
        );
        let gateway = Gateway::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.engine),
            root.clone(),
        )
        .with_metrics(Arc::clone(&self.metrics))
        .transport(self.config.transport_tag.clone())
        .mailbox_capacity(self.config.broker.mailbox_capacity);

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener, &gateway, &root) => result,
        };

        root.cancel();
        workers.join().await;
        if let Err(e) = reaper.await {
            tracing::error!(error = %e, "Reaper task failed");
        }
        tracing::info!(sessions = self.broker.session_count(), "Gateway stopped");

        result
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        gateway: &Gateway,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr, gateway.clone(), shutdown.clone());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        gateway: Gateway,
        shutdown: CancellationToken,
    ) {
        tracing::debug!(peer = %peer_addr, "New connection");

        if let Err(e) = socket.set_nodelay(true) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let hello_timeout = self.config.heartbeat_timeout;

        tokio::spawn(async move {
            let (reader, writer) = socket.into_split();
            let mut source = JsonLinesSource::new(reader);
            let sink = JsonLinesSink::new(writer);

            let handshake = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(peer = %peer_addr, "Shutdown during handshake");
                    return;
                }
                handshake = tokio::time::timeout(hello_timeout, source.hello()) => handshake,
            };
            let hello = match handshake {
                Ok(Ok(hello)) => hello,
                Ok(Err(e)) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "Handshake failed");
                    return;
                }
                Err(_) => {
                    tracing::debug!(peer = %peer_addr, "Handshake timed out");
                    return;
                }
            };
            let user_id = user_id_from_metadata(hello.user_id.as_deref());

            match gateway.serve(&user_id, source, sink).await {
                Ok(()) | Err(Error::Broker(_)) => {}
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
                }
            }

            tracing::debug!(peer = %peer_addr, user_id = %user_id, "Connection closed");
        });
    }
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("config", &self.config)
            .field("broker", &self.broker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;

    #[test]
    fn test_new_validates_config() {
        let config = GatewayConfig::default().broker(BrokerConfig::default().shard_count(0));

        assert!(matches!(GatewayServer::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_new_sizes_broker() {
        let config = GatewayConfig::default()
            .broker(BrokerConfig::default().shard_count(8).max_sessions(100));
        let server = GatewayServer::new(config).unwrap();

        assert_eq!(server.broker().shard_count(), 8);
        assert_eq!(server.broker().max_sessions(), 100);
        assert_eq!(server.bind_addr().port(), 7443);
    }

    #[tokio::test]
    async fn test_serve_listener_stops_on_shutdown() {
        let config = GatewayConfig::default()
            .engine(crate::matching::EngineConfig::default().workers(2));
        let server = GatewayServer::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            server.serve_listener(listener, async {}),
        )
        .await
        .unwrap();

        assert!(result.is_ok());
    }
}
