//! TCP adapter: accepts connections and owns the session set.

use super::session::run_session;
use crate::broker::Broker;
use crate::metrics::BrokerMetrics;
use crate::{GridMqError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Wire-protocol adapter: one listener, one session task per connection.
pub struct StompServer {
    broker: Arc<Broker>,
    listener: TcpListener,
    metrics: Arc<BrokerMetrics>,
    // Graceful shutdown coordination
    shutdown_tx: broadcast::Sender<()>,
    cancel: CancellationToken,
    active_sessions: Arc<AtomicUsize>,
}

impl StompServer {
    /// Bind the adapter using the broker's configuration. Binding eagerly
    /// lets callers read [`StompServer::local_addr`] before `run`.
    pub async fn new(broker: Arc<Broker>) -> Result<Self> {
        let config = broker.config();
        config.validate().map_err(GridMqError::Config)?;

        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let (shutdown_tx, _) = broadcast::channel(16);

        info!("wire adapter listening on {}", listener.local_addr()?);

        Ok(Self {
            broker,
            listener,
            metrics: Arc::new(BrokerMetrics::new()),
            shutdown_tx,
            cancel: CancellationToken::new(),
            active_sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Initiate graceful shutdown: stop accepting and cancel live sessions
    /// (each runs its normal disconnect teardown).
    pub fn shutdown(&self) {
        info!("initiating adapter shutdown");
        let _ = self.shutdown_tx.send(());
        self.cancel.cancel();
    }

    /// Accept loop. Returns after [`StompServer::shutdown`].
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let max_connections = self.broker.config().max_connections;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        if self.active_sessions.load(Ordering::SeqCst) >= max_connections {
                            warn!(
                                "connection limit reached, dropping connection from {}",
                                peer_addr
                            );
                            continue;
                        }
                        if let Err(err) = stream.set_nodelay(true) {
                            warn!("failed to set nodelay on {}: {}", peer_addr, err);
                        }

                        self.active_sessions.fetch_add(1, Ordering::SeqCst);
                        self.metrics.connection_opened();
                        info!(
                            "client connected: {} (active: {})",
                            peer_addr,
                            self.active_sessions.load(Ordering::SeqCst)
                        );

                        let broker = Arc::clone(&self.broker);
                        let metrics = Arc::clone(&self.metrics);
                        let active_sessions = Arc::clone(&self.active_sessions);
                        let cancel = self.cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(err) =
                                run_session(stream, broker, Arc::clone(&metrics), cancel).await
                            {
                                error!("error handling client {}: {}", peer_addr, err);
                            } else {
                                info!("client {} disconnected", peer_addr);
                            }
                            metrics.connection_closed();
                            active_sessions.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(err) => {
                        error!("failed to accept connection: {}", err);
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("received shutdown signal, stopping adapter");
                    break;
                }
            }
        }

        info!("adapter shutdown complete");
        Ok(())
    }
}
