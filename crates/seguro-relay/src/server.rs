use axum::Router;
use std::{future::IntoFuture, net::SocketAddr};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use crate::api::{router, AppState};
use crate::config::ServerConfig;
use crate::relay::Relay;
use crate::tls::{setup_tls_reload_handler, TlsConfig};

pub struct RelayServer {
    config: ServerConfig,
    relay: Relay,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let relay = Relay::new(&config).await?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            relay,
            shutdown_tx,
        })
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn router(&self) -> Router {
        router(AppState {
            relay: self.relay.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        })
    }

    /// Binds `bind_addr` and serves until a signal or [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves HTTP and the push channel on `listener`, plus the TLS line
    /// protocol when it is configured.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let local = listener.local_addr()?;

        if let (Some(line_addr), Some(cert_path), Some(key_path)) = (
            self.config.line_bind_addr,
            &self.config.tls_cert_path,
            &self.config.tls_key_path,
        ) {
            let tls = TlsConfig::new(cert_path, key_path)?;
            setup_tls_reload_handler(tls.clone()).await;

            let line_listener = TcpListener::bind(line_addr).await?;
            info!("seguro-relay line protocol listening on {} (TLS)", line_addr);
            tokio::spawn(crate::line::serve(
                line_listener,
                tls,
                self.relay.clone(),
                self.shutdown_tx.subscribe(),
            ));
        } else if self.config.tls_enabled() {
            warn!("TLS configured without line_bind_addr; HTTP stays plaintext, terminate TLS in a reverse proxy");
        }

        info!("seguro-relay listening on {} (HTTP)", local);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let serve = axum::serve(listener, self.router().into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(Self::shutdown_signal(shutdown_rx, self.shutdown_tx.clone()))
            .into_future();

        // In-flight connections get `shutdown_timeout` once the flag is set.
        let grace = self.config.shutdown_timeout();
        let mut flag = self.shutdown_tx.subscribe();
        let deadline = async {
            shutdown_requested(&mut flag).await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = serve => result?,
            _ = deadline => {
                warn!(timeout_secs = grace.as_secs(), "graceful shutdown timed out, dropping open connections");
            }
        }

        Ok(())
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>, notify: watch::Sender<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = shutdown_requested(&mut shutdown) => {
                info!("Shutdown requested");
            }
        }

        // Long-lived push channels and line connections watch the same flag.
        let _ = notify.send(true);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Handle that can stop the server from another task.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }
}

/// Resolves once the flag is set. Never resolves if the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
