use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

/// Certificate and key for the line protocol listener, reloadable in place.
#[derive(Clone)]
pub struct TlsConfig {
    inner: Arc<RwLock<Arc<ServerConfig>>>,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let cert_path = cert_path.as_ref().to_path_buf();
        let key_path = key_path.as_ref().to_path_buf();

        let config = Self::load_config(&cert_path, &key_path)?;
        let inner = Arc::new(RwLock::new(Arc::new(config)));

        Ok(Self {
            inner,
            cert_path,
            key_path,
        })
    }

    fn load_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<ServerConfig> {
        let cert_file = File::open(cert_path)
            .map_err(|e| anyhow::anyhow!("Failed to open certificate file: {}", e))?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs = certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to parse certificate: {}", e))?;

        if certs.is_empty() {
            anyhow::bail!("No certificates found in certificate file");
        }

        // PKCS#8, PKCS#1 and SEC1 keys are all accepted.
        let key_file = File::open(key_path)
            .map_err(|e| anyhow::anyhow!("Failed to open key file: {}", e))?;
        let mut key_reader = BufReader::new(key_file);
        let key = private_key(&mut key_reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?
            .ok_or_else(|| anyhow::anyhow!("No private keys found in key file"))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow::anyhow!("Failed to select TLS versions: {}", e))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("Failed to build TLS config: {}", e))?;

        Ok(config)
    }

    pub async fn reload(&self) -> anyhow::Result<()> {
        info!("Reloading TLS certificate and key");
        match Self::load_config(&self.cert_path, &self.key_path) {
            Ok(config) => {
                *self.inner.write().await = Arc::new(config);
                info!("TLS certificate reloaded successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to reload TLS certificate: {}", e);
                Err(e)
            }
        }
    }

    pub async fn get(&self) -> Arc<ServerConfig> {
        self.inner.read().await.clone()
    }

    /// Acceptor over the current certificate. New connections pick up a
    /// reload, established ones keep their session.
    pub async fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.get().await)
    }
}

pub async fn setup_tls_reload_handler(tls_config: TlsConfig) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to register SIGHUP handler: {}", e);
                return;
            }
        };

        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                if let Err(e) = tls_config.reload().await {
                    error!("Failed to reload TLS certificate on SIGHUP: {}", e);
                }
            }
        });
    }
    #[cfg(not(unix))]
    drop(tls_config);
}
