use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API and WebSocket push channel.
    pub bind_addr: SocketAddr,
    /// TLS line protocol. Only started when TLS is configured too.
    pub line_bind_addr: Option<SocketAddr>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,

    // Delivery settings
    pub max_blob_size: usize,
    pub max_history_per_client: usize,
    pub max_pending_per_client: usize,
    pub history_limit_default: usize,
    pub history_limit_max: usize,

    // Key registry mirror, rewritten after every publish
    pub key_mirror_path: Option<PathBuf>,

    // Graceful shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8000)),
            line_bind_addr: None,
            tls_cert_path: None,
            tls_key_path: None,
            max_blob_size: 256 * 1024, // 256KB of base64
            max_history_per_client: 10_000,
            max_pending_per_client: 1_000,
            history_limit_default: 100,
            history_limit_max: 1_000,
            key_mirror_path: None,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SEGURO_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        if let Ok(addr) = std::env::var("SEGURO_LINE_BIND_ADDR") {
            config.line_bind_addr = Some(addr.parse()?);
        }

        if let Ok(path) = std::env::var("SEGURO_TLS_CERT_PATH") {
            config.tls_cert_path = Some(path.into());
        }

        if let Ok(path) = std::env::var("SEGURO_TLS_KEY_PATH") {
            config.tls_key_path = Some(path.into());
        }

        if let Ok(size) = std::env::var("SEGURO_MAX_BLOB_SIZE") {
            config.max_blob_size = size.parse()?;
        }

        if let Ok(len) = std::env::var("SEGURO_MAX_HISTORY_PER_CLIENT") {
            config.max_history_per_client = len.parse()?;
        }

        if let Ok(len) = std::env::var("SEGURO_MAX_PENDING_PER_CLIENT") {
            config.max_pending_per_client = len.parse()?;
        }

        if let Ok(limit) = std::env::var("SEGURO_HISTORY_LIMIT_MAX") {
            config.history_limit_max = limit.parse()?;
        }

        if let Ok(path) = std::env::var("SEGURO_KEY_MIRROR_PATH") {
            config.key_mirror_path = Some(path.into());
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_blob_size == 0 {
            anyhow::bail!("max_blob_size must be > 0");
        }

        if self.max_history_per_client == 0 {
            anyhow::bail!("max_history_per_client must be > 0");
        }

        if self.max_pending_per_client == 0 {
            anyhow::bail!("max_pending_per_client must be > 0");
        }

        if self.history_limit_max == 0 {
            anyhow::bail!("history_limit_max must be > 0");
        }

        if self.history_limit_default == 0 || self.history_limit_default > self.history_limit_max {
            anyhow::bail!("history_limit_default must be within 1..=history_limit_max");
        }

        if let (Some(_), None) | (None, Some(_)) = (&self.tls_cert_path, &self.tls_key_path) {
            anyhow::bail!("both tls_cert_path and tls_key_path must be set or both unset");
        }

        if self.line_bind_addr.is_some() && self.tls_cert_path.is_none() {
            anyhow::bail!("line_bind_addr requires tls_cert_path and tls_key_path");
        }

        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
