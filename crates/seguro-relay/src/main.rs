use seguro_relay::config::ServerConfig;
use seguro_relay::RelayServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = if let Ok(path) = std::env::var("SEGURO_CONFIG_PATH") {
        ServerConfig::from_toml(path)?
    } else {
        ServerConfig::from_env()?
    };

    let server = RelayServer::new(config).await?;
    server.start().await?;

    Ok(())
}
