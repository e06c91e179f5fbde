//! Vanilla Minimaps host server.

use tracing::info;
use tracing_subscriber::EnvFilter;

use minimap::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,minimap=debug")),
        )
        .init();

    info!("Vanilla Minimaps v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Renderer: {}", config.minimap.default_renderer);
    info!("  Overlay mode: {:?}", config.minimap.mode);

    minimap::run(config).await?;

    Ok(())
}
