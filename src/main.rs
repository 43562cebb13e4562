use anyhow::Context;
use clap::Parser;
use crafts::{ApiRegistry, HttpServer, HttpTransport, QueryGateway, ServiceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CRAFTS: REST APIs over SPARQL triple stores
#[derive(Parser, Debug)]
#[command(name = "crafts", version, about)]
struct Args {
    /// Service configuration (YAML)
    #[arg(short, long, env = "CRAFTS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("CRAFTS v{}", crafts::version());

    let transport = Arc::new(HttpTransport::new(config.http_timeout())?);
    let gateway = QueryGateway::new(transport)?.with_compaction(config.compaction);
    let registry = Arc::new(ApiRegistry::new(Arc::new(gateway)));

    match &config.apis_dir {
        Some(dir) => {
            let loaded = registry
                .load_dir(dir)
                .with_context(|| format!("loading API configurations from {}", dir.display()))?;
            info!("Loaded {} API configuration(s) from {}", loaded, dir.display());
        }
        None => warn!("No apis_dir configured, serving without APIs"),
    }

    let _sweeper = registry.spawn_sweeper(config.sweep_interval(), config.retention());

    HttpServer::new(registry, config.bind_addr()).start().await?;
    Ok(())
}
