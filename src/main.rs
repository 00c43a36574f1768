use std::sync::Arc;

use tokio::sync::RwLock;

use vaultkeep::config::Config;
use vaultkeep::server;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.loglevel)),
        )
        .init();

    let config = Arc::new(RwLock::new(config));

    server::run_server(config).await
}
