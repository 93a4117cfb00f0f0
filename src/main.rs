use clap::Parser;
use redis_replication::{Config, Server};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let config = Config::parse();
    let server = Server::bind(config).await?;
    server.run().await
}
