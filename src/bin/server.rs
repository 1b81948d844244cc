use anyhow::Context;
use brook::{server, DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "brook-server", version, author)]
/// An in-memory RESP key/value server.
struct ServerCli {
    /// Address to bind to.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: std::net::IpAddr,
    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = ServerCli::parse();
    let addr = std::net::SocketAddr::new(cli.host, cli.port);

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind tcp listener")?;
    info!(%addr, "listening");

    // Serve until ctrl-c, then drain active connections.
    server::run(listener, signal::ctrl_c()).await;

    Ok(())
}
