use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use wsbridge::{cli, config::Config, error::Result, registry::Registry, session::BridgeSession};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match cli::parse_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %config.listen_addr(), upstream = %config.upstream_addr(), "wsbridge listening");

    let registry = Registry::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            accept_result = listener.accept() => {
                let (client_sock, peer) = match accept_result {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                };

                if registry.is_full().await {
                    info!(?peer, "no free session slot, rejecting connection");
                    drop(client_sock);
                    continue;
                }

                info!(?peer, "new client connected");
                let alive = Arc::new(AtomicBool::new(true));
                let session_alive = alive.clone();
                let upstream_host = config.upstream_host.clone();
                let upstream_port = config.upstream_port;

                let handle = tokio::spawn(async move {
                    let session =
                        BridgeSession::new(client_sock, upstream_host, upstream_port, session_alive);
                    session.run().await;
                });

                if registry.reserve(alive, handle).await.is_none() {
                    warn!(?peer, "session slot vanished after accept, connection will be dropped by its worker");
                }
            }
        }
    }

    registry.shutdown_all().await;
    Ok(())
}
