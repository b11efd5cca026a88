use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use log::info;
use pure::{
    HttpBackend, LocalIndex, SearchBackend,
    protocol::{DEFAULT_HELLO_TIMEOUT, DEFAULT_IDLE_TIMEOUT, PeerServer},
};

#[derive(Debug, Parser)]
#[command(version, about = "Answer PURE peer queries", long_about = None)]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Base URL of an HTTP search service to proxy, e.g. http://127.0.0.1:8888
    #[arg(long)]
    backend: Option<String>,
    /// Timeout for backend requests in milliseconds
    #[arg(long, default_value_t = 10_000)]
    backend_timeout_ms: u64,
    /// Number of connection worker threads
    #[arg(long, default_value_t = 15)]
    workers: usize,
    /// Seconds a new connection may take to send its Hello
    #[arg(long, default_value_t = DEFAULT_HELLO_TIMEOUT.as_secs())]
    hello_timeout_secs: u64,
    /// Seconds of silence before an established connection is dropped, 0 for never
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    idle_timeout_secs: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let backend: Arc<dyn SearchBackend> = match &cli.backend {
        Some(url) => {
            info!("proxying queries to {url}");
            Arc::new(HttpBackend::new(
                url.as_str(),
                Duration::from_millis(cli.backend_timeout_ms),
            )?)
        }
        None => Arc::new(LocalIndex),
    };

    let server = PeerServer::bind(cli.address, backend, cli.workers.max(1))?.with_timeouts(
        Duration::from_secs(cli.hello_timeout_secs),
        Duration::from_secs(cli.idle_timeout_secs),
    );
    server.serve()?;
    Ok(())
}
