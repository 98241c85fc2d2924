//! Relay server binary

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use durable_fetch::server::{DEFAULT_HOMEPAGE, DEFAULT_PORT};
use durable_fetch::store::StoreBackend;
use durable_fetch::{
    Dispatcher, FsBackend, HttpUpstream, MemoryBackend, ProxyServer, ServerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "durable-fetch", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    bind: SocketAddr,

    /// Directory for persisted chunk logs; kept in memory when omitted
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds a resource lives after its last access
    #[arg(long, default_value_t = 6 * 60 * 60)]
    ttl_secs: u64,

    /// Seconds between eviction passes
    #[arg(long, default_value_t = 60)]
    eviction_interval_secs: u64,

    /// Redirect target for `/`
    #[arg(long, default_value = DEFAULT_HOMEPAGE)]
    homepage: String,

    /// Scheme for upstream URLs when `x-forwarded-proto` is absent
    #[arg(long, default_value = "https", value_parser = ["http", "https"])]
    upstream_scheme: String,
}

#[tokio::main]
async fn main() -> durable_fetch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::with_addr(args.bind)
        .homepage(args.homepage)
        .ttl(Duration::from_secs(args.ttl_secs))
        .upstream_scheme(args.upstream_scheme);
    config.dispatcher = config
        .dispatcher
        .eviction_interval(Duration::from_secs(args.eviction_interval_secs.max(1)));

    let backend: Arc<dyn StoreBackend> = match &args.data_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Persisting chunk logs on disk");
            Arc::new(FsBackend::new(dir))
        }
        None => {
            tracing::warn!("No --data-dir given, chunk logs will not survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        backend,
        Arc::new(HttpUpstream::new()),
        config.dispatcher.clone(),
    ));
    dispatcher.recover().await?;

    let server = ProxyServer::with_dispatcher(config, dispatcher);
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
}
