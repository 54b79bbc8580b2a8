use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;

use sequent::writer::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_BYTES_PER_SEGMENT, DEFAULT_MAX_QUEUE_DEPTH,
};
use sequent::{server, Log, LogConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the segment files (created if missing)
    #[arg(long, default_value = "./data-dir")]
    data_dir: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:4001")]
    listen: SocketAddr,

    /// Maximum accepted message body size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_SIZE)]
    max_body_size: usize,

    /// Bound on submissions queued ahead of the writer
    #[arg(long, default_value_t = DEFAULT_MAX_QUEUE_DEPTH)]
    max_queue_depth: usize,

    /// Bound on unfsynced acks per batch (defaults to the queue depth)
    #[arg(long)]
    max_pending_acks: Option<usize>,

    /// Maximum milliseconds between fsyncs while acks are pending
    #[arg(long, default_value_t = 2)]
    coalesce_interval_ms: u64,

    /// Soft segment size in bytes before rollover
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES_PER_SEGMENT)]
    max_segment_bytes: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("cannot create data dir {}", args.data_dir.display()))?;

    let mut config = LogConfig::new(&args.data_dir);
    config.max_body_size = args.max_body_size;
    config.max_queue_depth = args.max_queue_depth;
    config.max_pending_acks = args.max_pending_acks.unwrap_or(args.max_queue_depth);
    config.coalesce_interval = Duration::from_millis(args.coalesce_interval_ms);
    config.max_bytes_per_segment = args.max_segment_bytes;

    info!("data dir: {}", args.data_dir.display());
    let log = Log::open(config).await.context("failed to open log")?;

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("cannot bind {}", args.listen))?;
    info!("listening on {}", listener.local_addr()?);

    server::serve(listener, log.writer(), shutdown_signal())
        .await
        .context("server error")?;

    log.shutdown().await.context("failed to close log")?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!("cannot listen for shutdown signal: {err}");
            std::future::pending::<()>().await
        }
    }
}
