use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tunnelvision::config::Config;
use tunnelvision::viewer::{ViewerServer, READY_BANNER};

/// Display surface that receives frames from tunnelvision sessions.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Host to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, the first free dynamic port if unset
    #[arg(long)]
    port: Option<u16>,

    /// Directory receiving `<hash>.png` per plot, the cache directory if unset
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=debug`).
    let args = Args::parse();

    let mut config = Config::default().with_env_overrides()?;
    if let Some(host) = args.host {
        config.hostname = host;
    }
    if args.port.is_some() {
        config.port = args.port;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }

    let port = config.resolve_port()?;
    let output_dir = args
        .output_dir
        .or_else(|| config.resolved_cache_dir().map(|dir| dir.join("frames")));

    let server = ViewerServer::bind((config.hostname.as_str(), port), output_dir.clone())
        .await
        .with_context(|| format!("Failed to listen on {}:{}", config.hostname, port))?;
    let addr = server.local_addr()?;
    if let Some(dir) = &output_dir {
        log::info!("Writing frames to {}", dir.display());
    }

    // clients wait for this line before connecting
    println!("{} {}", READY_BANNER, addr);

    tokio::select! {
        served = server.serve() => served.context("Viewer stopped")?,
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted, shutting down"),
    }
    Ok(())
}
