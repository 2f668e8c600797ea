use anyhow::Context;
use container_recon::api;
use container_recon::config::ReconConfig;
use container_recon::facade::ReconFacade;
use container_recon::scm::HttpContainerSource;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut bind_addr: Option<SocketAddr> = None;
    let mut scm_address: Option<String> = None;
    let mut db_dir: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" | "--bind" | "--scm" | "--db-dir" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Missing value for {}", flag);
                    usage(&args[0]);
                };
                match flag {
                    "--config" => config_path = Some(PathBuf::from(value)),
                    "--bind" => bind_addr = Some(value.parse().context("--bind")?),
                    "--scm" => scm_address = Some(value.clone()),
                    _ => db_dir = Some(PathBuf::from(value)),
                }
                i += 2;
            }
            "--help" | "-h" => usage(&args[0]),
            _ => {
                i += 1;
            }
        }
    }

    let mut config = match &config_path {
        Some(path) => ReconConfig::load(path)?,
        None => ReconConfig::default(),
    };
    if let Some(addr) = bind_addr {
        config.http_bind = addr;
    }
    if let Some(addr) = scm_address {
        config.scm_address = addr;
    }
    if let Some(dir) = db_dir {
        config.db_dir = dir;
    }

    tracing::info!("Starting container recon (db dir {})", config.db_dir.display());
    tracing::info!("Authoritative SCM at {}", config.scm_address);

    let http_bind = config.http_bind;
    let source = Arc::new(HttpContainerSource::new(&config.scm_address));
    let facade = ReconFacade::build(config, source)?;
    facade.start().await;

    let app = api::router(facade.clone());

    tracing::info!("HTTP server listening on {}", http_bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    facade.stop().await;
    Ok(())
}

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} [--config <file.toml>] [--bind <addr:port>] [--scm <addr:port>] [--db-dir <path>]",
        program
    );
    eprintln!("Example: {} --scm 127.0.0.1:9860 --bind 127.0.0.1:9888", program);
    std::process::exit(1);
}
