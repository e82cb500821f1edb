use anyhow::Context;
use clap::Parser;
use shunt_proxy::{Config, ProxyEngine, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "shunt")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "SHUNT_CONFIG")]
    config: Option<PathBuf>,

    /// Proxy listen port (overrides listen.port)
    #[arg(short, long, env = "SHUNT_PORT")]
    port: Option<u16>,

    /// Mock-serving component port (overrides mock_server.port)
    #[arg(short, long, env = "SHUNT_MOCK_PORT")]
    mock_port: Option<u16>,

    /// Print the MITM root CA certificate and exit
    #[arg(long)]
    print_ca: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(port) = args.mock_port {
        config.mock_server.port = port;
    }

    let engine = ProxyEngine::new(config);
    if args.print_ca {
        print!("{}", engine.ca_cert_pem()?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(engine.config().listen.worker_threads())
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(run(engine))
}

async fn run(engine: ProxyEngine) -> anyhow::Result<()> {
    engine.add_sink(Arc::new(TracingSink));

    let config = engine.config();
    let mocks = config.mocks.clone();
    engine
        .start(config.listen.port, config.mock_server.port, mocks)
        .await?;
    info!(
        "Shunt running on port {}; trust the CA in {} to intercept HTTPS",
        engine.current_state().await.port,
        config.mitm.ca_storage_path.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    engine.shutdown().await?;

    debug!("Final metrics:\n{}", shunt_proxy::metrics::collect_metrics());
    Ok(())
}
