use clap::Parser;
use fanout_server::{Coordinator, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fanout-server")]
#[command(about = "Fanout task queue coordinator", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "server.yaml")]
    config: String,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Timeout monitor period in seconds
    #[arg(long)]
    monitor_interval: Option<u64>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_missing = !std::path::Path::new(&args.config).exists();
    let mut config = if config_missing {
        ServerConfig::default()
    } else {
        ServerConfig::from_file(&args.config)?
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(interval) = args.monitor_interval {
        config.queue.monitor_interval_secs = interval;
    }
    if let Some(level) = args.log_level {
        config.monitoring.log_level = level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if config_missing {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::info!("Starting coordinator with config: {:?}", config);

    let coordinator = Coordinator::bind(config).await?;
    coordinator.run().await?;

    Ok(())
}
