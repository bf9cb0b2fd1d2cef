use clap::Parser;
use fanout_core::CacheLimits;
use fanout_worker::demo::demo_registry;
use fanout_worker::{serve_child, IsolationMode, QueueWorker, WorkerConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fanout-worker")]
#[command(about = "Fanout queue worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Coordinator address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Run capabilities in-process instead of in a child per task
    #[arg(long)]
    threads: bool,

    /// Executable spawned per task (defaults to this binary)
    #[arg(long)]
    child_program: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Serve a single task on stdin/stdout and exit
    #[arg(long, hide = true)]
    child: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(server) = args.server {
        config.transport.address = server;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }
    if args.threads {
        config.isolation = IsolationMode::Thread;
    }
    if let Some(program) = args.child_program {
        config.child_program = Some(program);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // stdout carries the child's result line, so all logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let registry = demo_registry(CacheLimits::count(config.file_cache_entries))?;

    if args.child {
        serve_child(&registry, std::io::stdin().lock(), std::io::stdout().lock())?;
        return Ok(());
    }

    tracing::info!("Registered capabilities: {:?}", registry.names());
    let worker = QueueWorker::new(config, registry)?;

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        shutdown.notify_one();
    });

    worker.run().await?;

    Ok(())
}
