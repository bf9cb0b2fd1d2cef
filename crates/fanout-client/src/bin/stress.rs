use clap::Parser;
use fanout_client::{ClientError, Runner, RunnerConfig};
use fanout_core::Kwargs;
use serde_json::json;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fanout-stress")]
#[command(about = "Submit a batch of demo.sleep tasks and report the outcome", long_about = None)]
struct Args {
    /// Path to runner configuration file
    #[arg(short, long, default_value = "runner.yaml")]
    config: String,

    /// Coordinator address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Number of tasks to submit
    #[arg(short = 'n', long, default_value_t = 100)]
    count: usize,

    /// Seconds each task sleeps
    #[arg(long, default_value_t = 0.1)]
    sleep: f64,

    /// Probability that a task raises an error
    #[arg(long, default_value_t = 0.0)]
    exc_rate: f64,

    /// Probability that a task crashes its process
    #[arg(long, default_value_t = 0.0)]
    crash_rate: f64,

    /// Coordinator-side attempts per task
    #[arg(long)]
    max_tries: Option<u32>,

    /// Runner-side submissions per task
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if std::path::Path::new(&args.config).exists() {
        RunnerConfig::from_file(&args.config)?
    } else {
        RunnerConfig::default()
    };
    if let Some(server) = args.server {
        config.transport.address = server;
    }
    if let Some(max_tries) = args.max_tries {
        config.task_max_tries = max_tries;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut runner = Runner::new(config).await?;
    let tasks = (0..args.count)
        .map(|_| {
            let mut kwargs = Kwargs::new();
            kwargs.insert("exc_rate".to_string(), json!(args.exc_rate));
            kwargs.insert("crash_rate".to_string(), json!(args.crash_rate));
            runner.make_task("demo.sleep", vec![json!(args.sleep)], kwargs)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let started = Instant::now();
    let mut succeeded = 0usize;
    let mut aborted: Option<ClientError> = None;
    {
        let mut batch = runner.run_batch(tasks).await?;
        while let Some(result) = batch.next().await {
            match result {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    aborted = Some(e);
                    break;
                }
            }
        }
    }
    runner.close().await?;

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(
        "{} of {} tasks succeeded in {:.2}s ({:.1} tasks/s)",
        succeeded,
        args.count,
        elapsed,
        succeeded as f64 / elapsed.max(f64::EPSILON)
    );

    match aborted {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
