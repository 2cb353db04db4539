use clap::Parser;
use task_sched_worker::{NoopHandler, SleepHandler, TaskHandlerRegistry, Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ts-worker")]
#[command(about = "Task scheduling worker", long_about = None)]
struct Args {
    /// Master address
    #[arg(short, long, default_value = "127.0.0.1:8999")]
    master: String,

    /// Heartbeat interval in milliseconds
    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    /// Consecutive heartbeat failures tolerated before disconnecting
    #[arg(long)]
    heartbeat_failure_tolerance: Option<u32>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    config.master_address = args.master;
    if let Some(interval) = args.heartbeat_interval_ms {
        config.heartbeat_interval_ms = interval;
    }
    if let Some(tolerance) = args.heartbeat_failure_tolerance {
        config.heartbeat_failure_tolerance = tolerance;
    }

    let registry = TaskHandlerRegistry::new();
    registry.register("noop", NoopHandler);
    registry.register("sleep", SleepHandler::new(1000));
    tracing::info!("registered task types: {:?}", registry.task_types());

    let mut worker = Worker::new(config, registry);
    worker.connect().await?;

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received shutdown signal");
        shutdown.cancel();
    });

    worker.run().await?;

    Ok(())
}
