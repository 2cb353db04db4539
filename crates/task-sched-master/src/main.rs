use clap::Parser;
use task_sched_master::{Master, MasterConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ts-master")]
#[command(about = "Task scheduling master", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "master.yaml")]
    config: String,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(long)]
    port: Option<u16>,

    /// Heartbeat expiration in milliseconds
    #[arg(long)]
    heartbeat_expiration_ms: Option<u64>,
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

    let mut config = if std::path::Path::new(&args.config).exists() {
        MasterConfig::from_file(&args.config)?
    } else {
        tracing::warn!("config file not found, using defaults");
        MasterConfig::default()
    };

    if let Some(host) = args.host {
        config.network.host = host;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(expiration) = args.heartbeat_expiration_ms {
        config.liveness.heartbeat_expiration_ms = expiration;
    }

    let master = Master::listen(config).await?;
    let handle = master.handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received shutdown signal");
        handle.stop().await;
    });

    master.run().await;

    Ok(())
}
