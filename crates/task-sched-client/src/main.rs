use clap::Parser;
use task_sched_client::SchedulerClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ts-submit")]
#[command(about = "Submit tasks to the scheduling master", long_about = None)]
struct Args {
    /// Master address
    #[arg(short, long, default_value = "127.0.0.1:8999")]
    master: String,

    /// Task type to submit
    task_type: String,

    /// Number of copies to submit
    #[arg(short = 'n', long, default_value = "1")]
    count: u32,
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

    let client = SchedulerClient::new(args.master);
    for i in 0..args.count {
        let accepted = client.submit_type(args.task_type.clone()).await?;
        tracing::info!(task_type = %args.task_type, accepted, "submitted {}/{}", i + 1, args.count);
    }

    Ok(())
}
