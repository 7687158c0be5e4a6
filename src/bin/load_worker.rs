//! Load worker: drains the `transformed` topic into the job's destinations.

use clap::Parser;
use rowflow::rowflow::broker::{EtlConsumer, TOPIC_TRANSFORMED};
use rowflow::rowflow::config::BrokerSettings;
use rowflow::rowflow::engine::{Loader, Transformed};
use rowflow::rowflow::error::EtlError;
use rowflow::rowflow::metadata::parse_metadata;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "load_worker", about = "Write transformed rows to their destinations")]
struct Args {
    /// Path to the YAML job description
    metadata: PathBuf,

    /// Comma-separated Kafka broker list; defaults to KAFKA_BROKERS
    #[arg(long)]
    brokers: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let settings = BrokerSettings::from_env();
    let brokers = args.brokers.unwrap_or_else(|| settings.brokers.clone());

    let text = tokio::fs::read_to_string(&args.metadata).await?;
    let metadata = Arc::new(parse_metadata(&text)?);

    let mut loader = Loader::new(Arc::clone(&metadata));
    loader.initialize().await?;

    let consumer = EtlConsumer::new(&brokers, &settings.group_id)?;
    consumer.subscribe(&[TOPIC_TRANSFORMED])?;

    log::info!("load worker consuming {}", TOPIC_TRANSFORMED);
    loop {
        let transformed: Transformed = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = consumer.recv_json() => match received {
                Ok(transformed) => transformed,
                Err(err) => {
                    log::error!("cannot read message: {}", err);
                    continue;
                }
            },
        };
        match loader.load(transformed).await {
            Ok(()) => consumer.commit()?,
            Err(err @ EtlError::UnknownDataSource { .. }) => {
                log::error!("dropping unroutable row: {}", err);
                consumer.commit()?;
            }
            Err(err) => {
                log::error!("load failed, leaving the row for redelivery: {}", err);
            }
        }
    }
    loader.finish().await?;
    Ok(())
}
