//! Extract worker: streams a primary datasource onto the `extracted` topic.

use clap::Parser;
use rowflow::rowflow::broker::{EtlProducer, TOPIC_EXTRACTED};
use rowflow::rowflow::config::BrokerSettings;
use rowflow::rowflow::engine::Extractor;
use rowflow::rowflow::metadata::parse_metadata;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "extract_worker", about = "Stream a primary datasource onto the broker")]
struct Args {
    /// Path to the YAML job description
    metadata: PathBuf,

    /// Name of the primary datasource to extract
    source: String,

    /// Comma-separated Kafka broker list; defaults to KAFKA_BROKERS
    #[arg(long)]
    brokers: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let brokers = args
        .brokers
        .unwrap_or_else(|| BrokerSettings::from_env().brokers);

    let text = tokio::fs::read_to_string(&args.metadata).await?;
    let metadata = Arc::new(parse_metadata(&text)?);

    let producer = EtlProducer::new(&brokers)?;
    let extractor = Extractor::new(Arc::clone(&metadata));

    let (tx, mut rx) = mpsc::channel(64);
    let source = args.source.clone();
    let extraction = tokio::spawn(async move { extractor.extract(&source, tx).await });

    let mut published = 0u64;
    while let Some(record) = rx.recv().await {
        producer
            .send_json(TOPIC_EXTRACTED, Some(&record.id().to_string()), &record)
            .await?;
        published += 1;
    }
    extraction.await??;
    producer.flush(5_000)?;
    log::info!("published {} records from {}", published, args.source);
    Ok(())
}
