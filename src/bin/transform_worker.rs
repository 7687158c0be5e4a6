//! Transform worker: consumes raw rows, resolves joins, publishes projected
//! rows.

use clap::Parser;
use rowflow::rowflow::broker::{EtlConsumer, EtlProducer, TOPIC_EXTRACTED, TOPIC_TRANSFORMED};
use rowflow::rowflow::cache::{CacheConfig, KeyValueCache};
use rowflow::rowflow::config::{BrokerSettings, CacheSettings};
use rowflow::rowflow::engine::Transformer;
use rowflow::rowflow::error::EtlError;
use rowflow::rowflow::metadata::parse_metadata;
use rowflow::rowflow::record::Record;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "transform_worker",
    about = "Consume extracted rows, apply a transformation and publish the results"
)]
struct Args {
    /// Path to the YAML job description
    metadata: PathBuf,

    /// Name of the transformation to apply
    transformation: String,

    /// Comma-separated Kafka broker list; defaults to KAFKA_BROKERS
    #[arg(long)]
    brokers: Option<String>,
}

/// Errors that redelivery cannot fix; the message is acked and dropped
fn is_poison(err: &EtlError) -> bool {
    matches!(
        err,
        EtlError::BadRecord { .. }
            | EtlError::BadMetadata { .. }
            | EtlError::MissingField { .. }
            | EtlError::FieldTooLong { .. }
            | EtlError::UnknownDataSource { .. }
            | EtlError::UnsatisfiableJoins { .. }
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let settings = BrokerSettings::from_env();
    let brokers = args.brokers.unwrap_or_else(|| settings.brokers.clone());

    let text = tokio::fs::read_to_string(&args.metadata).await?;
    let metadata = Arc::new(parse_metadata(&text)?);

    let transformation = metadata
        .transform
        .get(&args.transformation)
        .ok_or_else(|| {
            EtlError::bad_metadata(format!("unknown transformation '{}'", args.transformation))
        })?;
    let primary = metadata
        .extract
        .primary
        .get(&transformation.from)
        .ok_or_else(|| {
            EtlError::unknown_data_source(
                transformation.from.clone(),
                "primary datasource not found in metadata",
            )
        })?
        .clone();

    let cache_settings = CacheSettings::from_env()?;
    let cache = if cache_settings.enabled() {
        // No RemoteStore implementation is wired in this binary; embedders
        // inject one for the configured address. The worker runs the
        // in-process tier only.
        log::info!(
            "request cache enabled, in-process tier only; no remote store is wired for {}",
            cache_settings.address().unwrap_or_default()
        );
        Some(Arc::new(KeyValueCache::new(CacheConfig::default(), None)))
    } else {
        log::info!("REDIS_CACHE_HOST not set; running without the request cache");
        None
    };

    let transformer = Transformer::new(Arc::clone(&metadata), cache);
    let consumer = EtlConsumer::new(&brokers, &settings.group_id)?;
    consumer.subscribe(&[TOPIC_EXTRACTED])?;
    let producer = EtlProducer::new(&brokers)?;

    log::info!(
        "transform worker for '{}' consuming {}",
        args.transformation,
        TOPIC_EXTRACTED
    );
    loop {
        let mut record: Record = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = consumer.recv_json() => match received {
                Ok(record) => record,
                Err(err) => {
                    log::error!("cannot read message: {}", err);
                    continue;
                }
            },
        };

        let result = async {
            record.unraw(&primary.fields)?;
            let transformed = transformer.transform(&args.transformation, &record).await?;
            producer
                .send_json(
                    TOPIC_TRANSFORMED,
                    Some(&transformed.record.id().to_string()),
                    &transformed,
                )
                .await
        }
        .await;

        match result {
            Ok(()) => consumer.commit()?,
            Err(err) if is_poison(&err) => {
                log::error!("dropping row: {}", err);
                consumer.commit()?;
            }
            Err(err) => {
                // left unacked; the broker redelivers
                log::error!("row failed, leaving it for redelivery: {}", err);
            }
        }
    }
    producer.flush(5_000)?;
    Ok(())
}
