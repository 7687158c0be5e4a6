//! Durable queues between the pipeline phases.
//!
//! Three logical topics connect the workers: `extracted` carries raw record
//! JSON, `transformed` carries projected rows, `errors` is reserved for dead
//! letters. Messages are JSON; consumers commit only after a successful
//! downstream handoff, leaving retries to broker redelivery.

use crate::rowflow::error::{EtlError, EtlResult};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub const TOPIC_EXTRACTED: &str = "extracted";
pub const TOPIC_TRANSFORMED: &str = "transformed";
pub const TOPIC_ERRORS: &str = "errors";

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Producer wrapper publishing JSON payloads
pub struct EtlProducer {
    producer: FutureProducer,
}

impl EtlProducer {
    /// Creates a producer connected to the given comma-separated broker list
    pub fn new(brokers: &str) -> EtlResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| EtlError::io("kafka producer", e.to_string()))?;
        log::info!("created producer connected to {}", brokers);
        Ok(EtlProducer { producer })
    }

    /// Serialize the payload as JSON and publish it, awaiting delivery
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &T,
    ) -> EtlResult<()> {
        let body = serde_json::to_string(payload)
            .map_err(|e| EtlError::bad_record(e.to_string(), None))?;
        let record = FutureRecord::to(topic)
            .payload(&body)
            .key(key.unwrap_or(""));

        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok((partition, offset)) => {
                log::debug!(
                    "message sent to topic '{}', partition {}, offset {}",
                    topic,
                    partition,
                    offset
                );
                Ok(())
            }
            Err((err, _)) => {
                log::error!("failed to send message to topic '{}': {}", topic, err);
                Err(EtlError::io("kafka publish", err.to_string()))
            }
        }
    }

    /// Flush any pending messages
    pub fn flush(&self, timeout_ms: u64) -> EtlResult<()> {
        self.producer
            .flush(Timeout::After(Duration::from_millis(timeout_ms)))
            .map_err(|e| EtlError::io("kafka flush", e.to_string()))
    }
}

/// Consumer wrapper decoding JSON payloads; commits are explicit
pub struct EtlConsumer {
    consumer: StreamConsumer,
}

impl EtlConsumer {
    pub fn new(brokers: &str, group_id: &str) -> EtlResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| EtlError::io("kafka consumer", e.to_string()))?;
        log::info!(
            "created consumer in group {} connected to {}",
            group_id,
            brokers
        );
        Ok(EtlConsumer { consumer })
    }

    pub fn subscribe(&self, topics: &[&str]) -> EtlResult<()> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| EtlError::io("kafka subscribe", e.to_string()))
    }

    /// Await the next message and decode its JSON payload
    pub async fn recv_json<T: DeserializeOwned>(&self) -> EtlResult<T> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| EtlError::io("kafka consume", e.to_string()))?;
        let payload = message
            .payload()
            .ok_or_else(|| EtlError::bad_record("empty message payload", None))?;
        serde_json::from_slice(payload)
            .map_err(|e| EtlError::bad_record(format!("cannot decode message payload: {}", e), None))
    }

    /// Acknowledge everything consumed so far; call after downstream handoff
    pub fn commit(&self) -> EtlResult<()> {
        self.consumer
            .commit_consumer_state(CommitMode::Async)
            .map_err(|e| EtlError::io("kafka commit", e.to_string()))
    }
}
