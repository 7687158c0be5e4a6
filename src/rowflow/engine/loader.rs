//! Load phase: route transformed rows to their destinations.

use crate::rowflow::datasource::{open_datasource, ConnectionMode};
use crate::rowflow::engine::transformer::Transformed;
use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::Metadata;
use crate::rowflow::record::Record;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LOAD_CHANNEL_CAPACITY: usize = 64;

/// Fans transformed rows out to one saver per destination, keyed by
/// transformation name
pub struct Loader {
    metadata: Arc<Metadata>,
    senders: HashMap<String, Vec<mpsc::Sender<Record>>>,
    savers: Vec<(String, JoinHandle<EtlResult<()>>)>,
}

impl Loader {
    pub fn new(metadata: Arc<Metadata>) -> Self {
        Loader {
            metadata,
            senders: HashMap::new(),
            savers: Vec::new(),
        }
    }

    /// Connect every destination and launch its saver task
    pub async fn initialize(&mut self) -> EtlResult<()> {
        for (destination_name, destination) in &self.metadata.load {
            let endpoint = destination.endpoint();
            let mut source = open_datasource(&endpoint)?;
            source.connect(ConnectionMode::Write).await?;

            let (tx, rx) = mpsc::channel(LOAD_CHANNEL_CAPACITY);
            self.senders
                .entry(destination.transformation_name.clone())
                .or_default()
                .push(tx);

            let handle = tokio::spawn(async move {
                let saved = source.save(rx).await;
                source.close().await?;
                saved
            });
            self.savers.push((destination_name.clone(), handle));
        }
        Ok(())
    }

    /// Route one transformed row onto every destination fed by its
    /// transformation
    pub async fn load(&self, transformed: Transformed) -> EtlResult<()> {
        let senders = self
            .senders
            .get(&transformed.transformation_name)
            .ok_or_else(|| {
                EtlError::unknown_data_source(
                    transformed.transformation_name.clone(),
                    "no load destination for that transformation",
                )
            })?;
        for sender in senders {
            sender.send(transformed.record.clone()).await.map_err(|_| {
                EtlError::io(
                    "loader channel",
                    "saver task stopped before the channel was closed",
                )
            })?;
        }
        Ok(())
    }

    /// Close every channel once and wait for the savers to drain
    pub async fn finish(&mut self) -> EtlResult<()> {
        self.senders.clear();
        let mut first_error = None;
        for (destination_name, handle) in self.savers.drain(..) {
            match handle.await {
                Ok(Ok(())) => {
                    log::info!("saver for destination {} finished", destination_name)
                }
                Ok(Err(err)) => {
                    log::error!("saver for destination {} failed: {}", destination_name, err);
                    first_error.get_or_insert(err);
                }
                Err(err) => {
                    log::error!("saver task for {} aborted: {}", destination_name, err);
                    first_error
                        .get_or_insert_with(|| EtlError::io("saver task", err.to_string()));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
