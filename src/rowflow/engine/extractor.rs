//! Extract phase: stream primary sources row by row.

use crate::rowflow::datasource::{open_datasource, ConnectionMode, Request};
use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::Metadata;
use crate::rowflow::record::Record;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Streams every row of a primary datasource into a channel; the caller
/// publishes them to the `extracted` topic
pub struct Extractor {
    metadata: Arc<Metadata>,
}

impl Extractor {
    pub fn new(metadata: Arc<Metadata>) -> Self {
        Extractor { metadata }
    }

    pub async fn extract(&self, source_name: &str, records: mpsc::Sender<Record>) -> EtlResult<()> {
        let endpoint = self
            .metadata
            .extract
            .primary
            .get(source_name)
            .ok_or_else(|| {
                EtlError::unknown_data_source(source_name, "primary datasource not found in metadata")
            })?;
        let mut source = open_datasource(endpoint)?;
        source.connect(ConnectionMode::Read).await?;
        let request = Request::empty(endpoint.object_identifier.clone());
        source.stream(request, records).await?;
        source.close().await?;
        log::info!("extraction for datasource {} finished successfully", source_name);
        Ok(())
    }
}
