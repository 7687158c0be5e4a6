//! Generic datasource abstraction.
//!
//! A [`DataSource`] can serve point lookups during joins (`fetch`), stream
//! its full contents (`stream`) and persist records (`save`). Implementations
//! exist per driver; the plaintext driver ships with the crate.

use crate::rowflow::error::EtlResult;
use crate::rowflow::metadata::Field;
use crate::rowflow::record::{Record, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;

use super::request::Request;

/// How a datasource connection will be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Read,
    Write,
}

/// A driver that can perform actions against a datasource
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Open the underlying resource. Read mode requires it to exist, write
    /// mode requires it to not exist yet.
    async fn connect(&mut self, mode: ConnectionMode) -> EtlResult<()>;

    /// Build a request against this datasource's object
    fn new_request(&self, filters: BTreeMap<Field, Value>) -> Request;

    /// Find the single record matching the request's filters, if any
    async fn fetch(&self, request: Request) -> EtlResult<Option<Record>>;

    /// Send every record matching the request's filters into the channel.
    /// The channel closes when streaming completes.
    async fn stream(
        &self,
        request: Request,
        records: tokio::sync::mpsc::Sender<Record>,
    ) -> EtlResult<()>;

    /// Drain the channel and persist every record received
    async fn save(&self, records: tokio::sync::mpsc::Receiver<Record>) -> EtlResult<()>;

    /// Release the underlying resource
    async fn close(&self) -> EtlResult<()>;
}
