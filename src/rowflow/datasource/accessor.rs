//! Remote and in-process datasource accessors.
//!
//! The transformer resolves joins through a [`DataAccessor`]: either an HTTP
//! client against a deployed accessor service (`POST /fetch`, `POST /save`,
//! with `GET /stream` upgraded to a websocket by the deployment's stream
//! bridge) or a thin adapter over an in-process [`DataSource`].

use crate::rowflow::datasource::request::Request;
use crate::rowflow::datasource::traits::{ConnectionMode, DataSource};
use crate::rowflow::datasource::open_datasource;
use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::DataEndpoint;
use crate::rowflow::record::Record;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const ACCESSOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote interface of a datasource: point query, bulk stream and save
#[async_trait]
pub trait DataAccessor: Send + Sync {
    async fn fetch(&self, request: Request) -> EtlResult<Option<Record>>;

    async fn save(&self, record: &Record) -> EtlResult<()>;

    async fn stream(&self, request: Request, records: mpsc::Sender<Record>) -> EtlResult<()>;
}

/// HTTP client for a deployed accessor service
pub struct HttpDataAccessor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDataAccessor {
    pub fn new(base_url: impl Into<String>) -> EtlResult<Self> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(ACCESSOR_TIMEOUT)
            .build()
            .map_err(|e| EtlError::accessor_failed(base_url.clone(), e.to_string()))?;
        Ok(HttpDataAccessor { base_url, client })
    }

    fn request_error(&self, url: &str, err: reqwest::Error) -> EtlError {
        if err.is_timeout() {
            EtlError::cancelled(format!("request to {} timed out", url))
        } else {
            EtlError::accessor_failed(url, err.to_string())
        }
    }
}

#[async_trait]
impl DataAccessor for HttpDataAccessor {
    async fn fetch(&self, request: Request) -> EtlResult<Option<Record>> {
        let url = format!("{}/fetch", self.base_url);
        log::debug!("fetching {} from {}", request.fingerprint(), url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EtlError::accessor_failed(
                &url,
                format!("unexpected status {}", response.status()),
            ));
        }
        let record: Record = response
            .json()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &Record) -> EtlResult<()> {
        let url = format!("{}/save", self.base_url);
        log::debug!("saving record {} to {}", record.id(), url);
        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        if !response.status().is_success() {
            return Err(EtlError::accessor_failed(
                &url,
                format!("unexpected status {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn stream(&self, _request: Request, _records: mpsc::Sender<Record>) -> EtlResult<()> {
        // GET /stream is upgraded to a websocket by the deployment's stream
        // bridge; this client does not carry that transport.
        Err(EtlError::accessor_failed(
            format!("{}/stream", self.base_url),
            "streaming is served by the websocket bridge, not this client".to_string(),
        ))
    }
}

/// Adapter exposing an in-process datasource through the accessor interface
pub struct LocalDataAccessor {
    source: Arc<dyn DataSource>,
}

impl LocalDataAccessor {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        LocalDataAccessor { source }
    }
}

#[async_trait]
impl DataAccessor for LocalDataAccessor {
    async fn fetch(&self, request: Request) -> EtlResult<Option<Record>> {
        self.source.fetch(request).await
    }

    async fn save(&self, record: &Record) -> EtlResult<()> {
        let (tx, rx) = mpsc::channel(1);
        tx.send(record.clone())
            .await
            .map_err(|_| EtlError::io("accessor save", "save channel closed".to_string()))?;
        drop(tx);
        self.source.save(rx).await
    }

    async fn stream(&self, request: Request, records: mpsc::Sender<Record>) -> EtlResult<()> {
        self.source.stream(request, records).await
    }
}

/// Build the accessor for an endpoint: HTTP when an accessor URL is
/// configured, otherwise a connected local driver
pub async fn accessor_for(endpoint: &DataEndpoint) -> EtlResult<Arc<dyn DataAccessor>> {
    match &endpoint.accessor_url {
        Some(url) => {
            let accessor: Arc<dyn DataAccessor> = Arc::new(HttpDataAccessor::new(url.clone())?);
            Ok(accessor)
        }
        None => {
            let mut source = open_datasource(endpoint)?;
            source.connect(ConnectionMode::Read).await?;
            let accessor: Arc<dyn DataAccessor> =
                Arc::new(LocalDataAccessor::new(Arc::from(source)));
            Ok(accessor)
        }
    }
}
