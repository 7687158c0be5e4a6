//! Plaintext file datasource.
//!
//! Rows are newline-delimited lines encoded through the field codec. Point
//! lookups are pooled through the quest engine so that many concurrent
//! fetches share a bounded number of file scans.

mod quest;

use crate::rowflow::datasource::request::Request;
use crate::rowflow::datasource::traits::{ConnectionMode, DataSource};
use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::{DataEndpoint, Field};
use crate::rowflow::record::{codec, Record, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use quest::QuestEngine;

/// Datasource over a plaintext file
pub struct PlainTextDataSource {
    path: PathBuf,
    object_id: String,
    fields: Arc<Vec<Field>>,
    quest: Arc<QuestEngine>,
}

impl PlainTextDataSource {
    pub fn new(endpoint: &DataEndpoint) -> EtlResult<Self> {
        for field in &endpoint.fields {
            field.check()?;
        }
        let path = PathBuf::from(&endpoint.connection_string);
        let fields = Arc::new(endpoint.fields.clone());
        let quest = QuestEngine::new(path.clone(), Arc::clone(&fields));
        Ok(PlainTextDataSource {
            path,
            object_id: endpoint.object_identifier.clone(),
            fields,
            quest,
        })
    }

    /// Number of full quest scans completed so far
    #[allow(dead_code)]
    pub(crate) fn scans_completed(&self) -> u64 {
        self.quest.scans_completed()
    }
}

#[async_trait]
impl DataSource for PlainTextDataSource {
    async fn connect(&mut self, mode: ConnectionMode) -> EtlResult<()> {
        match mode {
            ConnectionMode::Read => {
                tokio::fs::metadata(&self.path).await.map_err(|e| {
                    EtlError::io(format!("open {} for reading", self.path.display()), e.to_string())
                })?;
                Ok(())
            }
            ConnectionMode::Write => {
                if tokio::fs::try_exists(&self.path).await.map_err(|e| {
                    EtlError::io(format!("stat {}", self.path.display()), e.to_string())
                })? {
                    return Err(EtlError::io(
                        format!("open {} for writing", self.path.display()),
                        "target file already exists".to_string(),
                    ));
                }
                tokio::fs::File::create(&self.path).await.map_err(|e| {
                    EtlError::io(format!("create {}", self.path.display()), e.to_string())
                })?;
                Ok(())
            }
        }
    }

    fn new_request(&self, filters: BTreeMap<Field, Value>) -> Request {
        Request::new(self.object_id.clone(), filters)
    }

    async fn fetch(&self, request: Request) -> EtlResult<Option<Record>> {
        Arc::clone(&self.quest).fetch(request).await
    }

    async fn stream(&self, request: Request, records: mpsc::Sender<Record>) -> EtlResult<()> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            EtlError::io(format!("open {}", self.path.display()), e.to_string())
        })?;
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await.map_err(|e| {
            EtlError::io(format!("read {}", self.path.display()), e.to_string())
        })? {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = match codec::parse_line(&line, &self.fields) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!("skipping unparseable line '{}': {}", line, err);
                    continue;
                }
            };
            if !request.matches(&parsed) {
                continue;
            }
            let mut record = Record::new_raw();
            for (index, field) in self.fields.iter().enumerate() {
                let value = parsed.get(&field.name).cloned().unwrap_or_default();
                record.set_index(index, Value::String(value))?;
            }
            if records.send(record).await.is_err() {
                // receiver dropped; nothing left to stream to
                return Ok(());
            }
        }
        Ok(())
    }

    async fn save(&self, mut records: mpsc::Receiver<Record>) -> EtlResult<()> {
        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                EtlError::io(format!("open {} for appending", self.path.display()), e.to_string())
            })?;
        let mut writer = tokio::io::BufWriter::new(file);
        while let Some(record) = records.recv().await {
            let line = match record.to_line(&self.fields) {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("error building line from record {}: {}", record.id(), err);
                    continue;
                }
            };
            writer.write_all(line.as_bytes()).await.map_err(|e| {
                EtlError::io(format!("write {}", self.path.display()), e.to_string())
            })?;
            writer.write_all(b"\n").await.map_err(|e| {
                EtlError::io(format!("write {}", self.path.display()), e.to_string())
            })?;
        }
        writer.flush().await.map_err(|e| {
            EtlError::io(format!("flush {}", self.path.display()), e.to_string())
        })?;
        Ok(())
    }

    async fn close(&self) -> EtlResult<()> {
        self.quest.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowflow::metadata::{FieldType, Padding, PaddingMode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn endpoint(path: &str) -> DataEndpoint {
        DataEndpoint {
            driver: "plaintext".to_string(),
            connection_string: path.to_string(),
            object_identifier: "users".to_string(),
            fields: vec![
                Field {
                    name: "id".to_string(),
                    expected_type: FieldType::Int,
                    fixed_length: 6,
                    max_length: 0,
                    end_character: String::new(),
                    padding: Padding {
                        mode: PaddingMode::Left,
                        character: "0".to_string(),
                    },
                },
                Field {
                    name: "name".to_string(),
                    expected_type: FieldType::String,
                    fixed_length: 0,
                    max_length: 12,
                    end_character: ",".to_string(),
                    padding: Default::default(),
                },
            ],
            accessor_url: None,
        }
    }

    fn write_users(count: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..count {
            writeln!(file, "{:06}user-{},", i, i).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn id_filter(source: &PlainTextDataSource, id: i64) -> Request {
        let field = source.fields[0].clone();
        let mut filters = BTreeMap::new();
        filters.insert(field, Value::Integer(id));
        source.new_request(filters)
    }

    #[tokio::test]
    async fn test_fetch_finds_record() {
        let file = write_users(100);
        let mut source = PlainTextDataSource::new(&endpoint(file.path().to_str().unwrap())).unwrap();
        source.connect(ConnectionMode::Read).await.unwrap();

        let found = source.fetch(id_filter(&source, 42)).await.unwrap();
        let record = found.expect("record 42 exists");
        assert_eq!(record.get_named("id").unwrap(), &Value::Integer(42));
        assert_eq!(record.get_named("name").unwrap(), &Value::from("user-42"));
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_not_found_after_two_scan_edges() {
        let file = write_users(20);
        let mut source = PlainTextDataSource::new(&endpoint(file.path().to_str().unwrap())).unwrap();
        source.connect(ConnectionMode::Read).await.unwrap();

        let found = source.fetch(id_filter(&source, 999)).await.unwrap();
        assert!(found.is_none());
        assert!(source.scans_completed() >= 2);
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_scans() {
        let file = write_users(10_000);
        let mut source = PlainTextDataSource::new(&endpoint(file.path().to_str().unwrap())).unwrap();
        source.connect(ConnectionMode::Read).await.unwrap();
        let source = Arc::new(source);

        let mut handles = Vec::new();
        for i in 0..100i64 {
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move {
                let request = id_filter(&source, i * 97);
                source.fetch(request).await
            }));
        }
        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert!(record.is_some());
        }
        // 100 lookups resolve in O(1) scans, not one scan per lookup
        assert!(source.scans_completed() < 10);
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_identical_filters_resolve_together() {
        let file = write_users(200);
        let mut source = PlainTextDataSource::new(&endpoint(file.path().to_str().unwrap())).unwrap();
        source.connect(ConnectionMode::Read).await.unwrap();
        let source = Arc::new(source);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move {
                source.fetch(id_filter(&source, 7)).await
            }));
        }
        for handle in handles {
            let record = handle.await.unwrap().unwrap().expect("record 7 exists");
            assert_eq!(record.get_named("id").unwrap(), &Value::Integer(7));
        }
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_filters_and_closes() {
        let file = write_users(50);
        let mut source = PlainTextDataSource::new(&endpoint(file.path().to_str().unwrap())).unwrap();
        source.connect(ConnectionMode::Read).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let request = Request::empty("users");
        let streaming = {
            let request = request.clone();
            async move { source.stream(request, tx).await }
        };
        let (result, collected) = tokio::join!(streaming, async move {
            let mut collected = Vec::new();
            while let Some(record) = rx.recv().await {
                collected.push(record);
            }
            collected
        });
        result.unwrap();
        assert_eq!(collected.len(), 50);
        assert!(collected[0].is_raw());
        assert_eq!(collected[0].get_index(0).unwrap(), &Value::from("000000"));
    }

    #[tokio::test]
    async fn test_save_appends_formatted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut source =
            PlainTextDataSource::new(&endpoint(path.to_str().unwrap())).unwrap();
        source.connect(ConnectionMode::Write).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let mut record = Record::new_named();
        record.set_named("id", Value::Integer(3)).unwrap();
        record.set_named("name", Value::from("ada")).unwrap();
        tx.send(record).await.unwrap();
        drop(tx);
        source.save(rx).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "000003ada,\n");
    }

    #[tokio::test]
    async fn test_write_connect_refuses_existing_file() {
        let file = write_users(1);
        let mut source = PlainTextDataSource::new(&endpoint(file.path().to_str().unwrap())).unwrap();
        assert!(source.connect(ConnectionMode::Write).await.is_err());
    }

    #[tokio::test]
    async fn test_read_connect_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let mut source =
            PlainTextDataSource::new(&endpoint(path.to_str().unwrap())).unwrap();
        assert!(source.connect(ConnectionMode::Read).await.is_err());
    }
}
