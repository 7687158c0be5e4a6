//! Cooperative batch scanning for plaintext point lookups.
//!
//! Joins issue many concurrent point lookups against the same file. Scanning
//! once per lookup is quadratic, so in-flight lookups are pooled: a single
//! background quest repeatedly scans the file in parallel chunks and tests
//! every line against every pending request. Matches are published on a
//! broadcast bus keyed by request fingerprint; a counter edge is emitted once
//! per completed full scan. A request that sees two edges without a match was
//! tested against the whole file at least once and conclusively has no
//! matching record.

use crate::rowflow::datasource::request::Request;
use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::Field;
use crate::rowflow::record::{codec, Record, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, Notify};

/// Lower bound on the lines each scanner chunk covers
const LINES_PER_TASK: usize = 50;

/// Capacity of the match broadcast bus
const MATCH_CHANNEL_CAPACITY: usize = 1024;

/// A satisfied match: the fingerprint of the request it answers plus the
/// validated record
#[derive(Debug, Clone)]
struct Fetched {
    key: String,
    record: Record,
}

/// Thread-safe set of pending requests, keyed by their hash code so equal
/// filter sets collapse into one entry
#[derive(Clone)]
struct RequestSet {
    inner: Arc<Mutex<HashMap<String, Request>>>,
}

impl RequestSet {
    fn new() -> Self {
        RequestSet {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn add(&self, request: Request) {
        self.inner.lock().await.insert(request.hash_code(), request);
    }

    async fn remove(&self, request: &Request) -> bool {
        self.inner.lock().await.remove(&request.hash_code()).is_some()
    }

    async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Snapshot for scanner threads
    fn blocking_items(&self) -> Vec<Request> {
        self.inner.blocking_lock().values().cloned().collect()
    }

    /// Removal gate for scanner threads; returns whether the request was
    /// still pending, so each match is delivered exactly once
    fn blocking_remove(&self, request: &Request) -> bool {
        self.inner
            .blocking_lock()
            .remove(&request.hash_code())
            .is_some()
    }
}

/// The quest: pending requests, the match bus and the scan status edge
pub(crate) struct QuestEngine {
    path: PathBuf,
    fields: Arc<Vec<Field>>,
    requests: RequestSet,
    found: broadcast::Sender<Fetched>,
    scans: watch::Sender<u64>,
    wakeup: Notify,
    closed: AtomicBool,
    started: Mutex<bool>,
}

impl QuestEngine {
    pub(crate) fn new(path: PathBuf, fields: Arc<Vec<Field>>) -> Arc<Self> {
        let (found, _) = broadcast::channel(MATCH_CHANNEL_CAPACITY);
        let (scans, _) = watch::channel(0u64);
        Arc::new(QuestEngine {
            path,
            fields,
            requests: RequestSet::new(),
            found,
            scans,
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
            started: Mutex::new(false),
        })
    }

    /// Resolve a point lookup through the shared scan.
    ///
    /// Blocks until either a match for this request arrives, or two scan
    /// edges pass without one, which means no record in the file satisfies
    /// the filters.
    pub(crate) async fn fetch(self: Arc<Self>, request: Request) -> EtlResult<Option<Record>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EtlError::cancelled(format!(
                "fetch against closed datasource {}",
                self.path.display()
            )));
        }
        let key = request.fingerprint();
        // Subscribe before inserting so a match cannot slip past, and take
        // the scan baseline after inserting so the two counted edges both
        // postdate the request.
        let mut matches = self.found.subscribe();
        self.requests.add(request.clone()).await;
        let mut scans = self.scans.subscribe();
        let baseline = *scans.borrow_and_update();
        Self::ensure_started(&self).await;
        self.wakeup.notify_one();

        loop {
            tokio::select! {
                delivered = matches.recv() => match delivered {
                    Ok(fetched) if fetched.key == key => return Ok(Some(fetched.record)),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "quest subscriber for {} lagged behind by {} matches",
                            key,
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(EtlError::cancelled("quest match bus closed".to_string()));
                    }
                },
                changed = scans.changed() => {
                    if changed.is_err() {
                        return Err(EtlError::cancelled("quest scan loop stopped".to_string()));
                    }
                    if *scans.borrow_and_update() >= baseline + 2 {
                        self.requests.remove(&request).await;
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Latch the background quest task on first use
    async fn ensure_started(engine: &Arc<Self>) {
        let mut started = engine.started.lock().await;
        if !*started {
            *started = true;
            let engine = Arc::clone(engine);
            tokio::spawn(async move { engine.run().await });
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    /// Number of completed full scans so far
    pub(crate) fn scans_completed(&self) -> u64 {
        *self.scans.subscribe().borrow()
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.requests.is_empty().await {
                if self.closed.load(Ordering::SeqCst) {
                    break;
                }
                self.wakeup.notified().await;
                continue;
            }
            if let Err(err) = self.scan().await {
                log::error!("quest scan of {} failed: {}", self.path.display(), err);
            }
            // the status edge: exactly one per completed full scan
            self.scans.send_modify(|count| *count += 1);
        }
    }

    /// One full scan of the file, split across blocking scanner tasks
    async fn scan(&self) -> EtlResult<()> {
        let size = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| {
                EtlError::io(format!("stat {}", self.path.display()), e.to_string())
            })?
            .len();
        let chunk = (LINES_PER_TASK * max_line_width(&self.fields)) as u64;
        let tasks = if size == 0 { 1 } else { size.div_ceil(chunk) };

        let mut handles = Vec::with_capacity(tasks as usize);
        for index in 0..tasks {
            let offset = index * chunk;
            let last = index == tasks - 1;
            let path = self.path.clone();
            let fields = Arc::clone(&self.fields);
            let requests = self.requests.clone();
            let found = self.found.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                scan_chunk(&path, &fields, &requests, &found, offset, chunk, last)
            }));
        }
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("quest scanner failed: {}", err),
                Err(err) => log::error!("quest scanner panicked: {}", err),
            }
        }
        Ok(())
    }
}

/// Upper bound on the width of one encoded line, newline included
fn max_line_width(fields: &[Field]) -> usize {
    let width: usize = fields
        .iter()
        .map(|field| {
            if field.is_fixed() {
                field.fixed_length
            } else {
                field.max_length + 1
            }
        })
        .sum();
    width.max(1) + 1
}

/// Scan one chunk of the file.
///
/// A line belongs to the scanner whose window contains its first byte.
/// Scanners past the start seek one byte back and skip to the next newline,
/// which leaves them exactly on their first owned line; every scanner reads
/// whole lines, running past its nominal end to finish the last owned line,
/// and the final scanner reads to EOF.
fn scan_chunk(
    path: &Path,
    fields: &[Field],
    requests: &RequestSet,
    found: &broadcast::Sender<Fetched>,
    offset: u64,
    limit: u64,
    last: bool,
) -> EtlResult<()> {
    let file = File::open(path)
        .map_err(|e| EtlError::io(format!("open {}", path.display()), e.to_string()))?;
    let mut reader = BufReader::new(file);
    let mut position = offset;

    if offset > 0 {
        reader
            .seek(SeekFrom::Start(offset - 1))
            .map_err(|e| EtlError::io(format!("seek in {}", path.display()), e.to_string()))?;
        let mut skipped = Vec::new();
        let n = reader
            .read_until(b'\n', &mut skipped)
            .map_err(|e| EtlError::io(format!("read {}", path.display()), e.to_string()))?;
        if n == 0 {
            return Ok(());
        }
        position = offset - 1 + n as u64;
    }

    let mut line = Vec::new();
    loop {
        if !last && position >= offset + limit {
            break;
        }
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| EtlError::io(format!("read {}", path.display()), e.to_string()))?;
        if n == 0 {
            break;
        }
        position += n as u64;

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\n', '\r']);
        if text.is_empty() {
            continue;
        }
        let parsed = match codec::parse_line(text, fields) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("skipping unparseable line '{}': {}", text, err);
                continue;
            }
        };

        for request in requests.blocking_items() {
            if !request.matches(&parsed) {
                continue;
            }
            let record = match validated_record(fields, &parsed) {
                Ok(record) => record,
                Err(err) => {
                    log::warn!(
                        "line matches filter of {} but fails validation: {}",
                        request.fingerprint(),
                        err
                    );
                    continue;
                }
            };
            // removal is the exactly-once gate across concurrent scanners
            if requests.blocking_remove(&request) {
                log::debug!("record matches filter of {}; join ended", request.fingerprint());
                if found
                    .send(Fetched {
                        key: request.fingerprint(),
                        record,
                    })
                    .is_err()
                {
                    log::warn!("no subscriber for quest match {}", request.fingerprint());
                }
            }
        }
    }
    Ok(())
}

/// Validate a parsed line into a typed named record
fn validated_record(fields: &[Field], parsed: &HashMap<String, String>) -> EtlResult<Record> {
    let mut record = Record::new_named();
    for field in fields {
        let raw = parsed
            .get(&field.name)
            .ok_or_else(|| EtlError::missing_field(&field.name, "parsed line".to_string()))?;
        let validated = field.validate(&Value::String(raw.clone()))?;
        record.set_named(&field.name, validated)?;
    }
    Ok(record)
}
