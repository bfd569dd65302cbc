//! Append-only query and click logs, written off the request path.
//!
//! Each pipeline owns one JSON-lines file. Records are handed to a dedicated
//! writer thread over a bounded channel, so logging never blocks or fails a
//! response. A full queue or a failed write is reported through `tracing` and
//! the record is dropped.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Which pipeline a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    /// Free-text search.
    Search,
    /// Related-article lookups.
    Related,
}

impl LogStream {
    /// File name inside the log directory.
    pub fn file_name(self) -> &'static str {
        match self {
            LogStream::Search => "search.log",
            LogStream::Related => "related.log",
        }
    }
}

/// Client feedback that a result was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    /// Identifier returned with the response that contained the result.
    pub query_id: Uuid,
    /// Identifier of the clicked result.
    pub result_id: String,
    /// Zero-based rank of the result in that response.
    pub position: usize,
}

/// One line in a log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    /// A served query and the response it produced.
    Query {
        /// Fresh identifier for this response.
        query_id: Uuid,
        /// Query text, or the source uid for related lookups.
        query: String,
        /// Facets sent with a search, recorded but not applied.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        facets: Vec<String>,
        /// Requested page, for paginated lookups.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_number: Option<usize>,
        /// Client address as seen by the server.
        request_ip: Option<String>,
        /// When the response was produced.
        timestamp: DateTime<Utc>,
        /// Snapshot of the response body.
        response: serde_json::Value,
    },
    /// A click on a previously served result.
    Clicked {
        /// Correlates with a prior `Query` record.
        query_id: Uuid,
        /// Identifier of the clicked result.
        result_id: String,
        /// Zero-based rank of the result.
        position: usize,
        /// When the click was reported.
        timestamp: DateTime<Utc>,
    },
}

type Entry = (LogStream, LogRecord);

/// Records buffered ahead of the writer before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Cheap-to-clone handle for emitting log records.
#[derive(Clone)]
pub struct QueryLogger {
    tx: Option<mpsc::Sender<Entry>>,
}

impl QueryLogger {
    /// Starts the writer thread appending under `dir`.
    ///
    /// The returned handle completes once every logger clone has been dropped
    /// and all queued records are written.
    pub fn spawn(dir: impl Into<PathBuf>) -> Result<(Self, JoinHandle<()>)> {
        Self::spawn_with_capacity(dir, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`QueryLogger::spawn`], queueing at most `capacity` records.
    pub fn spawn_with_capacity(
        dir: impl Into<PathBuf>,
        capacity: usize,
    ) -> Result<(Self, JoinHandle<()>)> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {:?}", dir))?;
        let (tx, mut rx) = mpsc::channel::<Entry>(capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || {
            let mut writer = LogWriter::new(dir);
            while let Some((stream, record)) = rx.blocking_recv() {
                if let Err(err) = writer.append(stream, &record) {
                    warn!(stream = stream.file_name(), error = %format!("{err:#}"), "dropping log record");
                }
            }
        });
        Ok((Self { tx: Some(tx) }, handle))
    }

    /// Logger that discards every record.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Records a served query with a snapshot of its response.
    pub fn log_query<R: Serialize>(
        &self,
        stream: LogStream,
        query_id: Uuid,
        query: &str,
        facets: &[String],
        page_number: Option<usize>,
        request_ip: Option<String>,
        response: &R,
    ) {
        if self.tx.is_none() {
            return;
        }
        let response = serde_json::to_value(response).unwrap_or_else(|err| {
            warn!(error = %err, "failed to snapshot response for query log");
            serde_json::Value::Null
        });
        self.send(
            stream,
            LogRecord::Query {
                query_id,
                query: query.to_string(),
                facets: facets.to_vec(),
                page_number,
                request_ip,
                timestamp: Utc::now(),
                response,
            },
        );
    }

    /// Records a click event.
    pub fn log_click(&self, stream: LogStream, event: ClickEvent) {
        self.send(
            stream,
            LogRecord::Clicked {
                query_id: event.query_id,
                result_id: event.result_id,
                position: event.position,
                timestamp: Utc::now(),
            },
        );
    }

    fn send(&self, stream: LogStream, record: LogRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send((stream, record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(stream = stream.file_name(), "log queue full; dropping record");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(stream = stream.file_name(), "log writer stopped; dropping record");
            }
        }
    }
}

struct LogWriter {
    dir: PathBuf,
    files: HashMap<LogStream, File>,
}

impl LogWriter {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: HashMap::new(),
        }
    }

    fn append(&mut self, stream: LogStream, record: &LogRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let file = match self.files.get_mut(&stream) {
            Some(file) => file,
            None => {
                let file = open_append(&self.dir.join(stream.file_name()))?;
                self.files.entry(stream).or_insert(file)
            }
        };
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log {:?}", path))
}
