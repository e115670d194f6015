//! Records in transit between collectors, repositories and the assembler

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record that knows where it belongs in the persisted output
pub trait StreamRecord: Send + 'static {
    /// Relative, `/`-separated location of the record within its domain
    ///
    /// Records sharing an id are written to the same file.
    fn record_id(&self) -> String;
}

/// Chunk of container log output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Pod the container belongs to
    pub pod: String,
    /// Container name
    pub container: String,
    /// Raw log text, lines terminated by `\n`
    pub text: String,
}

impl StreamRecord for LogRecord {
    fn record_id(&self) -> String {
        format!("{}/{}.log", self.pod, self.container)
    }
}

/// One sample of a metric series
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRow {
    /// Series name, also the output file name
    pub metric: String,
    /// Series labels
    pub labels: BTreeMap<String, String>,
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Sample value as reported by the backend
    pub value: String,
}

impl MetricRow {
    /// Labels rendered as `k=v` pairs joined by `;`
    pub fn labels_text(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl StreamRecord for MetricRow {
    fn record_id(&self) -> String {
        format!("{}.csv", self.metric)
    }
}

/// A Kubernetes object ready to be written as YAML
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Location without extension, e.g. `pods/web-0`
    pub path: String,
    /// The (possibly censored) object
    pub body: serde_json::Value,
}

impl StreamRecord for ResourceRecord {
    fn record_id(&self) -> String {
        format!("{}.yaml", self.path)
    }
}

/// Where the bytes of an archive entry come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntrySource {
    /// A persisted file in the work tree
    File(PathBuf),
    /// In-memory content
    Bytes(Vec<u8>),
}

/// One file of a domain, as streamed to the assembler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the domain directory
    pub name: String,
    /// Content of the entry
    pub source: EntrySource,
}

impl StreamRecord for ArchiveEntry {
    fn record_id(&self) -> String {
        self.name.clone()
    }
}
