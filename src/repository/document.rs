//! JSON document persistence
//!
//! Every document is written to a sibling `.tmp` file and renamed into place,
//! so a crash mid-write leaves the previous snapshot intact. Unparseable files
//! are moved aside to `<name>.invalid` and the caller's default is used.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ChainError, Result};

/// Current version written into every record list
pub const DOCUMENT_VERSION: u32 = 1;

/// Atomically replaced JSON document
pub struct JsonDocumentStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDocumentStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Load the document, falling back to `default` when missing or corrupt
    pub fn load(&self, default: T) -> T {
        let _guard = self.lock.lock();

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Document not found, using default");
                return default;
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read document: {}", e);
                return default;
            }
        };

        match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                let backup = sibling(&self.path, "invalid");
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    "Corrupt document preserved for inspection: {}",
                    e
                );
                if let Err(e) = fs::rename(&self.path, &backup) {
                    warn!("Failed to move corrupt document aside: {}", e);
                }
                default
            }
        }
    }

    /// Serialize without touching the file system
    pub fn encode(&self, document: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(document)?)
    }

    /// Atomically replace the document (write-then-rename)
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = sibling(&self.path, "tmp");
        fs::write(&temp_path, payload).map_err(|e| {
            ChainError::Storage(format!("failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            ChainError::Storage(format!("failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), "Document saved");
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Versioned list of records as stored on disk
///
/// Loading also accepts a bare JSON array, the layout written before documents
/// carried a version; a missing `version` field is read as the current one.
/// Records are decoded one by one and a record that no longer parses is
/// dropped with a warning instead of failing the whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredRecords")]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
pub struct RecordList<R> {
    pub version: u32,
    pub records: Vec<R>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecords {
    Versioned {
        #[serde(default = "default_version")]
        version: u32,
        records: Vec<Value>,
    },
    Legacy(Vec<Value>),
}

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

impl<R: DeserializeOwned> From<StoredRecords> for RecordList<R> {
    fn from(stored: StoredRecords) -> Self {
        let (version, raw) = match stored {
            StoredRecords::Versioned { version, records } => (version, records),
            StoredRecords::Legacy(records) => (DOCUMENT_VERSION, records),
        };

        let total = raw.len();
        let records: Vec<R> = raw
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(index, "Skipping unreadable stored record: {}", e);
                    None
                }
            })
            .collect();
        if records.len() < total {
            warn!(
                kept = records.len(),
                dropped = total - records.len(),
                "Stored records partially recovered"
            );
        }

        Self { version, records }
    }
}

impl<R> RecordList<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            records,
        }
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

impl<R> Default for RecordList<R> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
