//! Raw content readers for subscription and config sources

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::error::{ChainError, Result};

/// Fetches raw content for a source location
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read(&self, location: &str) -> Result<String>;
}

/// Reads local paths, with or without a `file://` prefix
#[derive(Debug, Default, Clone)]
pub struct FileSourceReader;

#[async_trait]
impl SourceReader for FileSourceReader {
    async fn read(&self, location: &str) -> Result<String> {
        let path = location.strip_prefix("file://").unwrap_or(location);
        if path.contains("://") {
            return Err(ChainError::Source(format!(
                "{}: unsupported location scheme",
                location
            )));
        }
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ChainError::Source(format!("{}: {}", location, e)))
    }
}

/// Read an optional local file; a missing file is `None`, other failures are logged
pub async fn read_optional(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), "Failed to read source file: {}", e);
            None
        }
    }
}

/// Subscription locations listed one per line, `#` starting a comment line
pub fn parse_location_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Resolve `location` relative to `base` when it is a bare relative path
pub fn resolve_location(base: Option<&Path>, location: &str) -> String {
    if location.contains("://") {
        return location.to_string();
    }
    let path = PathBuf::from(location);
    match base {
        Some(base) if path.is_relative() => base.join(path).display().to_string(),
        _ => location.to_string(),
    }
}
