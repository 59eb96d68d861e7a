use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProxyEndpoint;

/// Cached selection: ordered endpoint ids and their expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub endpoint_ids: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of a selection request
#[derive(Debug, Clone, Serialize)]
pub struct SelectionResult {
    pub endpoints: Vec<ProxyEndpoint>,
    pub cached: bool,
    pub cache_expires_at: Option<DateTime<Utc>>,
}

impl SelectionResult {
    pub fn empty() -> Self {
        Self {
            endpoints: Vec::new(),
            cached: false,
            cache_expires_at: None,
        }
    }
}

/// Summary returned by a refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub nodes: usize,
    pub endpoints: usize,
    pub refreshed_at: DateTime<Utc>,
}

/// Manager snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub nodes: usize,
    pub endpoints: usize,
    pub last_refresh: Option<DateTime<Utc>>,
    pub relay: Value,
}
