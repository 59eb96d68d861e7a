//! Selection cache
//!
//! TTL-keyed cache of endpoint-id lists. Expiry is lazy: an expired entry is
//! removed by the `get` that finds it, there is no background sweeper.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::models::{CacheEntry, EndpointProtocol};

/// Composite cache key: protocol set, country filter and requested count
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionKey {
    protocols: Vec<EndpointProtocol>,
    country: Option<String>,
    count: i64,
}

impl SelectionKey {
    /// Protocols are sorted and de-duplicated, the country lowercased
    pub fn new(protocols: &[EndpointProtocol], country: Option<&str>, count: i64) -> Self {
        let mut protocols = protocols.to_vec();
        protocols.sort();
        protocols.dedup();
        let country = country
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());
        Self {
            protocols,
            country,
            count,
        }
    }
}

/// Upper bound keeping `now + ttl` representable
const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

pub struct SelectionCache {
    ttl: Duration,
    entries: Mutex<HashMap<SelectionKey, CacheEntry>>,
}

impl SelectionCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &SelectionKey) -> Option<CacheEntry> {
        self.get_at(key, Utc::now())
    }

    pub(crate) fn get_at(&self, key: &SelectionKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Store `endpoint_ids` under `key` and return the new entry
    pub fn set(&self, key: SelectionKey, endpoint_ids: Vec<String>) -> CacheEntry {
        self.set_at(key, endpoint_ids, Utc::now())
    }

    pub(crate) fn set_at(
        &self,
        key: SelectionKey,
        endpoint_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let entry = CacheEntry {
            endpoint_ids,
            expires_at: now + self.ttl,
        };
        self.entries.lock().insert(key, entry.clone());
        entry
    }

    pub fn invalidate(&self, key: &SelectionKey) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
