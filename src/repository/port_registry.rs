//! Persistent local port allocation
//!
//! Each node owns one socks5 port and one http port. Two "next candidate"
//! counters advance monotonically; released ports can be reused by a later
//! scan but the counters are never rewound, so long-lived deployments with
//! heavy node churn slowly walk upward through the port space.
//!
//! Loading is lenient: missing counters start from the configured base ports
//! and a malformed reservation is dropped on its own, keeping the rest.

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::document::{JsonDocumentStore, DOCUMENT_VERSION};
use crate::error::{ChainError, Result};
use crate::models::EndpointProtocol;

/// Ports reserved for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    #[serde(rename = "socks")]
    pub socks_port: u16,
    #[serde(rename = "http")]
    pub http_port: u16,
}

impl PortPair {
    pub fn port_for(&self, protocol: EndpointProtocol) -> u16 {
        match protocol {
            EndpointProtocol::Socks5 => self.socks_port,
            EndpointProtocol::Http => self.http_port,
        }
    }
}

/// Persisted registry layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRegistryDocument {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub next_socks: Option<u32>,
    #[serde(default)]
    pub next_http: Option<u32>,
    #[serde(default, deserialize_with = "readable_entries")]
    pub entries: BTreeMap<String, PortPair>,
}

impl Default for PortRegistryDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            next_socks: None,
            next_http: None,
            entries: BTreeMap::new(),
        }
    }
}

fn current_version() -> u32 {
    DOCUMENT_VERSION
}

fn readable_entries<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, PortPair>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(node_id, value)| match serde_json::from_value::<PortPair>(value) {
            Ok(pair) => Some((node_id, pair)),
            Err(e) => {
                warn!(node_id = %node_id, "Dropping unreadable port reservation: {}", e);
                None
            }
        })
        .collect())
}

/// In-memory registry contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub next_socks: u32,
    pub next_http: u32,
    pub entries: BTreeMap<String, PortPair>,
}

impl RegistrySnapshot {
    fn from_document(document: PortRegistryDocument, start_socks: u16, start_http: u16) -> Self {
        Self {
            next_socks: document.next_socks.unwrap_or(start_socks as u32),
            next_http: document.next_http.unwrap_or(start_http as u32),
            entries: document.entries,
        }
    }

    fn to_document(&self) -> PortRegistryDocument {
        PortRegistryDocument {
            version: DOCUMENT_VERSION,
            next_socks: Some(self.next_socks),
            next_http: Some(self.next_http),
            entries: self.entries.clone(),
        }
    }
}

struct RegistryState {
    registry: RegistrySnapshot,
    dirty: bool,
}

/// Registry of node -> port pair reservations
pub struct PortRegistry {
    store: JsonDocumentStore<PortRegistryDocument>,
    state: Mutex<RegistryState>,
}

impl PortRegistry {
    /// Load persisted reservations, seeding absent counters from the base ports
    pub fn open(
        store: JsonDocumentStore<PortRegistryDocument>,
        start_socks_port: u16,
        start_http_port: u16,
    ) -> Self {
        let registry = RegistrySnapshot::from_document(
            store.load(PortRegistryDocument::default()),
            start_socks_port,
            start_http_port,
        );
        info!(
            entries = registry.entries.len(),
            next_socks = registry.next_socks,
            next_http = registry.next_http,
            "Port registry loaded"
        );

        Self {
            store,
            state: Mutex::new(RegistryState {
                registry,
                dirty: false,
            }),
        }
    }

    /// Return the node's port pair, allocating one on first use
    pub fn assign(&self, node_id: &str) -> Result<PortPair> {
        let mut state = self.state.lock();
        if let Some(pair) = state.registry.entries.get(node_id) {
            return Ok(*pair);
        }

        let registry = &mut state.registry;
        let used_socks: HashSet<u16> = registry.entries.values().map(|p| p.socks_port).collect();
        let used_http: HashSet<u16> = registry.entries.values().map(|p| p.http_port).collect();

        let socks_port = next_free(&mut registry.next_socks, &used_socks, EndpointProtocol::Socks5)?;
        let http_port = next_free(&mut registry.next_http, &used_http, EndpointProtocol::Http)?;

        let pair = PortPair {
            socks_port,
            http_port,
        };
        registry.entries.insert(node_id.to_string(), pair);
        state.dirty = true;

        debug!(node_id, socks_port, http_port, "Allocated ports");
        Ok(pair)
    }

    /// Drop the node's reservation; the counters stay where they are
    pub fn release(&self, node_id: &str) {
        let mut state = self.state.lock();
        if state.registry.entries.remove(node_id).is_some() {
            state.dirty = true;
            debug!(node_id, "Released ports");
        }
    }

    /// Encoded document when there are unsaved changes
    pub fn encode_pending(&self) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        if !state.dirty {
            return Ok(None);
        }
        self.store.encode(&state.registry.to_document()).map(Some)
    }

    /// Write a payload from `encode_pending` and mark the registry clean
    pub fn write_pending(&self, payload: &[u8]) -> Result<()> {
        self.store.write(payload)?;
        self.state.lock().dirty = false;
        Ok(())
    }

    /// Current registry contents
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state.lock().registry.clone()
    }

    /// Replace the in-memory registry, e.g. to undo a failed refresh
    pub fn restore(&self, snapshot: RegistrySnapshot) {
        let mut state = self.state.lock();
        if state.registry != snapshot {
            state.registry = snapshot;
            state.dirty = true;
        }
    }

    pub fn get(&self, node_id: &str) -> Option<PortPair> {
        self.state.lock().registry.entries.get(node_id).copied()
    }
}

fn next_free(next: &mut u32, used: &HashSet<u16>, family: EndpointProtocol) -> Result<u16> {
    let mut candidate = *next;
    loop {
        let port = u16::try_from(candidate).map_err(|_| ChainError::PortsExhausted {
            family: family.to_string(),
        })?;
        if !used.contains(&port) {
            *next = candidate + 1;
            return Ok(port);
        }
        candidate += 1;
    }
}
