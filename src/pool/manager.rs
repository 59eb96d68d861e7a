//! Proxy manager: endpoint reconciliation and selection
//!
//! A refresh runs behind `refresh_gate`, so at most one reconciliation is in
//! flight. The live maps sit behind a separate `state` lock that a refresh only
//! takes to snapshot the previous set and, once the documents are on disk, to
//! swap in the new one. Selection therefore never waits on relay probes or file
//! writes and always sees either the complete old or the complete new set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::cache::{SelectionCache, SelectionKey};
use super::relay::RelaySupervisor;
use crate::config::{Config, PoolConfig, RelayConfig};
use crate::error::Result;
use crate::models::{
    EndpointProtocol, ManagerStatus, ProxyEndpoint, ProxyNode, RefreshSummary, SelectionResult,
};
use crate::normalizer::{matches_country, NodeSet, NodeSource};
use crate::repository::{
    EndpointStore, JsonDocumentStore, NodeStore, PortRegistry, RecordList,
};

#[derive(Default)]
struct ManagerState {
    nodes: HashMap<String, ProxyNode>,
    endpoints: HashMap<String, ProxyEndpoint>,
    /// Last time each endpoint was handed out by a non-random selection
    usage: HashMap<String, DateTime<Utc>>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Owns the live node and endpoint sets
pub struct ProxyManager {
    pool: PoolConfig,
    relay: RelayConfig,
    source: Arc<dyn NodeSource>,
    relays: Arc<dyn RelaySupervisor>,
    node_store: NodeStore,
    endpoint_store: EndpointStore,
    ports: PortRegistry,
    cache: SelectionCache,
    state: Mutex<ManagerState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl ProxyManager {
    /// Build the manager and load the last persisted node and endpoint sets
    pub fn new(
        config: &Config,
        source: Arc<dyn NodeSource>,
        relays: Arc<dyn RelaySupervisor>,
    ) -> Self {
        let storage = &config.storage;
        let node_store: NodeStore = JsonDocumentStore::new(storage.nodes_file());
        let endpoint_store: EndpointStore = JsonDocumentStore::new(storage.endpoints_file());
        let ports = PortRegistry::open(
            JsonDocumentStore::new(storage.port_registry_file()),
            config.pool.base_socks_port,
            config.pool.base_http_port,
        );

        let nodes: HashMap<String, ProxyNode> = node_store
            .load(RecordList::default())
            .into_records()
            .into_iter()
            .map(|node| (node.uid.clone(), node))
            .collect();
        let endpoints: HashMap<String, ProxyEndpoint> = endpoint_store
            .load(RecordList::default())
            .into_records()
            .into_iter()
            .map(|endpoint| (endpoint.id.clone(), endpoint))
            .collect();
        info!(
            nodes = nodes.len(),
            endpoints = endpoints.len(),
            "Loaded persisted proxy state"
        );

        Self {
            pool: config.pool.clone(),
            relay: config.relay.clone(),
            source,
            relays,
            node_store,
            endpoint_store,
            ports,
            cache: SelectionCache::new(config.pool.cache_ttl_seconds),
            state: Mutex::new(ManagerState {
                nodes,
                endpoints,
                ..ManagerState::default()
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Reload upstream nodes and rebuild the endpoint set
    ///
    /// On failure the previous live state stays authoritative and port
    /// reservations are rolled back to what they were before the call.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let _gate = self.refresh_gate.lock().await;
        info!("Refreshing proxy nodes");

        let mut fresh = NodeSet::default();
        fresh.extend(self.source.load().await?);
        let mut fresh = fresh.into_vec();
        let max = self.pool.max_endpoints;
        if max > 0 && fresh.len() > max {
            warn!(max, received = fresh.len(), "Limiting nodes to configured maximum");
            fresh.truncate(max);
        }

        let registry_snapshot = self.ports.snapshot();
        match self.reconcile(fresh).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("Refresh failed, keeping previous state: {}", e);
                self.ports.restore(registry_snapshot);
                Err(e)
            }
        }
    }

    async fn reconcile(&self, fresh: Vec<ProxyNode>) -> Result<RefreshSummary> {
        let now = Utc::now();
        let (previous_nodes, previous_endpoints) = {
            let state = self.state.lock();
            (state.nodes.clone(), state.endpoints.clone())
        };

        let nodes: Vec<ProxyNode> = fresh
            .into_iter()
            .map(|mut node| {
                node.created_at = previous_nodes
                    .get(&node.uid)
                    .map(|existing| existing.created_at)
                    .unwrap_or(now);
                node.updated_at = now;
                node
            })
            .collect();

        let fresh_ids: HashSet<&str> = nodes.iter().map(|node| node.uid.as_str()).collect();
        for uid in previous_nodes.keys() {
            if !fresh_ids.contains(uid.as_str()) {
                self.ports.release(uid);
            }
        }

        let mut endpoints = Vec::with_capacity(nodes.len() * self.pool.enabled_protocols.len());
        for node in &nodes {
            let ports = self.ports.assign(&node.uid)?;
            for protocol in EndpointProtocol::ALL {
                if !self.pool.supports(protocol) {
                    continue;
                }
                let mut endpoint = ProxyEndpoint::for_node(
                    node,
                    protocol,
                    &self.pool.listen_host,
                    ports.port_for(protocol),
                    &self.pool.public_host,
                    now,
                );
                if let Some(existing) = previous_endpoints.get(&endpoint.id) {
                    endpoint.created_at = existing.created_at;
                    endpoint.available = existing.available;
                    endpoint.last_checked = existing.last_checked;
                }
                endpoints.push(endpoint);
            }
        }

        self.sync_relays(&nodes, &mut endpoints, now).await;
        self.commit(nodes, endpoints, now)
    }

    async fn sync_relays(
        &self,
        nodes: &[ProxyNode],
        endpoints: &mut [ProxyEndpoint],
        now: DateTime<Utc>,
    ) {
        if !self.relay.enabled {
            self.relays.stop_all().await;
            for endpoint in endpoints.iter_mut() {
                endpoint.available = false;
                endpoint.updated_at = now;
            }
            return;
        }

        let backends: HashMap<&str, &str> = nodes
            .iter()
            .map(|node| (node.uid.as_str(), node.backend_uri.as_str()))
            .collect();
        let jobs: Vec<(usize, ProxyEndpoint, String)> = endpoints
            .iter()
            .enumerate()
            .filter_map(|(idx, endpoint)| {
                backends
                    .get(endpoint.node_uid.as_str())
                    .map(|backend| (idx, endpoint.clone(), backend.to_string()))
            })
            .collect();

        let probes: Vec<(usize, bool)> = stream::iter(jobs)
            .map(|(idx, endpoint, backend)| {
                let relays = Arc::clone(&self.relays);
                async move { (idx, relays.ensure(&endpoint, &backend).await) }
            })
            .buffer_unordered(self.relay.workers.max(1))
            .collect()
            .await;

        let mut dead = 0usize;
        for (idx, alive) in probes {
            let endpoint = &mut endpoints[idx];
            endpoint.available = alive;
            endpoint.updated_at = now;
            if alive {
                endpoint.last_checked = Some(now);
            } else {
                dead += 1;
            }
        }
        if dead > 0 {
            warn!(dead, total = endpoints.len(), "Some relays are not running");
        }

        let active: HashSet<String> = endpoints.iter().map(|e| e.id.clone()).collect();
        self.relays.cleanup(&active).await;
    }

    /// Persist the new sets, then swap them in and drop cached selections
    fn commit(
        &self,
        nodes: Vec<ProxyNode>,
        endpoints: Vec<ProxyEndpoint>,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary> {
        let node_doc = RecordList::new(nodes);
        let endpoint_doc = RecordList::new(endpoints);
        self.persist(&node_doc, &endpoint_doc)?;

        let nodes: HashMap<String, ProxyNode> = node_doc
            .into_records()
            .into_iter()
            .map(|node| (node.uid.clone(), node))
            .collect();
        let endpoints: HashMap<String, ProxyEndpoint> = endpoint_doc
            .into_records()
            .into_iter()
            .map(|endpoint| (endpoint.id.clone(), endpoint))
            .collect();
        let summary = RefreshSummary {
            nodes: nodes.len(),
            endpoints: endpoints.len(),
            refreshed_at: now,
        };

        {
            let mut state = self.state.lock();
            state.usage.retain(|id, _| endpoints.contains_key(id));
            state.nodes = nodes;
            state.endpoints = endpoints;
            state.last_refresh = Some(now);
            self.cache.clear();
        }

        info!(
            nodes = summary.nodes,
            endpoints = summary.endpoints,
            "Refresh completed"
        );
        Ok(summary)
    }

    /// Write the three documents once every payload has been encoded
    ///
    /// Each write is atomic on its own but the set is not: if a later write
    /// fails, files already renamed stay newer than the live state until the
    /// next successful refresh rewrites them.
    fn persist(
        &self,
        nodes: &RecordList<ProxyNode>,
        endpoints: &RecordList<ProxyEndpoint>,
    ) -> Result<()> {
        let node_payload = self.node_store.encode(nodes)?;
        let endpoint_payload = self.endpoint_store.encode(endpoints)?;
        let registry_payload = self.ports.encode_pending()?;

        self.node_store.write(&node_payload)?;
        self.endpoint_store.write(&endpoint_payload)?;
        if let Some(payload) = registry_payload {
            self.ports.write_pending(&payload)?;
        }
        Ok(())
    }

    /// Pick up to `count` endpoints (all when `count <= 0`)
    ///
    /// Non-random selections rotate least-recently-used first and are cached
    /// per parameter set; random selections bypass both.
    pub fn select(
        &self,
        protocols: &[EndpointProtocol],
        country: Option<&str>,
        count: i64,
        randomize: bool,
    ) -> SelectionResult {
        let protocols: Vec<EndpointProtocol> = if protocols.is_empty() {
            self.pool.enabled_protocols.clone()
        } else {
            protocols.to_vec()
        };
        let country = country.map(str::trim).filter(|c| !c.is_empty());
        let key = SelectionKey::new(&protocols, country, count);

        let mut guard = self.state.lock();
        let ManagerState {
            endpoints, usage, ..
        } = &mut *guard;

        if !randomize {
            if let Some(entry) = self.cache.get(&key) {
                let cached: Option<Vec<ProxyEndpoint>> = entry
                    .endpoint_ids
                    .iter()
                    .map(|id| endpoints.get(id).cloned())
                    .collect();
                if let Some(cached) = cached.filter(|c| !c.is_empty()) {
                    debug!(count = cached.len(), "Serving cached selection");
                    return SelectionResult {
                        endpoints: cached,
                        cached: true,
                        cache_expires_at: Some(entry.expires_at),
                    };
                }
            }
        }

        let mut candidates: Vec<&ProxyEndpoint> = endpoints
            .values()
            .filter(|endpoint| protocols.contains(&endpoint.protocol))
            .filter(|endpoint| {
                country.is_none()
                    || matches_country(
                        country,
                        endpoint.country.as_deref(),
                        endpoint.country_code.as_deref(),
                    )
            })
            .collect();

        if candidates.is_empty() {
            if !randomize {
                self.cache.invalidate(&key);
            }
            return SelectionResult::empty();
        }

        let take = if count > 0 {
            usize::try_from(count).unwrap_or(usize::MAX)
        } else {
            candidates.len()
        };

        if randomize {
            candidates.shuffle(&mut rand::thread_rng());
            candidates.truncate(take);
            return SelectionResult {
                endpoints: candidates.into_iter().cloned().collect(),
                cached: false,
                cache_expires_at: None,
            };
        }

        candidates.sort_by(|a, b| {
            usage
                .get(&a.id)
                .cmp(&usage.get(&b.id))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(take);
        let selected: Vec<ProxyEndpoint> = candidates.into_iter().cloned().collect();

        let now = Utc::now();
        for endpoint in &selected {
            usage.insert(endpoint.id.clone(), now);
        }
        let entry = self
            .cache
            .set(key, selected.iter().map(|e| e.id.clone()).collect());

        SelectionResult {
            endpoints: selected,
            cached: false,
            cache_expires_at: Some(entry.expires_at),
        }
    }

    pub fn get_node(&self, uid: &str) -> Option<ProxyNode> {
        self.state.lock().nodes.get(uid).cloned()
    }

    pub fn status(&self) -> ManagerStatus {
        let state = self.state.lock();
        ManagerStatus {
            nodes: state.nodes.len(),
            endpoints: state.endpoints.len(),
            last_refresh: state.last_refresh,
            relay: if self.relay.enabled {
                self.relays.status()
            } else {
                json!({})
            },
        }
    }

    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_refresh
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }

    /// Stop every managed relay
    pub async fn shutdown(&self) {
        info!("Shutting down proxy manager");
        self.relays.stop_all().await;
    }
}
