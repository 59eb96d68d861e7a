//! Node Normalizer
//!
//! Turns heterogeneous upstream descriptions into canonical, de-duplicated
//! [`ProxyNode`]s. Three source kinds are consulted in priority order: the
//! structured proxy list file, the forward-directive file, then every location
//! named in the subscriptions file. The first kind that yields at least one
//! node supplies the whole set.

pub mod country;
pub mod forward;
pub mod source;
pub mod structured;
pub mod subscription;

pub use country::{derive_country, matches_country, CountryGuess};
pub use source::{FileSourceReader, SourceReader};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::Result;
use crate::models::ProxyNode;
use subscription::SubscriptionFormat;

/// Ciphers accepted for `ss` backends
pub const SUPPORTED_SS_CIPHERS: &[&str] = &[
    "aes-128-gcm",
    "aes-192-gcm",
    "aes-256-gcm",
    "chacha20-ietf-poly1305",
    "xchacha20-ietf-poly1305",
    "aes-128-ctr",
    "aes-192-ctr",
    "aes-256-ctr",
    "aes-128-cfb",
    "aes-192-cfb",
    "aes-256-cfb",
    "chacha20-ietf",
];

pub fn is_supported_cipher(cipher: &str) -> bool {
    let cipher = cipher.trim().to_lowercase();
    SUPPORTED_SS_CIPHERS.contains(&cipher.as_str())
}

/// Insertion-ordered node collection keyed by uid; first occurrence wins
#[derive(Debug, Default)]
pub struct NodeSet {
    nodes: Vec<ProxyNode>,
    seen: HashSet<String>,
}

impl NodeSet {
    /// Add `node` unless its uid is already present
    pub fn insert(&mut self, node: ProxyNode) -> bool {
        if !self.seen.insert(node.uid.clone()) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = ProxyNode>) {
        for node in nodes {
            self.insert(node);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_vec(self) -> Vec<ProxyNode> {
        self.nodes
    }
}

/// Supplies the current upstream node set to the manager
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ProxyNode>>;
}

/// Normalize subscription content of either format into nodes
pub fn nodes_from_subscription(content: &str, source: &str) -> Vec<ProxyNode> {
    match subscription::detect_format(content) {
        SubscriptionFormat::Yaml => match structured::parse_structured(content, source) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(source, "Skipping subscription: {}", e);
                Vec::new()
            }
        },
        SubscriptionFormat::Text => {
            let uris = subscription::parse_subscription_text(content);
            forward::nodes_from_uris(uris, source)
        }
    }
}

/// Loads nodes from the configured source files
pub struct NodeLoader {
    sources: SourceConfig,
    reader: Arc<dyn SourceReader>,
}

impl NodeLoader {
    pub fn new(sources: SourceConfig, reader: Arc<dyn SourceReader>) -> Self {
        Self { sources, reader }
    }

    async fn load_structured(&self) -> Vec<ProxyNode> {
        let path = &self.sources.clash_file;
        let Some(content) = source::read_optional(path).await else {
            return Vec::new();
        };
        match structured::parse_structured(&content, "clash") {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(path = %path.display(), "Ignoring structured proxy list: {}", e);
                Vec::new()
            }
        }
    }

    async fn load_forward(&self) -> Vec<ProxyNode> {
        let Some(content) = source::read_optional(&self.sources.forward_config_file).await else {
            return Vec::new();
        };
        let uris = forward::parse_forward_directives(&content);
        forward::nodes_from_uris(uris, "forward")
    }

    async fn load_subscriptions(&self) -> Vec<ProxyNode> {
        let list_path = &self.sources.subscriptions_file;
        let Some(list) = source::read_optional(list_path).await else {
            return Vec::new();
        };
        let base = list_path.parent().filter(|p| !p.as_os_str().is_empty());
        let locations: Vec<String> = source::parse_location_list(&list)
            .iter()
            .map(|location| source::resolve_location(base, location))
            .collect();
        if locations.is_empty() {
            return Vec::new();
        }

        let contents =
            futures::future::join_all(locations.iter().map(|location| self.reader.read(location)))
                .await;

        let mut nodes = NodeSet::default();
        let mut failed = 0usize;
        for (location, content) in locations.iter().zip(contents) {
            match content {
                Ok(content) => {
                    let parsed = nodes_from_subscription(&content, "subscription");
                    if parsed.is_empty() {
                        warn!(location = %location, "Subscription yielded no usable entries");
                        failed += 1;
                    } else {
                        debug!(location = %location, nodes = parsed.len(), "Subscription loaded");
                        nodes.extend(parsed);
                    }
                }
                Err(e) => {
                    warn!(location = %location, "Subscription unavailable: {}", e);
                    failed += 1;
                }
            }
        }

        info!(
            locations = locations.len(),
            failed,
            nodes = nodes.len(),
            "Subscriptions processed"
        );
        nodes.into_vec()
    }
}

#[async_trait]
impl NodeSource for NodeLoader {
    async fn load(&self) -> Result<Vec<ProxyNode>> {
        let nodes = self.load_structured().await;
        if !nodes.is_empty() {
            info!(nodes = nodes.len(), "Loaded nodes from structured proxy list");
            return Ok(nodes);
        }

        let nodes = self.load_forward().await;
        if !nodes.is_empty() {
            info!(nodes = nodes.len(), "Loaded nodes from forward directives");
            return Ok(nodes);
        }

        let nodes = self.load_subscriptions().await;
        if nodes.is_empty() {
            warn!("No upstream nodes found in any source");
        }
        Ok(nodes)
    }
}
