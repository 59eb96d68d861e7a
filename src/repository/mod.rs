pub mod document;
pub mod port_registry;

pub use document::{JsonDocumentStore, RecordList, DOCUMENT_VERSION};
pub use port_registry::{PortPair, PortRegistry, PortRegistryDocument, RegistrySnapshot};

use crate::models::{ProxyEndpoint, ProxyNode};

/// Persisted node list
pub type NodeStore = JsonDocumentStore<RecordList<ProxyNode>>;

/// Persisted endpoint list
pub type EndpointStore = JsonDocumentStore<RecordList<ProxyEndpoint>>;
