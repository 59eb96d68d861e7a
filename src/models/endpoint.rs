use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProxyNode;

/// Protocol served by a local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProtocol {
    Socks5,
    Http,
}

impl EndpointProtocol {
    pub const ALL: [EndpointProtocol; 2] = [EndpointProtocol::Socks5, EndpointProtocol::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointProtocol::Socks5 => "socks5",
            EndpointProtocol::Http => "http",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "socks5" => Some(EndpointProtocol::Socks5),
            "http" => Some(EndpointProtocol::Http),
            _ => None,
        }
    }

    /// Endpoint id for this protocol on the given node
    pub fn endpoint_id(&self, node_uid: &str) -> String {
        format!("{}:{}", node_uid, self.as_str())
    }
}

impl std::fmt::Display for EndpointProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local listening endpoint bound to one node and one protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub id: String,
    pub node_uid: String,
    pub protocol: EndpointProtocol,
    pub host: String,
    pub port: u16,
    pub public_host: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub available: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

impl ProxyEndpoint {
    /// Build a fresh, unavailable endpoint for `node`
    pub fn for_node(
        node: &ProxyNode,
        protocol: EndpointProtocol,
        host: &str,
        port: u16,
        public_host: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: protocol.endpoint_id(&node.uid),
            node_uid: node.uid.clone(),
            protocol,
            host: host.to_string(),
            port,
            public_host: public_host.to_string(),
            country: node.country.clone(),
            country_code: node.country_code.clone(),
            name: node.name.clone(),
            available: false,
            created_at: now,
            updated_at: now,
            last_checked: None,
        }
    }

    /// URI clients connect to, advertised on `public_host`
    pub fn public_endpoint(&self, public_host: &str) -> String {
        format!("{}://{}:{}", self.protocol, public_host, self.port)
    }

    /// URI the relay listens on
    pub fn listen_uri(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}
