use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Upstream backend protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSchema {
    Ss,
    Vmess,
}

impl BackendSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendSchema::Ss => "ss",
            BackendSchema::Vmess => "vmess",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ss" => Some(BackendSchema::Ss),
            "vmess" => Some(BackendSchema::Vmess),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive the stable node identifier from a backend URI
pub fn node_uid(backend_uri: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(backend_uri.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Upstream proxy backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyNode {
    pub uid: String,
    pub backend_uri: String,
    pub schema: BackendSchema,
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
    /// Original description, passed through untouched
    #[serde(default)]
    pub raw: Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_source() -> String {
    "unknown".to_string()
}

impl ProxyNode {
    /// Build a node whose uid is derived from `backend_uri`
    pub fn new(
        backend_uri: impl Into<String>,
        schema: BackendSchema,
        server: impl Into<String>,
        port: u16,
        source: impl Into<String>,
    ) -> Self {
        let backend_uri = backend_uri.into();
        let now = Utc::now();
        Self {
            uid: node_uid(&backend_uri),
            backend_uri,
            schema,
            server: server.into(),
            port,
            country: None,
            country_code: None,
            name: None,
            source: source.into(),
            raw: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_country(mut self, country: (Option<String>, Option<String>)) -> Self {
        self.country = country.0;
        self.country_code = country.1;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }
}
