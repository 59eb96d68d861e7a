//! Proxy selection and node lookup handlers

use std::net::IpAddr;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::api::server::AppState;
use crate::config::parse_bool;
use crate::error::ChainError;
use crate::models::{BackendSchema, EndpointProtocol, ProxyEndpoint, ProxyNode};

const MAX_COUNT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct CountryInfo {
    pub name: Option<String>,
    pub code: Option<String>,
}

/// One selected endpoint as returned to clients
#[derive(Debug, Serialize)]
pub struct ProxyItem {
    pub id: String,
    pub protocol: EndpointProtocol,
    pub host: String,
    pub port: u16,
    pub public_host: String,
    pub endpoint: String,
    pub country: Option<CountryInfo>,
    pub name: Option<String>,
    pub available: bool,
    pub node_id: String,
    pub backend_schema: Option<BackendSchema>,
    pub backend_server: Option<String>,
    pub backend_port: Option<u16>,
    pub updated_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl ProxyItem {
    fn new(endpoint: ProxyEndpoint, node: Option<&ProxyNode>, public_host: String) -> Self {
        let country = (endpoint.country.is_some() || endpoint.country_code.is_some()).then(|| {
            CountryInfo {
                name: endpoint.country.clone(),
                code: endpoint.country_code.clone(),
            }
        });
        Self {
            endpoint: endpoint.public_endpoint(&public_host),
            id: endpoint.id,
            protocol: endpoint.protocol,
            host: endpoint.host,
            port: endpoint.port,
            public_host,
            country,
            name: endpoint.name,
            available: endpoint.available,
            node_id: endpoint.node_uid,
            backend_schema: node.map(|n| n.schema),
            backend_server: node.map(|n| n.server.clone()),
            backend_port: node.map(|n| n.port),
            updated_at: endpoint.updated_at,
            last_checked: endpoint.last_checked,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProxyListMeta {
    pub requested_count: i64,
    pub returned_count: usize,
    pub cached: bool,
    pub cache_expires_at: Option<DateTime<Utc>>,
    pub random: bool,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ProxyListResponse {
    pub data: Vec<ProxyItem>,
    pub meta: ProxyListMeta,
}

/// Parsed `/proxies` query string
#[derive(Debug, PartialEq)]
pub struct ProxyQuery {
    pub protocols: Vec<EndpointProtocol>,
    pub country: Option<String>,
    pub count: i64,
    pub random: bool,
}

impl ProxyQuery {
    /// `protocols` may repeat and each value may hold a comma separated list
    pub fn parse(raw: Option<&str>) -> Result<Self, ChainError> {
        let mut protocol_values = Vec::new();
        let mut country = None;
        let mut count = 1;
        let mut random = false;

        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "protocols" => protocol_values.push(value.into_owned()),
                "country" => {
                    country = Some(value.trim().to_string()).filter(|c| !c.is_empty());
                }
                "count" => {
                    count = value.trim().parse::<i64>().map_err(|_| {
                        ChainError::InvalidRequest("count must be an integer".to_string())
                    })?;
                }
                "random" => random = parse_bool(Some(value.as_ref()), false),
                _ => {}
            }
        }

        if !(1..=MAX_COUNT).contains(&count) {
            return Err(ChainError::InvalidRequest(format!(
                "count must be between 1 and {}",
                MAX_COUNT
            )));
        }

        Ok(Self {
            protocols: parse_protocols_param(&protocol_values)?,
            country,
            count,
            random,
        })
    }
}

/// Split, trim and lowercase protocol values; unknown names are rejected
pub fn parse_protocols_param(values: &[String]) -> Result<Vec<EndpointProtocol>, ChainError> {
    let mut protocols = Vec::new();
    for item in values
        .iter()
        .flat_map(|value| value.split(','))
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
    {
        let protocol = EndpointProtocol::from_str(&item).ok_or_else(|| {
            ChainError::InvalidRequest(format!("unsupported protocol: {}", item))
        })?;
        if !protocols.contains(&protocol) {
            protocols.push(protocol);
        }
    }
    Ok(protocols)
}

fn strip_port(host: &str) -> &str {
    let value = host.trim();
    if let Some(rest) = value.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match value.rsplit_once(':') {
        Some((name, port))
            if !name.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => value,
    }
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return false;
    }
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
        Err(_) => false,
    }
}

/// Host advertised to the caller
///
/// A configured non-loopback host always wins. Otherwise the request's
/// `X-Forwarded-Host`, then `Host` header is used when it names a reachable host.
pub fn resolve_public_host(headers: &HeaderMap, fallback: &str) -> String {
    if !fallback.is_empty() && !is_loopback(fallback) {
        return fallback.to_string();
    }

    ["x-forwarded-host", "host"]
        .iter()
        .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .filter_map(|raw| raw.split(',').next())
        .map(strip_port)
        .find(|candidate| !candidate.is_empty() && !is_loopback(candidate))
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Select endpoints
pub async fn list_proxies(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Result<impl IntoResponse, ChainError> {
    let query = ProxyQuery::parse(raw.as_deref())?;
    let manager = &state.manager;

    let selection = manager.select(
        &query.protocols,
        query.country.as_deref(),
        query.count,
        query.random,
    );

    let cached = selection.cached;
    let cache_expires_at = selection.cache_expires_at;
    let data: Vec<ProxyItem> = selection
        .endpoints
        .into_iter()
        .map(|endpoint| {
            let node = manager.get_node(&endpoint.node_uid);
            let public_host = resolve_public_host(&headers, &endpoint.public_host);
            ProxyItem::new(endpoint, node.as_ref(), public_host)
        })
        .collect();

    let meta = ProxyListMeta {
        requested_count: query.count,
        returned_count: data.len(),
        cached,
        cache_expires_at,
        random: query.random,
        refreshed_at: manager.last_refresh_at(),
    };

    Ok(Json(ProxyListResponse { data, meta }))
}

/// Run a refresh and report its summary
pub async fn refresh_proxies(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ChainError> {
    let summary = state.manager.refresh().await?;
    info!(
        nodes = summary.nodes,
        endpoints = summary.endpoints,
        "Refresh triggered via API"
    );
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

/// Get a single upstream node
pub async fn get_node(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, ChainError> {
    state
        .manager
        .get_node(&uid)
        .map(Json)
        .ok_or(ChainError::NodeNotFound { uid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_query_defaults() {
        assert_eq!(
            ProxyQuery::parse(None).unwrap(),
            ProxyQuery {
                protocols: Vec::new(),
                country: None,
                count: 1,
                random: false,
            }
        );
    }

    #[test]
    fn test_repeated_and_comma_separated_protocols() {
        let query =
            ProxyQuery::parse(Some("protocols=HTTP,%20socks5&protocols=http&count=5&random=true&country=us"))
                .unwrap();
        assert_eq!(
            query.protocols,
            vec![EndpointProtocol::Http, EndpointProtocol::Socks5]
        );
        assert_eq!(query.count, 5);
        assert!(query.random);
        assert_eq!(query.country.as_deref(), Some("us"));
    }

    #[test]
    fn test_invalid_queries() {
        for raw in ["count=0", "count=101", "count=abc", "protocols=https"] {
            assert!(
                matches!(ProxyQuery::parse(Some(raw)), Err(ChainError::InvalidRequest(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("proxy.example:8080"), "proxy.example");
        assert_eq!(strip_port("[2001:db8::1]:8080"), "2001:db8::1");
        assert_eq!(strip_port("2001:db8::1"), "2001:db8::1");
        assert_eq!(strip_port("proxy.example"), "proxy.example");
    }

    #[test]
    fn test_loopback_detection() {
        for host in ["127.0.0.1", "127.8.0.1", "localhost", "::1", "[::]", "0.0.0.0", "::ffff:127.0.0.1"] {
            assert!(is_loopback(host), "{host}");
        }
        for host in ["10.0.0.5", "proxy.example", ""] {
            assert!(!is_loopback(host), "{host}");
        }
    }

    #[test]
    fn test_public_host_resolution() {
        assert_eq!(
            resolve_public_host(&headers(&[("host", "api.example:8080")]), "proxy.example"),
            "proxy.example"
        );
        assert_eq!(
            resolve_public_host(
                &headers(&[("x-forwarded-host", "edge.example, inner"), ("host", "api.example")]),
                "127.0.0.1"
            ),
            "edge.example"
        );
        assert_eq!(
            resolve_public_host(&headers(&[("host", "api.example:8080")]), "0.0.0.0"),
            "api.example"
        );
        assert_eq!(
            resolve_public_host(&headers(&[("host", "localhost:8080")]), "127.0.0.1"),
            "127.0.0.1"
        );
    }
}
