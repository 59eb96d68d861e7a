//! Forward directives and backend URI lines

use percent_encoding::percent_decode_str;
use serde_json::json;
use url::Url;

use super::country::derive_country;
use super::{is_supported_cipher, NodeSet};
use crate::models::{BackendSchema, ProxyNode};

const FORWARD_DIRECTIVE: &str = "forward=";

/// Backend URIs named by `forward=` lines, in file order
pub fn parse_forward_directives(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(FORWARD_DIRECTIVE))
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build de-duplicated nodes from canonical backend URIs
pub fn nodes_from_uris<I>(uris: I, source: &str) -> Vec<ProxyNode>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut nodes = NodeSet::default();
    for uri in uris {
        if let Some(node) = node_from_uri(uri.as_ref(), source) {
            nodes.insert(node);
        }
    }
    nodes.into_vec()
}

/// Parse one backend URI, or `None` when it is unusable
pub fn node_from_uri(uri: &str, source: &str) -> Option<ProxyNode> {
    let uri = uri.trim();
    let parsed = Url::parse(uri).ok()?;
    let schema = BackendSchema::from_str(parsed.scheme())?;

    let server = parsed.host_str().filter(|host| !host.is_empty())?;
    let port = parsed.port().filter(|port| *port > 0)?;

    if schema == BackendSchema::Ss {
        let cipher = percent_decode_str(parsed.username()).decode_utf8_lossy();
        if !is_supported_cipher(&cipher) {
            return None;
        }
    }

    let name = parsed
        .fragment()
        .map(|fragment| percent_decode_str(fragment).decode_utf8_lossy().trim().to_string())
        .filter(|name| !name.is_empty());
    let country = derive_country(name.as_deref(), None);

    Some(
        ProxyNode::new(uri, schema, server, port, source)
            .with_name(name)
            .with_country(country)
            .with_raw(json!({ "uri": uri, "source": source })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_directives_are_collected() {
        let text = "listen=socks5://:1080\nforward=ss://aes-256-gcm:pw@a.example:1#A\n# forward=ignored\nforward= \n  forward=vmess://none:id@b.example:2?alterID=0\n";
        assert_eq!(
            parse_forward_directives(text),
            vec![
                "ss://aes-256-gcm:pw@a.example:1#A".to_string(),
                "vmess://none:id@b.example:2?alterID=0".to_string(),
            ]
        );
    }

    #[test]
    fn test_ss_uri_becomes_node() {
        let node = node_from_uri("ss://aes-256-gcm:pass@example.com:8388#US-1", "forward").unwrap();

        assert_eq!(node.schema, BackendSchema::Ss);
        assert_eq!(node.server, "example.com");
        assert_eq!(node.port, 8388);
        assert_eq!(node.name.as_deref(), Some("US-1"));
        assert_eq!(node.country_code.as_deref(), Some("US"));
        assert_eq!(node.source, "forward");
        assert_eq!(node.raw["uri"], "ss://aes-256-gcm:pass@example.com:8388#US-1");
    }

    #[test]
    fn test_encoded_fragment_is_decoded() {
        let node = node_from_uri("vmess://none:id@v.example:443?alterID=0#JP%2001", "s").unwrap();
        assert_eq!(node.name.as_deref(), Some("JP 01"));
        assert_eq!(node.country_code.as_deref(), Some("JP"));
    }

    #[test]
    fn test_unusable_uris_are_dropped() {
        assert!(node_from_uri("trojan://pw@t.example:443", "s").is_none());
        assert!(node_from_uri("ss://rc4-md5:pw@r.example:443", "s").is_none());
        assert!(node_from_uri("ss://aes-256-gcm:pw@noport.example", "s").is_none());
        assert!(node_from_uri("vmess://eyJhZGQiOiJ4In0", "s").is_none());
        assert!(node_from_uri("not a uri", "s").is_none());
    }

    #[test]
    fn test_duplicate_uris_collapse() {
        let nodes = nodes_from_uris(
            [
                "ss://aes-256-gcm:pw@a.example:1#A",
                "ss://aes-256-gcm:pw@a.example:1#A",
                "ss://aes-256-gcm:pw@b.example:2#B",
            ],
            "forward",
        );
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].server, "a.example");
        assert_eq!(nodes[1].server, "b.example");
    }
}
