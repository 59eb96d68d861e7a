//! Subscription text parsing
//!
//! Subscriptions arrive either as one URI per line or as a single base64 blob
//! wrapping such lines. Plain lines are tried first; the blob is only decoded
//! when no usable line was found, so plaintext that merely looks like base64 is
//! never mangled. Individual URIs are canonicalised with a "decode, validate the
//! decoded shape, otherwise leave untouched" policy: anything that cannot be
//! canonicalised is passed through and later dropped as unsupported.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;

const SS_PREFIX: &str = "ss://";
const VMESS_PREFIX: &str = "vmess://";

/// Accepts padded and unpadded input once URL-safe characters are mapped back
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Characters escaped when a display name becomes a URI fragment
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`');

/// Content layout of a subscription response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFormat {
    /// Structured `proxies:` list
    Yaml,
    /// URI lines, possibly base64 wrapped
    Text,
}

/// Classify subscription content by its first non-blank line
pub fn detect_format(content: &str) -> SubscriptionFormat {
    let first_line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    if first_line.starts_with("proxies:") {
        SubscriptionFormat::Yaml
    } else {
        SubscriptionFormat::Text
    }
}

/// Decode standard or URL-safe base64, tolerating missing padding
pub fn decode_base64(value: &str) -> Option<Vec<u8>> {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    LENIENT_BASE64.decode(cleaned.trim_end_matches('=')).ok()
}

fn decode_base64_text(value: &str) -> Option<String> {
    decode_base64(value).map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
}

fn is_base64_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-'))
}

/// Extract canonical backend URIs from subscription text
pub fn parse_subscription_text(text: &str) -> Vec<String> {
    let uris = parse_uri_lines(text);
    if !uris.is_empty() {
        return uris;
    }

    let compact: String = text.split_whitespace().collect();
    if compact.is_empty() {
        return Vec::new();
    }
    match decode_base64_text(&compact) {
        Some(decoded) => parse_uri_lines(&decoded),
        None => Vec::new(),
    }
}

/// Canonicalise every supported URI line, skipping blanks and comments
pub fn parse_uri_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            if line.starts_with(SS_PREFIX) {
                Some(normalize_ss_uri(line))
            } else if line.starts_with(VMESS_PREFIX) {
                Some(normalize_vmess_uri(line))
            } else {
                None
            }
        })
        .collect()
}

/// Bring an `ss://` URI into `ss://cipher:password@host:port[#name]` form
pub fn normalize_ss_uri(uri: &str) -> String {
    let Some(rest) = uri.strip_prefix(SS_PREFIX) else {
        return uri.to_string();
    };

    if let Some((userinfo, tail)) = rest.split_once('@') {
        // SIP002: only the credentials are encoded
        if is_base64_token(userinfo) && !userinfo.contains(':') {
            if let Some(decoded) = decode_base64_text(userinfo) {
                if decoded.contains(':') && !decoded.contains('@') {
                    return format!("{SS_PREFIX}{decoded}@{tail}");
                }
            }
        }
        return uri.to_string();
    }

    // Legacy: everything before the fragment is encoded
    let (encoded, suffix) = match rest.find('#') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    if is_base64_token(encoded) {
        if let Some(decoded) = decode_base64_text(encoded) {
            if decoded.contains(':') && decoded.contains('@') {
                return format!("{SS_PREFIX}{decoded}{suffix}");
            }
        }
    }
    uri.to_string()
}

/// Expand a `vmess://<base64 JSON>` share link into URI form
///
/// Links that already carry credentials (`@`) are returned unchanged, as are
/// payloads that fail to decode or lack the address, port or id fields.
pub fn normalize_vmess_uri(uri: &str) -> String {
    if uri.contains('@') {
        return uri.to_string();
    }
    let Some(payload) = uri.strip_prefix(VMESS_PREFIX) else {
        return uri.to_string();
    };

    let Some(data) = decode_base64_text(payload)
        .and_then(|json| serde_json::from_str::<Value>(&json).ok())
        .filter(Value::is_object)
    else {
        return uri.to_string();
    };

    let field = |key: &str| data.get(key).and_then(scalar).unwrap_or_default();
    let server = field("add");
    let port = field("port");
    let id = field("id");
    if server.is_empty() || port.is_empty() || id.is_empty() {
        return uri.to_string();
    }
    let alter_id = Some(field("aid"))
        .filter(|aid| !aid.is_empty())
        .unwrap_or_else(|| "0".to_string());

    let mut canonical = format!("{VMESS_PREFIX}none:{id}@{server}:{port}?alterID={alter_id}");
    let name = field("ps");
    if !name.is_empty() {
        canonical.push('#');
        canonical.extend(utf8_percent_encode(&name, FRAGMENT));
    }
    canonical
}

/// Render a JSON/YAML scalar as trimmed text
pub fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
