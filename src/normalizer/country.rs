//! Best-effort country inference
//!
//! Upstream nodes rarely carry reliable location data, so the country is guessed
//! from metadata and display names. The rules below run in priority order and
//! the first one that matches wins; nothing here performs any lookup beyond the
//! static tables, and a miss simply leaves the country unknown.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

const COUNTRY_CODE_TO_NAME: &[(&str, &str)] = &[
    ("US", "United States"),
    ("CA", "Canada"),
    ("GB", "United Kingdom"),
    ("UK", "United Kingdom"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("NL", "Netherlands"),
    ("SE", "Sweden"),
    ("NO", "Norway"),
    ("FI", "Finland"),
    ("DK", "Denmark"),
    ("IS", "Iceland"),
    ("IE", "Ireland"),
    ("IT", "Italy"),
    ("ES", "Spain"),
    ("PT", "Portugal"),
    ("PL", "Poland"),
    ("RU", "Russia"),
    ("UA", "Ukraine"),
    ("RO", "Romania"),
    ("HU", "Hungary"),
    ("CZ", "Czech Republic"),
    ("SK", "Slovakia"),
    ("CH", "Switzerland"),
    ("AT", "Austria"),
    ("BE", "Belgium"),
    ("LU", "Luxembourg"),
    ("CN", "China"),
    ("TW", "Taiwan"),
    ("HK", "Hong Kong"),
    ("MO", "Macau"),
    ("JP", "Japan"),
    ("KR", "South Korea"),
    ("SG", "Singapore"),
    ("MY", "Malaysia"),
    ("TH", "Thailand"),
    ("VN", "Vietnam"),
    ("ID", "Indonesia"),
    ("PH", "Philippines"),
    ("IN", "India"),
    ("BT", "Bhutan"),
    ("BD", "Bangladesh"),
    ("NP", "Nepal"),
    ("MM", "Myanmar"),
    ("AU", "Australia"),
    ("NZ", "New Zealand"),
    ("BR", "Brazil"),
    ("AR", "Argentina"),
    ("CL", "Chile"),
    ("CO", "Colombia"),
    ("MX", "Mexico"),
    ("ZA", "South Africa"),
    ("AE", "United Arab Emirates"),
    ("QA", "Qatar"),
    ("SA", "Saudi Arabia"),
    ("IL", "Israel"),
    ("TR", "Turkey"),
    ("IR", "Iran"),
    ("IQ", "Iraq"),
    ("EG", "Egypt"),
    ("NG", "Nigeria"),
    ("KE", "Kenya"),
];

const LOCALIZED_NAME_TO_CODE: &[(&str, &str)] = &[
    ("中国", "CN"),
    ("香港", "HK"),
    ("澳門", "MO"),
    ("澳门", "MO"),
    ("台湾", "TW"),
    ("台灣", "TW"),
    ("日本", "JP"),
    ("韩国", "KR"),
    ("南韓", "KR"),
    ("新加坡", "SG"),
    ("马来西亚", "MY"),
    ("馬來西亞", "MY"),
    ("泰国", "TH"),
    ("泰國", "TH"),
    ("越南", "VN"),
    ("印尼", "ID"),
    ("菲律宾", "PH"),
    ("菲律賓", "PH"),
    ("印度", "IN"),
    ("美国", "US"),
    ("美國", "US"),
    ("加拿大", "CA"),
    ("英国", "GB"),
    ("英國", "GB"),
    ("法国", "FR"),
    ("法國", "FR"),
    ("德国", "DE"),
    ("德國", "DE"),
    ("俄罗斯", "RU"),
    ("俄羅斯", "RU"),
    ("澳大利亚", "AU"),
    ("澳大利亞", "AU"),
    ("阿根廷", "AR"),
    ("捷克", "CZ"),
    ("瑞典", "SE"),
    ("瑞士", "CH"),
    ("西班牙", "ES"),
    ("葡萄牙", "PT"),
];

const ALIAS_TO_CODE: &[(&str, &str)] = &[
    ("UNITED STATES", "US"),
    ("UNITED KINGDOM", "GB"),
    ("GREAT BRITAIN", "GB"),
    ("ENGLAND", "GB"),
    ("SCOTLAND", "GB"),
    ("WALES", "GB"),
    ("SOUTH KOREA", "KR"),
    ("NORTH KOREA", "KP"),
    ("KOREA", "KR"),
    ("HONGKONG", "HK"),
    ("HONG KONG", "HK"),
    ("TAIWAN", "TW"),
    ("MACAU", "MO"),
    ("UAE", "AE"),
    ("EMIRATES", "AE"),
    ("U.S.", "US"),
    ("USA", "US"),
    ("US", "US"),
    ("UK", "GB"),
    ("VIET NAM", "VN"),
    ("SAUDI", "SA"),
];

const CODE_FIELDS: &[&str] = &["countryCode", "country_code", "code", "cc", "countrycode"];
const NAME_FIELDS: &[&str] = &["country", "location", "region", "area"];

static CODE_TO_NAME: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| COUNTRY_CODE_TO_NAME.iter().copied().collect());

static NAME_TO_CODE: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    let mut table: HashMap<String, &'static str> = COUNTRY_CODE_TO_NAME
        .iter()
        .map(|(code, name)| (name.to_uppercase(), *code))
        .collect();
    table.extend(ALIAS_TO_CODE.iter().map(|(alias, code)| (alias.to_string(), *code)));
    table.extend(
        LOCALIZED_NAME_TO_CODE
            .iter()
            .map(|(name, code)| (name.to_string(), *code)),
    );
    table
});

static LOCALIZED_TO_CODE: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| LOCALIZED_NAME_TO_CODE.iter().copied().collect());

static FLAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{1F1E6}-\x{1F1FF}]{2}").expect("valid flag pattern"));

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\x{4e00}-\x{9fff}]+").expect("valid separator pattern"));

static HAN_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{4e00}-\x{9fff}]{1,3}").expect("valid han pattern"));

/// Inferred country name and ISO-like code
pub type CountryGuess = (Option<String>, Option<String>);

type Rule = fn(Option<&str>, Option<&Map<String, Value>>) -> Option<String>;

/// Inference rules in priority order; each yields a country code or nothing
const RULES: &[Rule] = &[
    |_, meta| meta.and_then(code_from_code_fields),
    |_, meta| meta.and_then(code_from_name_fields),
    |name, _| name.and_then(code_from_flag),
    |name, _| name.and_then(code_from_token),
    |name, _| name.and_then(code_from_alias),
];

/// Guess the country of a node from its metadata and display name
pub fn derive_country(name: Option<&str>, metadata: Option<&Map<String, Value>>) -> CountryGuess {
    RULES
        .iter()
        .find_map(|rule| rule(name, metadata))
        .map(|code| (Some(country_name(&code)), Some(code)))
        .unwrap_or((None, None))
}

/// Display name for a code, or the code itself when unknown
pub fn country_name(code: &str) -> String {
    CODE_TO_NAME
        .get(code)
        .map(|name| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Map a free-form country name or alias to its code
pub fn code_for_name(name: &str) -> Option<&'static str> {
    let cleaned = name.trim();
    if cleaned.is_empty() {
        return None;
    }
    NAME_TO_CODE.get(&cleaned.to_uppercase()).copied()
}

fn code_from_code_fields(meta: &Map<String, Value>) -> Option<String> {
    CODE_FIELDS
        .iter()
        .filter_map(|key| meta.get(*key))
        .find_map(|value| {
            let raw = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let code = raw.trim().to_uppercase();
            (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
        })
}

fn code_from_name_fields(meta: &Map<String, Value>) -> Option<String> {
    NAME_FIELDS
        .iter()
        .filter_map(|key| meta.get(*key).and_then(Value::as_str))
        .find_map(code_for_name)
        .map(str::to_string)
}

fn code_from_flag(name: &str) -> Option<String> {
    let flag = FLAG_PATTERN.find(name)?;
    flag_to_code(flag.as_str())
}

/// Convert a regional-indicator pair into its two-letter code
pub fn flag_to_code(flag: &str) -> Option<String> {
    const BASE: u32 = 0x1F1E6;
    let letters: Option<String> = flag
        .chars()
        .map(|c| {
            let point = c as u32;
            (BASE..=0x1F1FF)
                .contains(&point)
                .then(|| char::from(b'A' + (point - BASE) as u8))
        })
        .collect();
    letters.filter(|code| code.len() == 2)
}

fn code_from_token(name: &str) -> Option<String> {
    name.to_uppercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase()))
        .find(|token| CODE_TO_NAME.contains_key(token))
        .map(str::to_string)
}

fn code_from_alias(name: &str) -> Option<String> {
    let stripped = NON_WORD.replace_all(name, " ");
    let from_tokens = stripped
        .split_whitespace()
        .find_map(code_for_name)
        .map(str::to_string);
    if from_tokens.is_some() {
        return from_tokens;
    }

    HAN_RUN
        .find_iter(name)
        .find_map(|m| LOCALIZED_TO_CODE.get(m.as_str()))
        .map(|code| code.to_string())
}

/// Whether an endpoint's country satisfies a user supplied filter
///
/// A query that resolves to a code must equal the endpoint's code; otherwise
/// the query is matched as a case-insensitive substring of the country name.
pub fn matches_country(
    query: Option<&str>,
    country_name: Option<&str>,
    country_code: Option<&str>,
) -> bool {
    let Some(query) = query else {
        return true;
    };
    if country_name.is_none() && country_code.is_none() {
        return false;
    }
    let query = query.trim();
    if query.is_empty() {
        return true;
    }

    let query_code = code_for_name(query).map(str::to_string).or_else(|| {
        (query.chars().count() == 2).then(|| query.to_uppercase())
    });

    match (query_code, country_code) {
        (Some(wanted), Some(code)) => wanted == code,
        (Some(wanted), None) => country_name
            .and_then(code_for_name)
            .is_some_and(|code| code == wanted),
        (None, code) => {
            country_name.is_some_and(|name| name.to_lowercase().contains(&query.to_lowercase()))
                || code.is_some_and(|code| code == query.to_uppercase())
        }
    }
}
