//! Request header conversion
//! Every map produced here is keyed by the lower-cased header name

use std::collections::HashMap;
use std::time::Instant;

use http::HeaderMap;
use tracing::{debug, warn};

/// Upper bound on header entries taken from one request
const MAX_HEADER_ENTRIES: usize = 1000;

/// Header conversion helpers
pub struct HeaderConverter;

impl HeaderConverter {
    /// `HeaderMap` to a multi-valued map. Values that are not visible ASCII become empty.
    pub fn to_hashmap(header_map: &HeaderMap) -> HashMap<String, Vec<String>> {
        let start = Instant::now();
        let mut map: HashMap<String, Vec<String>> = HashMap::new();

        for (count, (key, value)) in header_map.iter().enumerate() {
            if count >= MAX_HEADER_ENTRIES {
                warn!("more than {} header entries, ignoring the rest", MAX_HEADER_ENTRIES);
                break;
            }
            map.entry(key.as_str().to_lowercase())
                .or_default()
                .push(value.to_str().unwrap_or("").to_string());
        }

        debug!("header conversion took {:?}, {} names", start.elapsed(), map.len());
        map
    }

    /// First non-empty value of each header
    pub fn to_single_value(hashmap: &HashMap<String, Vec<String>>) -> HashMap<String, String> {
        let mut single_map = HashMap::new();
        for (key, values) in hashmap {
            if let Some(first) = values.iter().find(|v| !v.is_empty()) {
                single_map.insert(key.to_lowercase(), first.clone());
            }
        }
        single_map
    }

    /// Lower-case the names of an already single-valued map. On a clash the last entry wins.
    pub fn normalize(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, ACCEPT, USER_AGENT};

    #[test]
    fn header_map_keys_are_lowercased() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        headers.append(ACCEPT, HeaderValue::from_static(""));
        headers.append(ACCEPT, HeaderValue::from_static("text/html"));

        let multi = HeaderConverter::to_hashmap(&headers);
        assert_eq!(multi["user-agent"], vec!["Mozilla/5.0"]);
        assert_eq!(multi["accept"].len(), 2);

        let single = HeaderConverter::to_single_value(&multi);
        assert_eq!(single["accept"], "text/html");
    }

    #[test]
    fn normalize_lowercases_names() {
        let headers = HashMap::from([("User-Agent".to_string(), "Opera/9.0".to_string())]);
        assert_eq!(HeaderConverter::normalize(&headers)["user-agent"], "Opera/9.0");
    }
}
