use crate::cache::CacheError;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use tracing::warn;

type HeaderRecord = BTreeMap<String, Vec<String>>;

/// Serialize a header collection as a JSON object of name to ordered values.
///
/// Values that are not valid UTF-8 cannot be represented as JSON strings and
/// are left out of the record.
pub fn encode_headers(headers: &HeaderMap) -> Result<Vec<u8>, CacheError> {
    let mut record = HeaderRecord::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .filter_map(|value| match std::str::from_utf8(value.as_bytes()) {
                Ok(value) => Some(value.to_owned()),
                Err(_) => {
                    warn!("Not caching non UTF-8 value of header {name}");
                    None
                }
            })
            .collect();
        if !values.is_empty() {
            record.insert(name.as_str().to_owned(), values);
        }
    }
    serde_json::to_vec(&record).map_err(CacheError::Encode)
}

/// Parse a header collection previously produced by [`encode_headers`].
pub fn decode_headers(bytes: &[u8]) -> Result<HeaderMap, CacheError> {
    let record: HeaderRecord = serde_json::from_slice(bytes).map_err(CacheError::MalformedHeader)?;

    let mut headers = HeaderMap::with_capacity(record.len());
    for (name, values) in record {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| CacheError::InvalidHeader(name.clone()))?;
        for value in values {
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|_| CacheError::InvalidHeader(name.to_string()))?;
            headers.append(&name, value);
        }
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append("content-type", HeaderValue::from_static("application/json"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.append("set-cookie", HeaderValue::from_static("a=3"));
        headers.append("x-rate", HeaderValue::from_static("10"));
        headers
    }

    #[test]
    fn test_round_trip_preserves_order_and_multiplicity() {
        let headers = sample_headers();
        let decoded = decode_headers(&encode_headers(&headers).unwrap()).unwrap();

        assert_eq!(decoded, headers);
        let cookies: Vec<_> = decoded.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["a=1", "b=2", "a=3"]);
    }

    #[test]
    fn test_round_trip_utf8_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-title",
            HeaderValue::from_bytes("caf\u{e9}".as_bytes()).unwrap(),
        );
        let decoded = decode_headers(&encode_headers(&headers).unwrap()).unwrap();
        assert_eq!(decoded.get("x-title").unwrap().as_bytes(), "caf\u{e9}".as_bytes());
    }

    #[test]
    fn test_encode_skips_non_utf8_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-mixed", HeaderValue::from_static("ok"));
        headers.append("x-mixed", HeaderValue::from_bytes(b"\xff\xfe").unwrap());
        headers.append("x-opaque", HeaderValue::from_bytes(b"\xff").unwrap());

        let decoded = decode_headers(&encode_headers(&headers).unwrap()).unwrap();
        let mixed: Vec<_> = decoded.get_all("x-mixed").iter().collect();
        assert_eq!(mixed, ["ok"]);
        assert!(!decoded.contains_key("x-opaque"));
    }

    #[test]
    fn test_encoded_form() {
        let mut headers = HeaderMap::new();
        headers.append("x-rate", HeaderValue::from_static("10"));
        headers.append("x-rate", HeaderValue::from_static("20"));
        let encoded = encode_headers(&headers).unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&encoded).unwrap(),
            serde_json::json!({ "x-rate": ["10", "20"] })
        );
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(matches!(
            decode_headers(b"not json"),
            Err(CacheError::MalformedHeader(_))
        ));
        assert!(matches!(
            decode_headers(br#"{"x-rate": "10"}"#),
            Err(CacheError::MalformedHeader(_))
        ));
        assert!(matches!(
            decode_headers(br#"{"bad name": ["1"]}"#),
            Err(CacheError::InvalidHeader(_))
        ));
        assert!(matches!(
            decode_headers(br#"{"x-ok": ["line\nbreak"]}"#),
            Err(CacheError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_accepts_mixed_case_names() {
        let headers = decode_headers(br#"{"X-Rate": ["10"]}"#).unwrap();
        assert_eq!(headers.get("x-rate").unwrap(), "10");
    }
}
