use std::str::FromStr;

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{DomainError, ValidationError};

/// The two record collections this layer manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Students,
    Artworks,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Students => "students",
            Collection::Artworks => "artworks",
        }
    }
}

impl FromStr for Collection {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "students" => Ok(Collection::Students),
            "artworks" => Ok(Collection::Artworks),
            _ => Err(DomainError::Validation(ValidationError::custom(&format!(
                "Invalid Collection string: {}",
                s
            )))),
        }
    }
}

impl From<Collection> for String {
    fn from(collection: Collection) -> Self {
        collection.as_str().to_string()
    }
}

/// Current wall-clock time as milliseconds since the epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Canonicalize a raw `createdAt` value into milliseconds since the epoch.
///
/// Remote documents, cached local records and user input disagree on the
/// timestamp representation, so this accepts: a raw number (already millis),
/// a numeric string, an object carrying a millisecond field (`millis` or
/// `toMillis`), and an object carrying a `seconds`-since-epoch field.
/// Anything else resolves to "now" so records always sort.
pub fn coerce_created_at(value: Option<&Value>) -> i64 {
    created_at_or(value, now_millis())
}

/// Like [`coerce_created_at`] but with an explicit fallback, used when
/// sorting where an unknown timestamp should sink rather than float.
pub fn created_at_or(value: Option<&Value>, fallback: i64) -> i64 {
    let value = match value {
        Some(v) => v,
        None => return fallback,
    };
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(fallback),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(fallback),
        Value::Object(map) => {
            if let Some(millis) = map
                .get("millis")
                .or_else(|| map.get("toMillis"))
                .and_then(Value::as_i64)
            {
                millis
            } else if let Some(seconds) = map.get("seconds").and_then(Value::as_f64) {
                (seconds * 1000.0) as i64
            } else {
                fallback
            }
        }
        _ => fallback,
    }
}

/// Coerce a loose `localOnly` value to a strict boolean. Only JSON `true`
/// counts; absent, null, or any other shape means the record is remote-backed.
pub fn coerce_local_only(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

/// Generate a collection-local record id, e.g. `student-9f0c...`.
pub fn generate_record_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

const DATA_URL_PREFIX: &str = "data:";

/// True when a media url is an embedded-binary placeholder (a `data:` url
/// holding the raw file content inline pending upload).
pub fn is_embedded_media(url: &str) -> bool {
    url.starts_with(DATA_URL_PREFIX)
}

/// Encode raw file bytes as an embedded-binary placeholder url.
pub fn embed_media(mime_type: &str, data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    format!("data:{};base64,{}", mime_type, encoded)
}

/// Decode an embedded-binary placeholder back into its mime type and bytes.
/// Returns `None` for anything that is not a well-formed base64 data url.
pub fn decode_embedded_media(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix(DATA_URL_PREFIX)?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    let mime_type = if mime_type.is_empty() {
        mime::APPLICATION_OCTET_STREAM.to_string()
    } else {
        mime_type.to_string()
    };
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()?;
    Some((mime_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn created_at_accepts_all_source_shapes() {
        let fallback = 0;
        assert_eq!(created_at_or(Some(&json!(1700000000000i64)), fallback), 1700000000000);
        assert_eq!(created_at_or(Some(&json!("1700000000000")), fallback), 1700000000000);
        assert_eq!(
            created_at_or(Some(&json!({"millis": 1700000000000i64})), fallback),
            1700000000000
        );
        assert_eq!(
            created_at_or(Some(&json!({"toMillis": 1700000000000i64})), fallback),
            1700000000000
        );
        assert_eq!(
            created_at_or(Some(&json!({"seconds": 1700000000})), fallback),
            1700000000000
        );
    }

    #[test]
    fn created_at_defaults_unrecognized_shapes() {
        assert_eq!(created_at_or(None, 7), 7);
        assert_eq!(created_at_or(Some(&json!(null)), 7), 7);
        assert_eq!(created_at_or(Some(&json!("yesterday")), 7), 7);
        assert_eq!(created_at_or(Some(&json!({"nanos": 12})), 7), 7);
        assert_eq!(created_at_or(Some(&json!([1, 2])), 7), 7);
    }

    #[test]
    fn coerce_created_at_defaults_to_now() {
        let before = now_millis();
        let coerced = coerce_created_at(Some(&json!(null)));
        assert!(coerced >= before);
    }

    #[test]
    fn local_only_requires_a_real_bool() {
        assert!(coerce_local_only(&json!(true)));
        assert!(!coerce_local_only(&json!(false)));
        assert!(!coerce_local_only(&json!(null)));
        assert!(!coerce_local_only(&json!(1)));
        assert!(!coerce_local_only(&json!("true")));
    }

    #[test]
    fn embedded_media_round_trip() {
        let url = embed_media("image/png", b"pixels");
        assert!(is_embedded_media(&url));
        let (mime_type, data) = decode_embedded_media(&url).unwrap();
        assert_eq!(mime_type, "image/png");
        assert_eq!(data, b"pixels");
        assert!(!is_embedded_media("https://cdn.example.com/cover.png"));
        assert!(decode_embedded_media("data:image/png,plain").is_none());
    }
}
