//! The REST value model.
//!
//! Client-facing documents are JSON, but the engine never dispatches on raw
//! `serde_json::Value`. Every field value is decoded into the closed
//! [`RestValue`] union first, so the transform layer is total over the value
//! space and undecodable input fails up front instead of falling through a
//! dynamic dispatch silently.
//!
//! Tagged encodings are keyed by `__type`:
//! - `Date`:     `{"__type":"Date","iso":"2015-03-01T15:59:11.273Z"}`
//! - `Pointer`:  `{"__type":"Pointer","className":"c","objectId":"id"}`
//! - `Relation`: `{"__type":"Relation","className":"target"}`
//! - `GeoPoint`: `{"__type":"GeoPoint","latitude":40.0,"longitude":-30.0}`
//! - `File`:     `{"__type":"File","name":"pic.png"}`
//! - `Bytes`:    `{"__type":"Bytes","base64":"aGVsbG8="}`
//!
//! Encode and decode are exact inverses for every variant.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Number, Value};

use crate::error::{PlinthError, PlinthResult};

/// A fully decoded REST value.
#[derive(Debug, Clone, PartialEq)]
pub enum RestValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    Pointer {
        class_name: String,
        object_id: String,
    },
    Relation {
        class_name: String,
    },
    GeoPoint {
        latitude: f64,
        longitude: f64,
    },
    File {
        name: String,
        url: Option<String>,
    },
    Bytes(Vec<u8>),
    Array(Vec<RestValue>),
    Object(BTreeMap<String, RestValue>),
}

impl RestValue {
    /// Decodes a REST JSON value. Objects carrying a `__type` tag must be
    /// well formed for that tag; anything undecodable is `IncorrectType`.
    pub fn from_json(value: &Value) -> PlinthResult<RestValue> {
        match value {
            Value::Null => Ok(RestValue::Null),
            Value::Bool(b) => Ok(RestValue::Bool(*b)),
            Value::Number(n) => Ok(RestValue::Number(n.clone())),
            Value::String(s) => Ok(RestValue::String(s.clone())),
            Value::Array(items) => {
                let decoded = items
                    .iter()
                    .map(RestValue::from_json)
                    .collect::<PlinthResult<Vec<_>>>()?;
                Ok(RestValue::Array(decoded))
            }
            Value::Object(map) => match map.get("__type").and_then(Value::as_str) {
                Some(tag) => Self::from_tagged(tag, map),
                None => {
                    let mut decoded = BTreeMap::new();
                    for (key, nested) in map {
                        decoded.insert(key.clone(), RestValue::from_json(nested)?);
                    }
                    Ok(RestValue::Object(decoded))
                }
            },
        }
    }

    fn from_tagged(tag: &str, map: &Map<String, Value>) -> PlinthResult<RestValue> {
        match tag {
            "Date" => {
                let iso = map.get("iso").and_then(Value::as_str).ok_or_else(|| {
                    PlinthError::IncorrectType("Date value requires an iso string".to_string())
                })?;
                let parsed = DateTime::parse_from_rfc3339(iso).map_err(|e| {
                    PlinthError::IncorrectType(format!("invalid Date iso '{}': {}", iso, e))
                })?;
                Ok(RestValue::Date(parsed.with_timezone(&Utc)))
            }
            "Pointer" => {
                let class_name = map.get("className").and_then(Value::as_str);
                let object_id = map.get("objectId").and_then(Value::as_str);
                match (class_name, object_id) {
                    (Some(class_name), Some(object_id)) => Ok(RestValue::Pointer {
                        class_name: class_name.to_string(),
                        object_id: object_id.to_string(),
                    }),
                    _ => Err(PlinthError::IncorrectType(
                        "Pointer value requires className and objectId".to_string(),
                    )),
                }
            }
            "Relation" => {
                let class_name =
                    map.get("className").and_then(Value::as_str).ok_or_else(|| {
                        PlinthError::IncorrectType(
                            "Relation value requires a className".to_string(),
                        )
                    })?;
                Ok(RestValue::Relation {
                    class_name: class_name.to_string(),
                })
            }
            "GeoPoint" => {
                let latitude = map.get("latitude").and_then(Value::as_f64);
                let longitude = map.get("longitude").and_then(Value::as_f64);
                match (latitude, longitude) {
                    (Some(latitude), Some(longitude)) => {
                        if !(-90.0..=90.0).contains(&latitude) {
                            return Err(PlinthError::IncorrectType(format!(
                                "GeoPoint latitude {} out of range [-90, 90]",
                                latitude
                            )));
                        }
                        if !(-180.0..=180.0).contains(&longitude) {
                            return Err(PlinthError::IncorrectType(format!(
                                "GeoPoint longitude {} out of range [-180, 180]",
                                longitude
                            )));
                        }
                        Ok(RestValue::GeoPoint {
                            latitude,
                            longitude,
                        })
                    }
                    _ => Err(PlinthError::IncorrectType(
                        "GeoPoint value requires numeric latitude and longitude".to_string(),
                    )),
                }
            }
            "File" => {
                let name = map.get("name").and_then(Value::as_str).ok_or_else(|| {
                    PlinthError::IncorrectType("File value requires a name".to_string())
                })?;
                Ok(RestValue::File {
                    name: name.to_string(),
                    url: map
                        .get("url")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string()),
                })
            }
            "Bytes" => {
                let encoded = map.get("base64").and_then(Value::as_str).ok_or_else(|| {
                    PlinthError::IncorrectType("Bytes value requires a base64 string".to_string())
                })?;
                let bytes = BASE64.decode(encoded).map_err(|e| {
                    PlinthError::IncorrectType(format!("invalid Bytes base64: {}", e))
                })?;
                Ok(RestValue::Bytes(bytes))
            }
            other => Err(PlinthError::IncorrectType(format!(
                "unknown __type tag '{}'",
                other
            ))),
        }
    }

    /// Encodes back to REST JSON. Exact inverse of [`RestValue::from_json`].
    pub fn to_json(&self) -> Value {
        match self {
            RestValue::Null => Value::Null,
            RestValue::Bool(b) => Value::Bool(*b),
            RestValue::Number(n) => Value::Number(n.clone()),
            RestValue::String(s) => Value::String(s.clone()),
            RestValue::Date(dt) => json!({
                "__type": "Date",
                "iso": format_iso(dt),
            }),
            RestValue::Pointer {
                class_name,
                object_id,
            } => json!({
                "__type": "Pointer",
                "className": class_name,
                "objectId": object_id,
            }),
            RestValue::Relation { class_name } => json!({
                "__type": "Relation",
                "className": class_name,
            }),
            RestValue::GeoPoint {
                latitude,
                longitude,
            } => json!({
                "__type": "GeoPoint",
                "latitude": latitude,
                "longitude": longitude,
            }),
            RestValue::File { name, url } => {
                let mut map = Map::new();
                map.insert("__type".to_string(), Value::String("File".to_string()));
                map.insert("name".to_string(), Value::String(name.clone()));
                if let Some(url) = url {
                    map.insert("url".to_string(), Value::String(url.clone()));
                }
                Value::Object(map)
            }
            RestValue::Bytes(bytes) => json!({
                "__type": "Bytes",
                "base64": BASE64.encode(bytes),
            }),
            RestValue::Array(items) => {
                Value::Array(items.iter().map(RestValue::to_json).collect())
            }
            RestValue::Object(map) => {
                let mut encoded = Map::new();
                for (key, nested) in map {
                    encoded.insert(key.clone(), nested.to_json());
                }
                Value::Object(encoded)
            }
        }
    }

    /// True for the scalar variants that pass through storage untouched.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            RestValue::Null | RestValue::Bool(_) | RestValue::Number(_) | RestValue::String(_)
        )
    }
}

/// ISO-8601 with millisecond precision, the wire format for every date.
pub fn format_iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a wire-format ISO date back into a UTC timestamp.
pub fn parse_iso(iso: &str) -> PlinthResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PlinthError::IncorrectType(format!("invalid iso date '{}': {}", iso, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        for raw in [
            json!(null),
            json!(true),
            json!(42),
            json!(4.5),
            json!("hello"),
        ] {
            let decoded = RestValue::from_json(&raw).unwrap();
            assert_eq!(decoded.to_json(), raw);
        }
    }

    #[test]
    fn tagged_values_round_trip() {
        for raw in [
            json!({"__type": "Date", "iso": "2015-03-01T15:59:11.273Z"}),
            json!({"__type": "Pointer", "className": "Diary", "objectId": "abc123"}),
            json!({"__type": "Relation", "className": "Diary"}),
            json!({"__type": "GeoPoint", "latitude": 40.0, "longitude": -30.0}),
            json!({"__type": "File", "name": "pic.png"}),
            json!({"__type": "Bytes", "base64": "aGVsbG8="}),
        ] {
            let decoded = RestValue::from_json(&raw).unwrap();
            assert_eq!(decoded.to_json(), raw, "round trip failed for {}", raw);
        }
    }

    #[test]
    fn nested_containers_decode_recursively() {
        let raw = json!({
            "tags": ["a", "b"],
            "when": {"__type": "Date", "iso": "2020-01-01T00:00:00.000Z"}
        });
        let decoded = RestValue::from_json(&raw).unwrap();
        match decoded {
            RestValue::Object(map) => {
                assert!(matches!(map.get("tags"), Some(RestValue::Array(_))));
                assert!(matches!(map.get("when"), Some(RestValue::Date(_))));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn malformed_tags_fail() {
        for raw in [
            json!({"__type": "Date"}),
            json!({"__type": "Date", "iso": "not a date"}),
            json!({"__type": "Pointer", "className": "Diary"}),
            json!({"__type": "GeoPoint", "latitude": 200.0, "longitude": 0.0}),
            json!({"__type": "Bytes", "base64": "!!!"}),
            json!({"__type": "Teleport"}),
        ] {
            let err = RestValue::from_json(&raw).unwrap_err();
            assert!(
                matches!(err, PlinthError::IncorrectType(_)),
                "expected IncorrectType for {}",
                raw
            );
        }
    }
}
