use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A Firestore typed value as it appears on the REST wire,
/// e.g. `{"stringValue": "3A"}` or `{"arrayValue": {"values": [...]}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(serde_json::Value),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::NullValue(()),
            serde_json::Value::Bool(b) => Value::BooleanValue(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::IntegerValue(i.to_string()),
                None => Value::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::StringValue(s),
            serde_json::Value::Array(items) => Value::ArrayValue(ArrayValue {
                values: items.into_iter().map(Value::from).collect(),
            }),
            serde_json::Value::Object(map) => Value::MapValue(MapValue {
                fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            }),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::NullValue(()) => serde_json::Value::Null,
            Value::BooleanValue(b) => serde_json::Value::Bool(b),
            Value::IntegerValue(s) => match s.parse::<i64>() {
                Ok(i) => serde_json::Value::from(i),
                Err(_) => serde_json::Value::String(s),
            },
            Value::DoubleValue(f) => serde_json::Value::from(f),
            Value::TimestampValue(s)
            | Value::StringValue(s)
            | Value::BytesValue(s)
            | Value::ReferenceValue(s) => serde_json::Value::String(s),
            Value::GeoPointValue(v) => v,
            Value::ArrayValue(array) => serde_json::Value::Array(
                array.values.into_iter().map(serde_json::Value::from).collect(),
            ),
            Value::MapValue(map) => serde_json::Value::Object(
                map.fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    /// Encodes any struct that serializes to a JSON object.
    pub fn encode<T: Serialize>(name: String, doc: &T) -> Result<Self, AppError> {
        match serde_json::to_value(doc)? {
            serde_json::Value::Object(map) => Ok(Self {
                name,
                fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
                create_time: None,
                update_time: None,
            }),
            other => Err(AppError::TransientBackendFailure(format!(
                "document must encode to an object, got {}",
                other
            ))),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
            .collect();
        Ok(serde_json::from_value(serde_json::Value::Object(object))?)
    }

    /// Last path segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    pub fn field_paths(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponseItem {
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Serialize)]
pub struct CommitRequest {
    pub writes: Vec<Write>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mask: Option<DocumentMask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub update_transforms: Vec<FieldTransform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMask {
    pub field_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTransform {
    pub field_path: String,
    pub set_to_server_value: String,
}

impl FieldTransform {
    pub fn request_time(field_path: &str) -> Self {
        Self {
            field_path: field_path.to_string(),
            set_to_server_value: "REQUEST_TIME".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Precondition {
    Exists(bool),
    UpdateTime(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: GoogleError,
}

#[derive(Debug, Deserialize)]
pub struct GoogleError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entry;

    #[test]
    fn test_value_wire_shape() {
        let encoded = serde_json::to_value(Value::from(serde_json::json!({
            "name": "3A",
            "locked": true,
            "hour": 2,
            "absences": [],
            "extra": null
        })))
        .unwrap();

        assert_eq!(
            encoded,
            serde_json::json!({
                "mapValue": {
                    "fields": {
                        "absences": { "arrayValue": { "values": [] } },
                        "extra": { "nullValue": null },
                        "hour": { "integerValue": "2" },
                        "locked": { "booleanValue": true },
                        "name": { "stringValue": "3A" }
                    }
                }
            })
        );
    }

    #[test]
    fn test_decode_server_document() {
        let doc: Document = serde_json::from_value(serde_json::json!({
            "name": "projects/p/databases/(default)/documents/entries/3A__2024-05-01__1",
            "fields": {
                "course": { "stringValue": "3A" },
                "date": { "stringValue": "2024-05-01" },
                "hour": { "integerValue": "1" },
                "absences": { "arrayValue": {} },
                "locked": { "booleanValue": false },
                "createdAt": { "timestampValue": "2024-05-01T08:00:00Z" }
            },
            "createTime": "2024-05-01T08:00:00.000001Z",
            "updateTime": "2024-05-01T08:00:00.000001Z"
        }))
        .unwrap();

        assert_eq!(doc.id(), "3A__2024-05-01__1");
        let entry: Entry = doc.decode().unwrap();
        assert_eq!(entry.hour, "1");
        assert_eq!(entry.created_at.as_deref(), Some("2024-05-01T08:00:00Z"));
        assert!(entry.absences.is_empty());
    }

    #[test]
    fn test_commit_write_shape() {
        let write = Write {
            delete: Some("projects/p/databases/(default)/documents/entries/a".to_string()),
            current_document: Some(Precondition::UpdateTime("2024-05-01T08:00:00Z".to_string())),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&write).unwrap(),
            serde_json::json!({
                "delete": "projects/p/databases/(default)/documents/entries/a",
                "currentDocument": { "updateTime": "2024-05-01T08:00:00Z" }
            })
        );

        let create = Write {
            update: Some(Document::default()),
            update_transforms: vec![FieldTransform::request_time("createdAt")],
            current_document: Some(Precondition::Exists(false)),
            ..Default::default()
        };
        let value = serde_json::to_value(&create).unwrap();
        assert_eq!(value["currentDocument"], serde_json::json!({ "exists": false }));
        assert_eq!(
            value["updateTransforms"][0]["setToServerValue"],
            serde_json::json!("REQUEST_TIME")
        );
    }
}
