//! GraphQL wire types for the dynamic-field table.
//!
//! Page queries walk `owner(address).dynamicFields(first, after)`; point
//! lookups use `owner(address).dynamicField(name)` with the key given as its
//! Move type plus base64 BCS bytes. Key JSON carries `labels`, value JSON
//! carries `expiration_timestamp_ms`.

use super::RawNode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Paginated dynamic-field query.
pub const PAGE_QUERY: &str = r#"query DynamicFields($parentId: SuiAddress!, $first: Int, $after: String) {
  owner(address: $parentId) {
    dynamicFields(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        name { json }
        value {
          ... on MoveValue { json }
          ... on MoveObject { contents { json } }
        }
      }
    }
  }
}"#;

/// Single dynamic-field lookup.
pub const LOOKUP_QUERY: &str = r#"query DynamicField($parentId: SuiAddress!, $name: DynamicFieldName!) {
  owner(address: $parentId) {
    dynamicField(name: $name) {
      value {
        ... on MoveValue { json }
        ... on MoveObject { contents { json } }
      }
    }
  }
}"#;

/// GraphQL request envelope.
#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a, V> {
    /// Query document
    pub query: &'a str,
    /// Query variables
    pub variables: V,
}

/// Variables for [`PAGE_QUERY`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVariables<'a> {
    /// Table object id
    pub parent_id: &'a str,
    /// Page size
    pub first: usize,
    /// Cursor to continue from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<&'a str>,
}

/// Variables for [`LOOKUP_QUERY`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupVariables<'a> {
    /// Table object id
    pub parent_id: &'a str,
    /// Encoded key
    pub name: DynamicFieldName,
}

/// Dynamic field key as the API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicFieldName {
    /// Fully qualified Move type of the key
    #[serde(rename = "type")]
    pub type_: String,
    /// Base64 BCS encoding of the key value
    pub bcs: String,
}

/// GraphQL response envelope.
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    /// Query result
    pub data: Option<T>,
    /// Query errors
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

/// One GraphQL error.
#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    /// Error message
    pub message: String,
}

/// `data` of a page query.
#[derive(Debug, Deserialize)]
pub struct PageData {
    /// Table owner, absent when the id is unknown
    pub owner: Option<PageOwner>,
}

/// Owner with its field connection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageOwner {
    /// Field connection
    pub dynamic_fields: Connection,
}

/// Relay-style connection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Pagination info
    pub page_info: PageInfo,
    /// Fields on this page
    #[serde(default)]
    pub nodes: Vec<FieldNode>,
}

/// Pagination info.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Whether another page follows
    pub has_next_page: bool,
    /// Cursor of the last node
    pub end_cursor: Option<String>,
}

/// A field as listed in a page.
#[derive(Debug, Deserialize)]
pub struct FieldNode {
    /// Key
    pub name: Option<MoveJson>,
    /// Value
    pub value: Option<FieldValue>,
}

/// JSON rendering of a Move value.
#[derive(Debug, Deserialize)]
pub struct MoveJson {
    /// JSON form
    pub json: Option<Value>,
}

/// Field value, either a plain Move value or a wrapped object.
#[derive(Debug, Deserialize)]
pub struct FieldValue {
    /// JSON form for plain values
    pub json: Option<Value>,
    /// Contents for object values
    pub contents: Option<MoveJson>,
}

impl FieldValue {
    fn json(&self) -> Option<&Value> {
        self.json
            .as_ref()
            .or_else(|| self.contents.as_ref().and_then(|c| c.json.as_ref()))
    }

    /// Raw expiration string from the value JSON.
    pub fn expiration_raw(&self) -> Option<String> {
        self.json().and_then(expiration_from_json)
    }
}

impl FieldNode {
    /// Convert to a raw node, leaving missing parts as `None`.
    pub fn into_raw(self) -> RawNode {
        RawNode {
            name_labels: self
                .name
                .and_then(|n| n.json)
                .as_ref()
                .and_then(labels_from_json),
            expiration_raw: self.value.as_ref().and_then(FieldValue::expiration_raw),
        }
    }
}

/// `data` of a lookup query.
#[derive(Debug, Deserialize)]
pub struct LookupData {
    /// Table owner
    pub owner: Option<LookupOwner>,
}

/// Owner with a single field.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupOwner {
    /// The field, absent when the key does not exist
    pub dynamic_field: Option<LookupField>,
}

/// A looked-up field.
#[derive(Debug, Deserialize)]
pub struct LookupField {
    /// Value
    pub value: Option<FieldValue>,
}

/// Extract `labels` as a list of strings.
pub fn labels_from_json(json: &Value) -> Option<Vec<String>> {
    json.get("labels")?
        .as_array()?
        .iter()
        .map(|label| label.as_str().map(str::to_string))
        .collect()
}

/// Extract `expiration_timestamp_ms`, which may be a string or a number.
pub fn expiration_from_json(json: &Value) -> Option<String> {
    match json.get("expiration_timestamp_ms")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Encode key labels as base64 BCS of a `vector<String>` struct field.
pub fn encode_key_bcs(labels: &[String]) -> String {
    let mut bytes = Vec::new();
    write_uleb128(&mut bytes, labels.len() as u64);
    for label in labels {
        write_uleb128(&mut bytes, label.len() as u64);
        bytes.extend_from_slice(label.as_bytes());
    }
    BASE64.encode(bytes)
}

fn write_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_page_response() {
        let body = json!({
            "data": {
                "owner": {
                    "dynamicFields": {
                        "pageInfo": { "hasNextPage": true, "endCursor": "abc" },
                        "nodes": [
                            {
                                "name": { "json": { "labels": ["sui", "example"] } },
                                "value": { "json": { "expiration_timestamp_ms": "1700000000000" } }
                            },
                            {
                                "name": { "json": { "labels": ["sui", "obj"] } },
                                "value": { "contents": { "json": { "expiration_timestamp_ms": 42 } } }
                            },
                            { "name": null, "value": null }
                        ]
                    }
                }
            }
        });
        let response: GraphqlResponse<PageData> = serde_json::from_value(body).unwrap();
        let connection = response.data.unwrap().owner.unwrap().dynamic_fields;
        assert!(connection.page_info.has_next_page);
        assert_eq!(connection.page_info.end_cursor.as_deref(), Some("abc"));

        let nodes: Vec<RawNode> = connection.nodes.into_iter().map(FieldNode::into_raw).collect();
        assert_eq!(nodes[0], RawNode::new(&["sui", "example"], "1700000000000"));
        assert_eq!(nodes[1].expiration_raw.as_deref(), Some("42"));
        assert_eq!(nodes[2], RawNode::default());
    }

    #[test]
    fn test_labels_must_all_be_strings() {
        assert!(labels_from_json(&json!({ "labels": ["sui", 5] })).is_none());
        assert!(labels_from_json(&json!({ "other": [] })).is_none());
        assert_eq!(labels_from_json(&json!({ "labels": [] })), Some(Vec::new()));
    }

    #[test]
    fn test_parse_errors_and_missing_field() {
        let body = json!({ "data": null, "errors": [{ "message": "bad query" }] });
        let response: GraphqlResponse<LookupData> = serde_json::from_value(body).unwrap();
        assert!(response.data.is_none());
        assert_eq!(response.errors[0].message, "bad query");

        let body = json!({ "data": { "owner": { "dynamicField": null } } });
        let response: GraphqlResponse<LookupData> = serde_json::from_value(body).unwrap();
        assert!(response.data.unwrap().owner.unwrap().dynamic_field.is_none());
    }

    #[test]
    fn test_encode_key_bcs() {
        let labels = vec!["sui".to_string(), "ab".to_string()];
        let expected = BASE64.encode([2, 3, b's', b'u', b'i', 2, b'a', b'b']);
        assert_eq!(encode_key_bcs(&labels), expected);
    }

    #[test]
    fn test_uleb128() {
        let mut out = Vec::new();
        write_uleb128(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
    }

    #[test]
    fn test_variables_serialization() {
        let vars = PageVariables {
            parent_id: "0x1",
            first: 50,
            after: None,
        };
        let json = serde_json::to_value(&vars).unwrap();
        assert_eq!(json, json!({ "parentId": "0x1", "first": 50 }));

        let vars = LookupVariables {
            parent_id: "0x1",
            name: DynamicFieldName {
                type_: "0x2::domain::Domain".into(),
                bcs: "AA==".into(),
            },
        };
        let json = serde_json::to_value(&vars).unwrap();
        assert_eq!(json["name"]["type"], "0x2::domain::Domain");
    }
}
