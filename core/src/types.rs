//! Request and response payloads for the service endpoints.
//!
//! # Design
//! These are plain serde DTOs. Optional fields are skipped when unset so the
//! service applies its own defaults. Attribute values are kept as
//! `serde_json::Value` because their shape is chosen by the caller's schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::Filter;

/// Distance function used to compare vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[serde(rename = "cosine_distance")]
    Cosine,
    #[serde(rename = "euclidean_squared")]
    EuclideanSquared,
}

/// Data type of a document attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "uint")]
    Uint,
    #[serde(rename = "uuid")]
    Uuid,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "[]string")]
    StringArray,
    #[serde(rename = "[]uint")]
    UintArray,
    #[serde(rename = "[]uuid")]
    UuidArray,
}

/// Full-text (BM25) indexing options for a string attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullTextSearchParams {
    /// Stemming and stopword language; the service defaults to english.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stemming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_stop_words: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
}

/// Schema entry for one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
    /// `Some(Default::default())` enables full-text search with defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text_search: Option<FullTextSearchParams>,
}

impl Attribute {
    pub fn new(kind: AttributeType) -> Self {
        Self {
            kind,
            filterable: None,
            full_text_search: None,
        }
    }
}

/// Attribute name to schema entry.
pub type Schema = BTreeMap<String, Attribute>;

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespacesRequest {
    pub prefix: Option<String>,
    /// Page size; the service defaults to 1000.
    pub page_size: Option<u32>,
    /// Cursor from a previous page; omit for the first page.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacesResponse {
    pub namespaces: Vec<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Upsert / delete
// ---------------------------------------------------------------------------

/// One document to write. A document without a vector deletes its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upsert {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
}

impl Upsert {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector: Some(vector),
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub(crate) fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector: None,
            attributes: None,
        }
    }

    pub(crate) fn has_vector(&self) -> bool {
        self.vector.as_ref().is_some_and(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_metric: Option<DistanceMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upserts: Vec<Upsert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_from_namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteByFilterRequest {
    /// Written as `null` when absent; the service then rejects the request.
    #[serde(rename = "delete_by_filter")]
    pub filter: Option<Filter>,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Which attributes to return with each result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IncludeAttributes {
    All(bool),
    Named(Vec<String>),
}

/// Vector, BM25 or filter-only search.
///
/// Set `vector` + `distance_metric` for vector search, `rank_by` for BM25,
/// or neither for filter-only search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_metric: Option<DistanceMetric>,
    /// e.g. `["text", "BM25", "query string"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_by: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_vectors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_attributes: Option<IncludeAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub dist: f64,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, Value>>,
}

// ---------------------------------------------------------------------------
// Export / recall / warm cache
// ---------------------------------------------------------------------------

/// One page of documents in column layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub vectors: Vec<Vec<f32>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallResponse {
    pub avg_recall: f64,
    pub avg_exhaustive_count: f64,
    pub avg_ann_count: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmCacheResult {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_query_request_serializes_to_empty_object() {
        let req = QueryRequest::default();
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({}));
    }

    #[test]
    fn query_request_embeds_filter() {
        let req = QueryRequest {
            vector: Some(vec![0.5, 1.0]),
            distance_metric: Some(DistanceMetric::Cosine),
            top_k: Some(3),
            include_attributes: Some(IncludeAttributes::Named(vec!["title".to_string()])),
            filters: Some(Filter::eq("lang", "en")),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "vector": [0.5, 1.0],
                "distance_metric": "cosine_distance",
                "top_k": 3,
                "include_attributes": ["title"],
                "filters": ["lang", "Eq", "en"]
            })
        );
    }

    #[test]
    fn include_all_attributes_is_a_bool() {
        let req = QueryRequest {
            include_vectors: true,
            include_attributes: Some(IncludeAttributes::All(true)),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"include_vectors": true, "include_attributes": true})
        );
    }

    #[test]
    fn delete_by_filter_keeps_null() {
        let req = DeleteByFilterRequest { filter: None };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"delete_by_filter":null}"#);
    }

    #[test]
    fn schema_serializes_wire_type_names() {
        let mut schema = Schema::new();
        schema.insert("tags".to_string(), Attribute::new(AttributeType::StringArray));
        schema.insert(
            "body".to_string(),
            Attribute {
                kind: AttributeType::String,
                filterable: Some(false),
                full_text_search: Some(FullTextSearchParams::default()),
            },
        );
        assert_eq!(
            serde_json::to_value(&schema).unwrap(),
            json!({
                "body": {"type": "string", "filterable": false, "full_text_search": {}},
                "tags": {"type": "[]string"}
            })
        );
    }

    #[test]
    fn upsert_omits_missing_vector() {
        let req = UpsertRequest {
            upserts: vec![Upsert::tombstone("7")],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"upserts": [{"id": "7"}]})
        );
    }

    #[test]
    fn query_result_tolerates_missing_optionals() {
        let result: QueryResult = serde_json::from_str(r#"{"id":"a","dist":0.25}"#).unwrap();
        assert_eq!(result.id, "a");
        assert_eq!(result.dist, 0.25);
        assert!(result.vector.is_none());
        assert!(result.attributes.is_none());
    }

    #[test]
    fn namespaces_response_without_cursor() {
        let resp: NamespacesResponse =
            serde_json::from_str(r#"{"namespaces":[{"id":"a"},{"id":"b"}]}"#).unwrap();
        assert_eq!(resp.namespaces.len(), 2);
        assert!(resp.next_cursor.is_none());
    }
}
