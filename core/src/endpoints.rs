//! Typed wrappers over `Client::execute`, one per service endpoint.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::Client;
use crate::context::CallContext;
use crate::envelope::{decode_envelope, HTTP_OK};
use crate::error::{Error, Result, ResultExt};
use crate::types::{
    DeleteByFilterRequest, ExportResponse, NamespacesRequest, NamespacesResponse, QueryRequest,
    QueryResult, RecallRequest, RecallResponse, Upsert, UpsertRequest, WarmCacheResult,
};

impl Client {
    /// List namespaces, optionally filtered by prefix, one page at a time.
    pub fn namespaces(
        &self,
        ctx: &CallContext,
        request: &NamespacesRequest,
    ) -> Result<NamespacesResponse> {
        let mut query = Vec::new();
        if let Some(page_size) = request.page_size.filter(|n| *n > 0) {
            query.push(("page_size", page_size.to_string()));
        }
        if let Some(prefix) = request.prefix.as_deref().filter(|p| !p.is_empty()) {
            query.push(("prefix", prefix.to_string()));
        }
        if let Some(cursor) = request.cursor.as_deref().filter(|c| !c.is_empty()) {
            query.push(("cursor", cursor.to_string()));
        }

        self.get(ctx, "/v1/vectors", &query)
            .and_then(|body| parse_json(&body))
            .context("list namespaces")
    }

    /// Create or update documents. Every document must carry a vector; use
    /// `delete` to remove documents.
    pub fn upsert(&self, ctx: &CallContext, namespace: &str, request: &UpsertRequest) -> Result<()> {
        if let Some(doc) = request.upserts.iter().find(|u| !u.has_vector()) {
            return Err(Error::Validation(format!(
                "document {:?} has no vector; deletion must be performed using delete, not upsert",
                doc.id
            )));
        }
        self.write_documents(ctx, namespace, request)
            .context("upsert documents")
    }

    /// Delete documents by id.
    pub fn delete<I, S>(&self, ctx: &CallContext, namespace: &str, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = UpsertRequest {
            upserts: ids.into_iter().map(Upsert::tombstone).collect(),
            ..Default::default()
        };
        self.write_documents(ctx, namespace, &request)
            .context("delete documents")
    }

    /// Delete every document matching `request.filter`.
    pub fn delete_by_filter(
        &self,
        ctx: &CallContext,
        namespace: &str,
        request: &DeleteByFilterRequest,
    ) -> Result<()> {
        self.delete_matching(ctx, namespace, request)
            .context("delete by filter")
    }

    /// Vector, BM25 or filter-only search.
    pub fn query(
        &self,
        ctx: &CallContext,
        namespace: &str,
        request: &QueryRequest,
    ) -> Result<Vec<QueryResult>> {
        self.run_query(ctx, namespace, request)
            .context("query documents")
    }

    /// Fetch one page of documents. Pass the previous page's `next_cursor`
    /// to continue; a 202 "not ready" answer is retried like any transient
    /// failure.
    pub fn export(
        &self,
        ctx: &CallContext,
        namespace: &str,
        cursor: Option<&str>,
    ) -> Result<ExportResponse> {
        self.export_page(ctx, namespace, cursor)
            .context("export documents")
    }

    /// Measure ANN recall against exhaustive search.
    pub fn recall(
        &self,
        ctx: &CallContext,
        namespace: &str,
        request: &RecallRequest,
    ) -> Result<RecallResponse> {
        self.measure_recall(ctx, namespace, request)
            .context("measure recall")
    }

    /// Hint that the namespace's cache should be warmed.
    pub fn warm_cache(&self, ctx: &CallContext, namespace: &str) -> Result<WarmCacheResult> {
        self.hint_cache_warm(ctx, namespace).context("warm cache")
    }

    fn delete_matching(
        &self,
        ctx: &CallContext,
        namespace: &str,
        request: &DeleteByFilterRequest,
    ) -> Result<()> {
        let path = format!("/v1/namespaces/{}", namespace_segment(namespace)?);
        self.post(ctx, &path, to_json(request)?)?;
        Ok(())
    }

    fn run_query(
        &self,
        ctx: &CallContext,
        namespace: &str,
        request: &QueryRequest,
    ) -> Result<Vec<QueryResult>> {
        let path = format!("/v1/vectors/{}/query", namespace_segment(namespace)?);
        let body = self.post(ctx, &path, to_json(request)?)?;
        parse_json(&body)
    }

    fn export_page(
        &self,
        ctx: &CallContext,
        namespace: &str,
        cursor: Option<&str>,
    ) -> Result<ExportResponse> {
        let path = format!("/v1/vectors/{}", namespace_segment(namespace)?);
        let mut query = Vec::new();
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            query.push(("cursor", cursor.to_string()));
        }
        let body = self.get(ctx, &path, &query)?;
        parse_json(&body)
    }

    fn measure_recall(
        &self,
        ctx: &CallContext,
        namespace: &str,
        request: &RecallRequest,
    ) -> Result<RecallResponse> {
        let path = format!("/v1/vectors/{}/_debug/recall", namespace_segment(namespace)?);
        let body = self.post(ctx, &path, to_json(request)?)?;
        parse_json(&body)
    }

    fn hint_cache_warm(&self, ctx: &CallContext, namespace: &str) -> Result<WarmCacheResult> {
        let path = format!("/v1/namespaces/{}/hint_cache_warm", namespace_segment(namespace)?);
        let body = self.get(ctx, &path, &[])?;
        parse_json(&body)
    }

    fn write_documents(
        &self,
        ctx: &CallContext,
        namespace: &str,
        request: &UpsertRequest,
    ) -> Result<()> {
        let path = format!("/v1/vectors/{}", namespace_segment(namespace)?);
        let body = self.post(ctx, &path, to_json(request)?)?;
        // Writes acknowledge with an envelope even on 200.
        decode_envelope(HTTP_OK, &body)
    }
}

/// Validate a namespace for use as a single path segment.
fn namespace_segment(namespace: &str) -> Result<&str> {
    if namespace.is_empty() {
        return Err(Error::Validation("namespace must not be empty".to_string()));
    }
    if namespace.contains('/') {
        return Err(Error::Validation(format!(
            "namespace {namespace:?} must not contain '/'"
        )));
    }
    Ok(namespace)
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::Serialization)
}

/// Parse the payload of a 200 response.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| Error::Deserialization {
        http_status: HTTP_OK,
        raw_body: String::from_utf8_lossy(body).into_owned(),
        source,
    })
}
