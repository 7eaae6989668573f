// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// vec.upsert / vec.query — document upsert and semantic query against an
// opaque vector store. One collection per deployment, taken from config.
//
// The store itself is a collaborator behind `VectorStore`; the production
// implementation speaks the Chroma REST API.

use super::{string_arg, usize_arg, ParameterSchema, ToolError, ToolExecutor, ToolSpec};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const DEFAULT_TOP_K: usize = 4;

pub fn upsert_spec() -> ToolSpec {
    ToolSpec {
        name: "vec.upsert",
        description: "Upsert documents into the configured vector collection.",
        timeout_ms: 10_000,
        parameters: ParameterSchema {
            kind: "object",
            properties: json!({
                "documents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "text": { "type": "string" },
                            "metadata": { "type": "object" },
                        },
                        "required": ["id", "text"],
                    },
                },
            }),
            required: &["documents"],
        },
    }
}

pub fn query_spec() -> ToolSpec {
    ToolSpec {
        name: "vec.query",
        description: "Semantic query in the configured vector collection.",
        timeout_ms: 10_000,
        parameters: ParameterSchema {
            kind: "object",
            properties: json!({
                "query_text": { "type": "string", "description": "The text to search for" },
                "top_k": { "type": "number", "default": DEFAULT_TOP_K },
            }),
            required: &["query_text"],
        },
    }
}

// ---------------------------------------------------------------------------
// Trait: VectorStore (opaque collaborator)
// ---------------------------------------------------------------------------

/// One document to upsert.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentInput {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Nearest-neighbour query result, one entry per returned document.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Value>,
    pub distances: Vec<f64>,
}

/// Opaque upsert/query backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, documents: &[DocumentInput]) -> Result<usize, ToolError>;
    async fn query(&self, query_text: &str, top_k: usize) -> Result<QueryResult, ToolError>;
}

// ---------------------------------------------------------------------------
// Chroma REST implementation
// ---------------------------------------------------------------------------

/// Vector store backed by a Chroma server. The collection is created on
/// first use (`get_or_create`).
pub struct ChromaStore {
    http: reqwest::Client,
    base_url: String,
    collection: String,
}

impl ChromaStore {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
        }
    }

    /// Resolve the collection id, creating the collection if absent.
    async fn collection_id(&self) -> Result<String, ToolError> {
        let response = self
            .http
            .post(format!("{}/api/v1/collections", self.base_url))
            .json(&json!({ "name": self.collection, "get_or_create": true }))
            .send()
            .await
            .map_err(|e| ToolError::failed(format!("vector store unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "vector store returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::failed(e.to_string()))?;
        body.get("id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| ToolError::failed("vector store response missing collection id"))
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn upsert(&self, documents: &[DocumentInput]) -> Result<usize, ToolError> {
        let collection_id = self.collection_id().await?;

        let payload = json!({
            "ids": documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "documents": documents.iter().map(|d| d.text.as_str()).collect::<Vec<_>>(),
            "metadatas": documents
                .iter()
                .map(|d| if d.metadata.is_null() { json!({}) } else { d.metadata.clone() })
                .collect::<Vec<_>>(),
        });

        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{collection_id}/add",
                self.base_url
            ))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolError::failed(format!("vector store unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "vector store upsert failed with HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(documents.len())
    }

    async fn query(&self, query_text: &str, top_k: usize) -> Result<QueryResult, ToolError> {
        let collection_id = self.collection_id().await?;

        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{collection_id}/query",
                self.base_url
            ))
            .json(&json!({ "query_texts": [query_text], "n_results": top_k }))
            .send()
            .await
            .map_err(|e| ToolError::failed(format!("vector store unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "vector store query failed with HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::failed(e.to_string()))?;

        // Chroma nests each field one level per query text; we send one.
        let strings = |key: &str| -> Vec<String> {
            body.pointer(&format!("/{key}/0"))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToOwned::to_owned)
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(QueryResult {
            ids: strings("ids"),
            documents: strings("documents"),
            metadatas: body
                .pointer("/metadatas/0")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            distances: body
                .pointer("/distances/0")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_f64).collect())
                .unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

pub struct VecUpsertTool {
    store: Arc<dyn VectorStore>,
}

impl VecUpsertTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for VecUpsertTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let documents: Vec<DocumentInput> = args
            .get("documents")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ToolError::failed(format!("invalid documents: {e}")))?
            .unwrap_or_default();

        if documents.is_empty() {
            return Ok(json!({ "count": 0 }));
        }

        let count = self.store.upsert(&documents).await?;
        Ok(json!({ "count": count }))
    }
}

pub struct VecQueryTool {
    store: Arc<dyn VectorStore>,
}

impl VecQueryTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for VecQueryTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let query_text = string_arg(&args, "query_text")?;
        let top_k = usize_arg(&args, "top_k", DEFAULT_TOP_K).max(1);

        let result = self.store.query(query_text, top_k).await?;
        Ok(json!({
            "ids": result.ids,
            "documents": result.documents,
            "metadatas": result.metadatas,
            "distances": result.distances,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Store recording calls and replaying canned results.
    struct RecordingStore {
        upserted: Mutex<Vec<DocumentInput>>,
        queries: Mutex<Vec<(String, usize)>>,
    }

    impl RecordingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                upserted: Mutex::new(Vec::new()),
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, documents: &[DocumentInput]) -> Result<usize, ToolError> {
            self.upserted.lock().unwrap().extend_from_slice(documents);
            Ok(documents.len())
        }

        async fn query(&self, query_text: &str, top_k: usize) -> Result<QueryResult, ToolError> {
            self.queries
                .lock()
                .unwrap()
                .push((query_text.to_string(), top_k));
            Ok(QueryResult {
                ids: vec!["doc-1".to_string()],
                documents: vec!["matched text".to_string()],
                metadatas: vec![json!({"source": "test"})],
                distances: vec![0.12],
            })
        }
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // ---------------------------------------------------------------
    // 1. Empty document list short-circuits without touching the store
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn empty_upsert_never_calls_store() {
        let store = RecordingStore::new();
        let tool = VecUpsertTool::new(store.clone());

        let result = tool
            .run(args(&[("documents", json!([]))]))
            .await
            .unwrap();
        assert_eq!(result, json!({ "count": 0 }));
        assert!(store.upserted.lock().unwrap().is_empty());
    }

    // ---------------------------------------------------------------
    // 2. Documents parsed and forwarded
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn upsert_forwards_documents() {
        let store = RecordingStore::new();
        let tool = VecUpsertTool::new(store.clone());

        let result = tool
            .run(args(&[(
                "documents",
                json!([
                    { "id": "a", "text": "alpha" },
                    { "id": "b", "text": "beta", "metadata": { "page": 2 } },
                ]),
            )]))
            .await
            .unwrap();

        assert_eq!(result, json!({ "count": 2 }));
        let upserted = store.upserted.lock().unwrap();
        assert_eq!(upserted[0].id, "a");
        assert_eq!(upserted[1].metadata, json!({ "page": 2 }));
    }

    #[tokio::test]
    async fn malformed_documents_fail_in_band() {
        let tool = VecUpsertTool::new(RecordingStore::new());
        let error = tool
            .run(args(&[("documents", json!([{ "text": "no id" }]))]))
            .await
            .unwrap_err();
        assert!(matches!(error, ToolError::Failed(m) if m.contains("invalid documents")));
    }

    // ---------------------------------------------------------------
    // 3. Query defaults and result shape
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn query_defaults_top_k() {
        let store = RecordingStore::new();
        let tool = VecQueryTool::new(store.clone());

        let result = tool
            .run(args(&[("query_text", json!("revenue growth"))]))
            .await
            .unwrap();

        assert_eq!(
            store.queries.lock().unwrap()[0],
            ("revenue growth".to_string(), DEFAULT_TOP_K)
        );
        assert_eq!(result["ids"], json!(["doc-1"]));
        assert_eq!(result["distances"], json!([0.12]));
    }

    #[tokio::test]
    async fn query_honours_explicit_top_k() {
        let store = RecordingStore::new();
        let tool = VecQueryTool::new(store.clone());

        tool.run(args(&[
            ("query_text", json!("q")),
            ("top_k", json!(9)),
        ]))
        .await
        .unwrap();

        assert_eq!(store.queries.lock().unwrap()[0].1, 9);
    }

    #[tokio::test]
    async fn zero_top_k_clamped_to_one() {
        let store = RecordingStore::new();
        let tool = VecQueryTool::new(store.clone());

        tool.run(args(&[("query_text", json!("q")), ("top_k", json!(0))]))
            .await
            .unwrap();

        assert_eq!(store.queries.lock().unwrap()[0].1, 1);
    }
}
