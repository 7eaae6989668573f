// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// Tool catalog and dispatcher
//
// A fixed, declarative registry of named operations with uniform
// validation, timeout, and error-shape guarantees. The catalog is built
// once at startup and read-only afterwards; concrete operations are
// injected executors, so the dispatcher is agnostic to their internals.
//
// Error shape contract: catalog and validation failures (unknown tool,
// missing required argument) are *faults* raised to the HTTP layer;
// everything that happens inside an operation — including the timeout
// race — is *data*, returned in-band as `{ok: false, error}`.

pub mod finance;
pub mod http;
pub mod pdf;
pub mod vector;
pub mod web;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Discovery metadata reported alongside the catalog.
pub const SERVER_NAME: &str = "tickertape-mcp";
pub const MCP_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Specifications
// ---------------------------------------------------------------------------

/// Minimal JSON-Schema-shaped parameter description: enough to validate
/// required-parameter presence and to publish for discovery.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: Value,
    pub required: &'static [&'static str],
}

/// One tool's immutable, process-wide specification.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub timeout_ms: u64,
    pub parameters: ParameterSchema,
}

impl ToolSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// In-band operation failure: data, not a fault.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The declared timeout elapsed before the operation finished. The
    /// operation itself is not cancelled — this bounds the wait, not the
    /// execution.
    #[error("{tool} timeout after {ms}ms")]
    Timeout { tool: String, ms: u64 },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Catalog/validation failure: a fault raised to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool} is missing required argument '{field}'")]
    BadArguments { tool: String, field: String },
}

/// Structured outcome of one invocation.
///
/// Serializes to `{"ok": true, "data": …}` or `{"ok": false, "error": …}`.
#[derive(Debug)]
pub enum ToolResult {
    Success(Value),
    Failure(ToolError),
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }
}

impl Serialize for ToolResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            ToolResult::Success(data) => {
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("data", data)?;
            }
            ToolResult::Failure(error) => {
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", &error.to_string())?;
            }
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Trait: ToolExecutor (pluggable operation)
// ---------------------------------------------------------------------------

/// A pluggable operation: arguments in, JSON value out or an error.
///
/// Implementations must be Send + Sync; the catalog shares them across
/// concurrent invocations via `Arc`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, ToolError>;
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub struct CatalogEntry {
    pub spec: ToolSpec,
    executor: Arc<dyn ToolExecutor>,
}

impl CatalogEntry {
    pub fn new(spec: ToolSpec, executor: Arc<dyn ToolExecutor>) -> Self {
        Self { spec, executor }
    }
}

/// The process-wide tool registry. Immutable after construction and safe
/// for unsynchronized concurrent reads.
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<&'static str, usize>,
}

impl ToolCatalog {
    /// Build a catalog. Tool names must be globally unique.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            let previous = index.insert(entry.spec.name, position);
            assert!(
                previous.is_none(),
                "duplicate tool name in catalog: {}",
                entry.spec.name
            );
        }
        Self { entries, index }
    }

    /// The production catalog: market quotes, outbound fetch, document
    /// parsing, vector store access, and web page extraction.
    pub fn standard(http: reqwest::Client, tools: &crate::config::ToolsConfig) -> Self {
        let store: Arc<dyn vector::VectorStore> = Arc::new(vector::ChromaStore::new(
            http.clone(),
            &tools.chroma_url,
            &tools.collection,
        ));

        Self::new(vec![
            CatalogEntry::new(
                finance::spec(),
                Arc::new(finance::FinanceQuoteTool::new(http.clone())),
            ),
            CatalogEntry::new(
                http::spec(),
                Arc::new(http::HttpFetchTool::new(
                    http.clone(),
                    tools.allowed_hosts.clone(),
                )),
            ),
            CatalogEntry::new(
                pdf::spec(),
                Arc::new(pdf::PdfParseTool::new(Arc::new(pdf::PdfDocumentExtractor))),
            ),
            CatalogEntry::new(
                vector::upsert_spec(),
                Arc::new(vector::VecUpsertTool::new(store.clone())),
            ),
            CatalogEntry::new(
                vector::query_spec(),
                Arc::new(vector::VecQueryTool::new(store)),
            ),
            CatalogEntry::new(
                web::spec(),
                Arc::new(web::WebSearchTool::new(
                    http,
                    tools.web_page_cap,
                    tools.web_text_cap,
                )),
            ),
        ])
    }

    /// Read-only view of every specification, in catalog order.
    pub fn specs(&self) -> Vec<&ToolSpec> {
        self.entries.iter().map(|entry| &entry.spec).collect()
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name).map(|&position| &self.entries[position])
    }

    /// Validate and execute one invocation.
    ///
    /// Required-parameter checks run before any execution side effect.
    /// Execution races the tool's declared timeout; the losing future is
    /// dropped, its eventual result discarded.
    pub async fn invoke(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<ToolResult, DispatchError> {
        let entry = self
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        for required in entry.spec.parameters.required {
            if !args.contains_key(*required) {
                return Err(DispatchError::BadArguments {
                    tool: name.to_string(),
                    field: (*required).to_string(),
                });
            }
        }

        match tokio::time::timeout(entry.spec.timeout(), entry.executor.run(args)).await {
            Ok(Ok(data)) => Ok(ToolResult::Success(data)),
            Ok(Err(error)) => Ok(ToolResult::Failure(error)),
            Err(_) => Ok(ToolResult::Failure(ToolError::Timeout {
                tool: name.to_string(),
                ms: entry.spec.timeout_ms,
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Argument helpers shared by executors
// ---------------------------------------------------------------------------

pub(crate) fn string_arg<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::failed(format!("argument '{key}' must be a string")))
}

pub(crate) fn bool_arg(args: &Map<String, Value>, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn usize_arg(args: &Map<String, Value>, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
