// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// pdf.parse — parse a local PDF into plain text, optionally split per page.
//
// The actual text extraction is an opaque collaborator behind
// `DocumentTextExtractor`; this module owns only the boundary shape:
// extracted text uses form-feed characters as page separators, and the
// tool turns that into numbered, trimmed, non-empty pages.

use super::{bool_arg, string_arg, ParameterSchema, ToolError, ToolExecutor, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: "pdf.parse",
        description: "Parse a local PDF into plain text; optionally split per page.",
        timeout_ms: 15_000,
        parameters: ParameterSchema {
            kind: "object",
            properties: json!({
                "file_path": { "type": "string" },
                "split_by_pages": { "type": "boolean", "default": true },
            }),
            required: &["file_path"],
        },
    }
}

// ---------------------------------------------------------------------------
// Trait: DocumentTextExtractor (opaque collaborator)
// ---------------------------------------------------------------------------

/// Extracts the full text of a document on disk. Pages are separated by
/// form-feed characters in the returned text.
pub trait DocumentTextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, ToolError>;
}

/// Production extractor backed by the `pdf-extract` crate.
pub struct PdfDocumentExtractor;

impl DocumentTextExtractor for PdfDocumentExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, ToolError> {
        pdf_extract::extract_text(path)
            .map_err(|e| ToolError::failed(format!("failed to parse {}: {e}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct PdfParseTool {
    extractor: Arc<dyn DocumentTextExtractor>,
}

impl PdfParseTool {
    pub fn new(extractor: Arc<dyn DocumentTextExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl ToolExecutor for PdfParseTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let path = PathBuf::from(string_arg(&args, "file_path")?);
        let split_by_pages = bool_arg(&args, "split_by_pages", true);

        // Extraction is blocking file/CPU work; keep it off the runtime.
        let extractor = self.extractor.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract_text(&path))
            .await
            .map_err(|e| ToolError::failed(format!("extraction task failed: {e}")))??;

        if !split_by_pages {
            return Ok(json!({ "text": text }));
        }

        let pages: Vec<Value> = text
            .split('\u{c}')
            .enumerate()
            .map(|(index, page_text)| (index + 1, page_text.trim()))
            .filter(|(_, page_text)| !page_text.is_empty())
            .map(|(page, page_text)| json!({ "page": page, "text": page_text }))
            .collect();

        Ok(json!({ "pages": pages }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
