// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// web.search — fetch up to a handful of web pages and extract their main
// content. A failing URL is skipped, never fatal for the batch.
//
// Content extraction is an opaque collaborator behind `PageExtractor`:
// the default implementation is a pattern-based reduction (drop
// script/style/nav/footer, prefer <article>, fall back to paragraphs),
// replaceable wholesale without touching the tool.

use super::{ParameterSchema, ToolError, ToolExecutor, ToolSpec};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome Safari";
const PAGE_TIMEOUT: Duration = Duration::from_secs(8);

/// An article shorter than this is assumed to be a teaser; paragraphs win.
const MIN_ARTICLE_CHARS: usize = 400;

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: "web.search",
        description: "Fetch and extract main content from up to 3 webpages.",
        timeout_ms: 10_000,
        parameters: ParameterSchema {
            kind: "object",
            properties: json!({
                "urls": { "type": "array", "maxItems": 3, "items": { "type": "string" } },
            }),
            required: &["urls"],
        },
    }
}

// ---------------------------------------------------------------------------
// Trait: PageExtractor (opaque collaborator)
// ---------------------------------------------------------------------------

/// Title and main text of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub title: String,
    pub text: String,
}

pub trait PageExtractor: Send + Sync {
    fn extract(&self, html: &str) -> PageContent;
}

/// Default extractor: regex-based tag stripping with an article-first
/// preference. Patterns compile once at construction.
pub struct TagStripExtractor {
    title: Regex,
    noise_blocks: Vec<Regex>,
    article: Regex,
    paragraph: Regex,
    tag: Regex,
}

impl TagStripExtractor {
    pub fn new() -> Self {
        let block = |tag: &str| {
            Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}\s*>")).expect("block pattern is valid")
        };
        Self {
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").expect("title pattern is valid"),
            noise_blocks: ["script", "style", "nav", "footer"]
                .iter()
                .map(|tag| block(tag))
                .collect(),
            article: Regex::new(r"(?is)<article\b[^>]*>(.*?)</article\s*>")
                .expect("article pattern is valid"),
            paragraph: Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").expect("paragraph pattern is valid"),
            tag: Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"),
        }
    }

    fn strip_tags(&self, fragment: &str) -> String {
        decode_entities(&self.tag.replace_all(fragment, " "))
    }
}

impl Default for TagStripExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PageExtractor for TagStripExtractor {
    fn extract(&self, html: &str) -> PageContent {
        let title = self
            .title
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| collapse_whitespace(&self.strip_tags(m.as_str())))
            .unwrap_or_default();

        let mut body = html.to_string();
        for pattern in &self.noise_blocks {
            body = pattern.replace_all(&body, " ").into_owned();
        }

        let article = self
            .article
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| collapse_whitespace(&self.strip_tags(m.as_str())))
            .unwrap_or_default();

        let text = if article.len() > MIN_ARTICLE_CHARS {
            article
        } else {
            let paragraphs: Vec<String> = self
                .paragraph
                .captures_iter(&body)
                .filter_map(|c| c.get(1))
                .map(|m| collapse_whitespace(&self.strip_tags(m.as_str())))
                .filter(|p| !p.is_empty())
                .collect();

            if !paragraphs.is_empty() {
                paragraphs.join("\n")
            } else if !article.is_empty() {
                article
            } else {
                collapse_whitespace(&self.strip_tags(&body))
            }
        };

        PageContent { title, text }
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate at a char boundary, appending an ellipsis when cut.
fn cap_text(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut capped: String = text.chars().take(cap).collect();
    capped.push('…');
    capped
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct WebSearchTool {
    http: reqwest::Client,
    extractor: Arc<dyn PageExtractor>,
    page_cap: usize,
    text_cap: usize,
}

impl WebSearchTool {
    pub fn new(http: reqwest::Client, page_cap: usize, text_cap: usize) -> Self {
        Self::with_extractor(http, Arc::new(TagStripExtractor::new()), page_cap, text_cap)
    }

    pub fn with_extractor(
        http: reqwest::Client,
        extractor: Arc<dyn PageExtractor>,
        page_cap: usize,
        text_cap: usize,
    ) -> Self {
        Self {
            http,
            extractor,
            page_cap,
            text_cap,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String, String> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .timeout(PAGE_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "timeout".to_string()
                } else {
                    e.to_string()
                }
            })?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ToolExecutor for WebSearchTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let urls: Vec<&str> = args
            .get("urls")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::failed("argument 'urls' must be an array of strings"))?
            .iter()
            .filter_map(Value::as_str)
            .collect();

        let mut items = Vec::new();
        for url in urls.into_iter().take(self.page_cap) {
            let html = match self.fetch_page(url).await {
                Ok(html) => html,
                Err(reason) => {
                    // One bad URL never fails the batch.
                    tracing::warn!(url, reason = %reason, "web.search fetch failed");
                    continue;
                }
            };

            let content = self.extractor.extract(&html);
            let text = cap_text(&content.text, self.text_cap);
            let text = if content.title.is_empty() && text.is_empty() {
                "No extractable content.".to_string()
            } else {
                text
            };
            items.push(json!({ "url": url, "title": content.title, "text": text }));
        }

        Ok(json!({ "items": items }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
