// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// http.fetch — generic outbound HTTP(S) with a host allow-list.
//
// The allow-list matches a host exactly or as a parent domain (subdomains
// allowed). An empty allow-list permits every host.

use super::{string_arg, ParameterSchema, ToolError, ToolExecutor, ToolSpec};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Map, Value};

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: "http.fetch",
        description: "HTTP(S) fetch with host allow-list.",
        timeout_ms: 10_000,
        parameters: ParameterSchema {
            kind: "object",
            properties: json!({
                "url": {
                    "type": "string",
                    "description": "Full URL (must be in allow list)",
                },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                    "default": "GET",
                },
                "headers": { "type": "object", "additionalProperties": { "type": "string" } },
                "body": { "oneOf": [{ "type": "string" }, { "type": "object" }] },
            }),
            required: &["url"],
        },
    }
}

pub struct HttpFetchTool {
    http: reqwest::Client,
    allowed_hosts: Vec<String>,
}

impl HttpFetchTool {
    pub fn new(http: reqwest::Client, allowed_hosts: Vec<String>) -> Self {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            http,
            allowed_hosts,
        }
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.allowed_hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
    }
}

#[async_trait]
impl ToolExecutor for HttpFetchTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let url = string_arg(&args, "url")?;
        let parsed =
            reqwest::Url::parse(url).map_err(|e| ToolError::failed(format!("invalid url: {e}")))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ToolError::failed("url has no host"))?;
        if !self.host_allowed(host) {
            return Err(ToolError::failed(format!(
                "host not in allow-list: {host}"
            )));
        }

        let method = match args.get("method").and_then(Value::as_str).unwrap_or("GET") {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => return Err(ToolError::failed(format!("unsupported method '{other}'"))),
        };

        let mut headers = HeaderMap::new();
        if let Some(supplied) = args.get("headers").and_then(Value::as_object) {
            for (name, value) in supplied {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ToolError::failed(format!("invalid header name '{name}'")))?;
                let value = value
                    .as_str()
                    .and_then(|v| HeaderValue::from_str(v).ok())
                    .ok_or_else(|| ToolError::failed(format!("invalid header value for '{name:?}'")))?;
                headers.insert(name, value);
            }
        }

        let mut request = self.http.request(method, parsed).headers(headers);
        match args.get("body") {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(value @ Value::Object(_)) | Some(value @ Value::Array(_)) => {
                request = request.json(value)
            }
            _ => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::failed(e.to_string()))?;

        let status = response.status().as_u16();
        let response_headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), json!(v)))
            })
            .collect();

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let textual = content_type.contains("application/json")
            || content_type.starts_with("text/")
            || content_type.contains("application/xml")
            || content_type.contains("application/xhtml+xml");

        let text = if textual {
            Some(
                response
                    .text()
                    .await
                    .map_err(|e| ToolError::failed(e.to_string()))?,
            )
        } else {
            None
        };

        let parsed_json = if content_type.contains("application/json") {
            text.as_deref()
                .and_then(|t| serde_json::from_str::<Value>(t).ok())
        } else {
            None
        };

        Ok(json!({
            "status": status,
            "headers": response_headers,
            "text": text,
            "json": parsed_json,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_with_hosts(hosts: &[&str]) -> HttpFetchTool {
        HttpFetchTool::new(
            reqwest::Client::new(),
            hosts.iter().map(|h| h.to_string()).collect(),
        )
    }

    fn url_args(url: &str) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("url".to_string(), json!(url));
        args
    }

    // ---------------------------------------------------------------
    // 1. Allow-list semantics
    // ---------------------------------------------------------------

    #[test]
    fn exact_host_allowed() {
        let tool = tool_with_hosts(&["example.com"]);
        assert!(tool.host_allowed("example.com"));
        assert!(tool.host_allowed("EXAMPLE.COM"));
    }

    #[test]
    fn subdomains_allowed() {
        let tool = tool_with_hosts(&["example.com"]);
        assert!(tool.host_allowed("api.example.com"));
        assert!(tool.host_allowed("deep.api.example.com"));
    }

    #[test]
    fn lookalike_hosts_denied() {
        let tool = tool_with_hosts(&["example.com"]);
        assert!(!tool.host_allowed("notexample.com"));
        assert!(!tool.host_allowed("example.com.evil.net"));
    }

    #[test]
    fn empty_allow_list_permits_everything() {
        let tool = tool_with_hosts(&[]);
        assert!(tool.host_allowed("anything.invalid"));
    }

    #[test]
    fn allow_list_entries_normalized() {
        let tool = tool_with_hosts(&[" Example.COM ", ""]);
        assert!(tool.host_allowed("example.com"));
        assert_eq!(tool.allowed_hosts.len(), 1);
    }

    // ---------------------------------------------------------------
    // 2. Validation failures never touch the network
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn blocked_host_fails_in_band() {
        let tool = tool_with_hosts(&["example.com"]);
        let error = tool
            .run(url_args("https://attacker.net/steal"))
            .await
            .unwrap_err();
        assert!(matches!(error, ToolError::Failed(m) if m.contains("allow-list")));
    }

    #[tokio::test]
    async fn invalid_url_rejected() {
        let tool = tool_with_hosts(&[]);
        let error = tool.run(url_args("not a url")).await.unwrap_err();
        assert!(matches!(error, ToolError::Failed(m) if m.contains("invalid url")));
    }

    #[tokio::test]
    async fn unsupported_method_rejected() {
        let tool = tool_with_hosts(&[]);
        let mut args = url_args("https://example.com/");
        args.insert("method".to_string(), json!("TRACE"));
        let error = tool.run(args).await.unwrap_err();
        assert!(matches!(error, ToolError::Failed(m) if m.contains("unsupported method")));
    }

    #[tokio::test]
    async fn invalid_header_name_rejected() {
        let tool = tool_with_hosts(&[]);
        let mut args = url_args("https://example.com/");
        args.insert("headers".to_string(), json!({"bad name": "v"}));
        let error = tool.run(args).await.unwrap_err();
        assert!(matches!(error, ToolError::Failed(m) if m.contains("invalid header name")));
    }
}
