// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// finance.quote — near-real-time quote lookup for an equity/ETF/crypto
// symbol, backed by the Yahoo Finance chart API.

use super::{string_arg, ParameterSchema, ToolError, ToolExecutor, ToolSpec};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome Safari";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: "finance.quote",
        description: "Fetch a real-time/near-real-time quote for an equity/ETF/crypto symbol.",
        timeout_ms: 8_000,
        parameters: ParameterSchema {
            kind: "object",
            properties: json!({
                "symbol": {
                    "type": "string",
                    "description": "Ticker symbol, e.g., AAPL or BTC-USD",
                },
            }),
            required: &["symbol"],
        },
    }
}

pub struct FinanceQuoteTool {
    http: reqwest::Client,
    base_url: String,
    symbol_pattern: Regex,
}

impl FinanceQuoteTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL)
    }

    /// Point the tool at a different quote endpoint. Used by tests.
    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbol_pattern: Regex::new(r"^[A-Z.\-]{1,10}$").expect("symbol pattern is valid"),
        }
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}?range=1d&interval=1m",
            self.base_url, symbol
        )
    }
}

#[async_trait]
impl ToolExecutor for FinanceQuoteTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let symbol = string_arg(&args, "symbol")?;

        // Reject anything that is not a plain ticker before touching the
        // network; the symbol is interpolated into the request path.
        if !self.symbol_pattern.is_match(symbol) {
            return Err(ToolError::failed(format!("bad symbol '{symbol}'")));
        }

        let response = self
            .http
            .get(self.chart_url(symbol))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(
                reqwest::header::ACCEPT,
                "application/json,text/plain;q=0.9,*/*;q=0.8",
            )
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::failed("timeout")
                } else {
                    ToolError::failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "upstream {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::failed(e.to_string()))?;

        let meta = body
            .pointer("/chart/result/0/meta")
            .cloned()
            .unwrap_or(Value::Null);
        let price = meta
            .get("regularMarketPrice")
            .and_then(Value::as_f64)
            .or_else(|| meta.get("previousClose").and_then(Value::as_f64));

        Ok(json!({
            "symbol": symbol,
            "price": price,
            "currency": meta.get("currency").and_then(Value::as_str).unwrap_or("USD"),
            "exchange": meta.get("exchangeName").and_then(Value::as_str).unwrap_or(""),
            "ts": chrono::Utc::now().timestamp_millis(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
