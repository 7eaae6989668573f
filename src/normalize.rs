// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// Upstream token normalizer
//
// Interprets one decoded NDJSON line from the model backend. Backends
// disagree about where the token lives: chat-style endpoints report the
// full message content so far, generate-style endpoints report a free-form
// completion fragment, and some report an explicit incremental delta. The
// normalizer resolves all three through an ordered list of shape matchers
// and tracks cumulative emitted text so full-content frames can be reduced
// to their genuinely new suffix.

use serde_json::Value;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of normalizing one NDJSON line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// The line was not valid JSON. Protocol noise; the session continues.
    Noise,
    /// The backend declared an error. Session-terminating.
    UpstreamError(String),
    /// A well-formed frame: zero or one token, plus whether the backend
    /// signalled that generation is finished.
    Content {
        token: Option<String>,
        finished: bool,
    },
}

/// A token-bearing field recognized in an upstream frame, tagged with how
/// its content must be interpreted. Matchers run in a fixed order; adding
/// support for a new backend shape means adding a variant and a matcher,
/// not reshuffling implicit fallbacks.
#[derive(Debug, Clone, PartialEq)]
enum TokenShape {
    /// `delta.content`: a fragment to append verbatim.
    Incremental(String),
    /// `message.content`: the full generated text so far.
    Cumulative(String),
    /// `response`: a free-form completion fragment.
    Completion(String),
}

fn match_token_shape(value: &Value) -> Option<TokenShape> {
    if let Some(delta) = value.pointer("/delta/content").and_then(Value::as_str) {
        return Some(TokenShape::Incremental(delta.to_string()));
    }
    if let Some(full) = value.pointer("/message/content").and_then(Value::as_str) {
        return Some(TokenShape::Cumulative(full.to_string()));
    }
    if let Some(fragment) = value.get("response").and_then(Value::as_str) {
        return Some(TokenShape::Completion(fragment.to_string()));
    }
    None
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Per-session normalizer holding the cumulative-emitted-text accumulator.
#[derive(Debug, Default)]
pub struct TokenNormalizer {
    emitted: String,
}

impl TokenNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one decoded line.
    ///
    /// Tokens are never trimmed: a token may legitimately be a single
    /// leading space. Empty extracted tokens are dropped (a token event
    /// is a non-empty fragment), which is also what keeps a repeated
    /// full-content frame from re-emitting already-seen text.
    pub fn apply(&mut self, line: &str) -> LineOutcome {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineOutcome::Noise;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => return LineOutcome::Noise,
        };

        // An explicit error field always overrides and terminates.
        if let Some(error) = value.get("error") {
            let message = match error.as_str() {
                Some(s) => s.to_string(),
                None => error.to_string(),
            };
            return LineOutcome::UpstreamError(message);
        }

        let token = match match_token_shape(&value) {
            Some(TokenShape::Incremental(fragment)) => {
                self.emitted.push_str(&fragment);
                Some(fragment)
            }
            Some(TokenShape::Cumulative(full)) => Some(self.delta_from_cumulative(&full)),
            Some(TokenShape::Completion(fragment)) => {
                self.emitted.push_str(&fragment);
                Some(fragment)
            }
            None => None,
        };

        let finished = value.get("done").and_then(Value::as_bool).unwrap_or(false);

        LineOutcome::Content {
            token: token.filter(|t| !t.is_empty()),
            finished,
        }
    }

    /// Reduce a full-content frame to its new suffix.
    ///
    /// If everything emitted so far is a prefix of the new content, only the
    /// remainder is new. Otherwise the backend reset or edited its prior
    /// content; the full content is passed through unmodified, since whether
    /// a reset means "resend" or "error" is backend-defined. The accumulator
    /// becomes the new full content in both branches.
    fn delta_from_cumulative(&mut self, full: &str) -> String {
        let token = match full.strip_prefix(self.emitted.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => full.to_string(),
        };
        self.emitted.clear();
        self.emitted.push_str(full);
        token
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
