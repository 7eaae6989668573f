// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// Client stream reader
//
// Consuming-side mirror of the relay: decodes an SSE byte stream back into
// an ordered sequence of typed events. Three line prefixes matter: `:`
// comment/heartbeat frames (ignored — the stream always opens with one),
// `event:` named events (terminal `done` detection), and `data:` JSON
// payloads carrying either a token or an error.

use crate::frame::LineDecoder;
use serde_json::Value;

/// One decoded event from the server stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Token(String),
    Error(String),
    Done,
}

/// Incremental SSE decoder for one response stream.
///
/// Feed raw body bytes as they arrive, then call `finish` once at end of
/// stream: it flushes the undecoded tail exactly once and synthesizes a
/// `Done` event if no explicit terminal was received, so consumers can
/// always rely on exactly one terminal event.
#[derive(Debug, Default)]
pub struct SseReader {
    decoder: LineDecoder,
    terminal_seen: bool,
    finished: bool,
}

impl SseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode whatever complete frames these bytes complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ClientEvent> {
        let lines = self.decoder.feed(bytes);
        let mut events = Vec::new();
        for line in lines {
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Signal end-of-stream. Idempotent; later calls return nothing.
    pub fn finish(&mut self) -> Vec<ClientEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if let Some(line) = self.decoder.flush() {
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        if !self.terminal_seen {
            self.terminal_seen = true;
            events.push(ClientEvent::Done);
        }
        events
    }

    fn decode_line(&mut self, line: &str) -> Option<ClientEvent> {
        // One terminal per stream; everything after it is ignored.
        if self.terminal_seen || line.is_empty() {
            return None;
        }

        // Comment / heartbeat frame.
        if line.starts_with(':') {
            return None;
        }

        if let Some(name) = line.strip_prefix("event:") {
            if name.trim() == "done" {
                self.terminal_seen = true;
                return Some(ClientEvent::Done);
            }
            return None;
        }

        let payload = line.strip_prefix("data:")?.trim_start();
        if payload.is_empty() || payload == "[DONE]" {
            // The sentinel payload accompanies the done event line.
            return None;
        }

        let value: Value = serde_json::from_str(payload).ok()?;
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            self.terminal_seen = true;
            return Some(ClientEvent::Error(error.to_string()));
        }
        value
            .get("token")
            .and_then(Value::as_str)
            .map(|token| ClientEvent::Token(token.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
