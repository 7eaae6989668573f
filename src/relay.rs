// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// Relay session
//
// Orchestrates one request lifecycle: health-check the backend, open the
// upstream NDJSON connection, drive the frame decoder and token normalizer,
// and emit typed events downstream. The session runs as a spawned producer
// writing into a bounded channel; the handler consumes the receiving end.
//
// The channel doubles as the session-scoped cancellation signal: when the
// client disconnects, the receiver is dropped, `tx.closed()` resolves, and
// the upstream read is abandoned immediately — even while the upstream is
// silent. Dropping the byte stream releases the upstream connection.

use crate::frame::LineDecoder;
use crate::normalize::{LineOutcome, TokenNormalizer};
use crate::upstream::{ChatTurn, UpstreamClient};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Event stream for one session. Zero or more tokens, then exactly one
/// terminal event (`Done` or `Error`), never anything after it.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Token(String),
    Done,
    Error(String),
}

/// Diagnostic for an upstream that closed without ever producing a token,
/// distinct from a legitimately empty answer to keep the two telling apart.
pub const EMPTY_STREAM_MESSAGE: &str =
    "model backend closed the stream without generating any content";

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Session entry point
// ---------------------------------------------------------------------------

/// Start a relay session for one turn.
///
/// Returns the consuming end of the session's event channel. Dropping the
/// returned stream cancels the session and aborts the upstream read.
pub fn run(
    upstream: Arc<dyn UpstreamClient>,
    turn: ChatTurn,
    request_id: String,
) -> ReceiverStream<RelayEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let started = Instant::now();
        let (closing, tokens) = drive(upstream.as_ref(), &turn, &tx).await;

        // Exactly one terminal event per session. After cancellation the
        // receiver is gone, so the send is a best-effort acknowledgement.
        match &closing {
            Closing::Success | Closing::Cancelled => {
                let _ = tx.send(RelayEvent::Done).await;
            }
            Closing::Error(message) => {
                let _ = tx.send(RelayEvent::Error(message.clone())).await;
            }
        }

        tracing::info!(
            %request_id,
            model = %turn.model,
            reason = closing.label(),
            tokens,
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "relay session closed"
        );
    });

    ReceiverStream::new(rx)
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Why the session reached its terminal state.
#[derive(Debug, Clone, PartialEq)]
enum Closing {
    Success,
    Cancelled,
    Error(String),
}

impl Closing {
    fn label(&self) -> &'static str {
        match self {
            Closing::Success => "success",
            Closing::Cancelled => "cancelled",
            Closing::Error(_) => "error",
        }
    }
}

/// Outcome of processing one decoded line.
enum Step {
    Continue,
    Finished,
    Fatal(String),
    ClientGone,
}

async fn drive(
    upstream: &dyn UpstreamClient,
    turn: &ChatTurn,
    tx: &mpsc::Sender<RelayEvent>,
) -> (Closing, usize) {
    // Health-check before committing to a streaming call; never attempt the
    // full stream against a backend known to be down.
    if let Err(error) = upstream.health().await {
        return (
            Closing::Error(format!("model backend unavailable: {error}")),
            0,
        );
    }

    let mut stream = match upstream.open_stream(turn).await {
        Ok(stream) => stream,
        Err(error) => return (Closing::Error(error.to_string()), 0),
    };

    let mut decoder = LineDecoder::new();
    let mut normalizer = TokenNormalizer::new();
    let mut tokens = 0usize;

    'read: loop {
        let chunk = tokio::select! {
            biased;
            _ = tx.closed() => return (Closing::Cancelled, tokens),
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for line in decoder.feed(&bytes) {
                    match handle_line(&line, &mut normalizer, tx, &mut tokens).await {
                        Step::Continue => {}
                        Step::Finished => break 'read,
                        Step::Fatal(message) => return (Closing::Error(message), tokens),
                        Step::ClientGone => return (Closing::Cancelled, tokens),
                    }
                }
            }
            Some(Err(error)) => return (Closing::Error(error.to_string()), tokens),
            None => {
                // End of upstream bytes: decode the tail exactly once.
                if let Some(line) = decoder.flush() {
                    match handle_line(&line, &mut normalizer, tx, &mut tokens).await {
                        Step::Continue | Step::Finished => {}
                        Step::Fatal(message) => return (Closing::Error(message), tokens),
                        Step::ClientGone => return (Closing::Cancelled, tokens),
                    }
                }
                break 'read;
            }
        }
    }

    if tokens == 0 {
        (Closing::Error(EMPTY_STREAM_MESSAGE.to_string()), 0)
    } else {
        (Closing::Success, tokens)
    }
}

async fn handle_line(
    line: &str,
    normalizer: &mut TokenNormalizer,
    tx: &mpsc::Sender<RelayEvent>,
    tokens: &mut usize,
) -> Step {
    match normalizer.apply(line) {
        LineOutcome::Noise => Step::Continue,
        LineOutcome::UpstreamError(message) => Step::Fatal(message),
        LineOutcome::Content { token, finished } => {
            if let Some(token) = token {
                if tx.send(RelayEvent::Token(token)).await.is_err() {
                    return Step::ClientGone;
                }
                *tokens += 1;
            }
            if finished {
                Step::Finished
            } else {
                Step::Continue
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{ByteStream, UpstreamError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    // ---------------------------------------------------------------
    // Test doubles
    // ---------------------------------------------------------------

    /// Upstream replaying a fixed list of byte chunks.
    struct ScriptedUpstream {
        healthy: bool,
        chunks: Vec<Result<&'static str, UpstreamError>>,
        opened: AtomicBool,
    }

    impl ScriptedUpstream {
        fn with_chunks(chunks: Vec<&'static str>) -> Self {
            Self {
                healthy: true,
                chunks: chunks.into_iter().map(Ok).collect(),
                opened: AtomicBool::new(false),
            }
        }

        fn unhealthy() -> Self {
            Self {
                healthy: false,
                chunks: Vec::new(),
                opened: AtomicBool::new(false),
            }
        }

        fn was_opened(&self) -> bool {
            self.opened.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamClient for ScriptedUpstream {
        async fn health(&self) -> Result<(), UpstreamError> {
            if self.healthy {
                Ok(())
            } else {
                Err(UpstreamError::Unreachable {
                    url: "http://127.0.0.1:11434/api/version".to_string(),
                    reason: "connection refused".to_string(),
                })
            }
        }

        async fn open_stream(&self, _turn: &ChatTurn) -> Result<ByteStream, UpstreamError> {
            self.opened.store(true, Ordering::SeqCst);
            let chunks: Vec<Result<Bytes, UpstreamError>> = self
                .chunks
                .iter()
                .map(|chunk| match chunk {
                    Ok(text) => Ok(Bytes::from(*text)),
                    Err(_) => Err(UpstreamError::Transport("connection reset".to_string())),
                })
                .collect();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    /// Sets a flag when dropped, proving the upstream stream was released.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// A stream that never yields, simulating a silent upstream.
    struct SilentTail {
        _flag: DropFlag,
    }

    impl futures_util::Stream for SilentTail {
        type Item = Result<Bytes, UpstreamError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    /// Upstream that sends one token and then goes silent forever.
    struct SilentUpstream {
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl UpstreamClient for SilentUpstream {
        async fn health(&self) -> Result<(), UpstreamError> {
            Ok(())
        }

        async fn open_stream(&self, _turn: &ChatTurn) -> Result<ByteStream, UpstreamError> {
            let first = futures_util::stream::iter(vec![Ok(Bytes::from(
                "{\"delta\":{\"content\":\"tok\"}}\n",
            ))]);
            let tail = SilentTail {
                _flag: DropFlag(self.released.clone()),
            };
            Ok(Box::pin(first.chain(tail)))
        }
    }

    fn turn() -> ChatTurn {
        ChatTurn::new("llama3.1", 0.7, Vec::new(), "hello")
    }

    async fn collect(upstream: ScriptedUpstream) -> Vec<RelayEvent> {
        run(Arc::new(upstream), turn(), "req-test".to_string())
            .collect::<Vec<_>>()
            .await
    }

    fn terminal_count(events: &[RelayEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, RelayEvent::Done | RelayEvent::Error(_)))
            .count()
    }

    // ---------------------------------------------------------------
    // 1. Tokens forwarded in upstream line order, one Done terminal
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn tokens_forwarded_in_order() {
        // Chunk boundaries deliberately split lines.
        let events = collect(ScriptedUpstream::with_chunks(vec![
            "{\"delta\":{\"content\":\"Hel\"}}\n{\"message\":",
            "{\"content\":\"Hello\"}}\n",
            "{\"done\":true}\n",
        ]))
        .await;

        assert_eq!(
            events,
            vec![
                RelayEvent::Token("Hel".to_string()),
                RelayEvent::Token("lo".to_string()),
                RelayEvent::Done,
            ]
        );
    }

    // ---------------------------------------------------------------
    // 2. Zero-token close: exactly one Error terminal
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn empty_stream_emits_single_error_terminal() {
        let events = collect(ScriptedUpstream::with_chunks(vec![
            "{\"model\":\"llama3.1\"}\n",
        ]))
        .await;

        assert_eq!(
            events,
            vec![RelayEvent::Error(EMPTY_STREAM_MESSAGE.to_string())]
        );
    }

    #[tokio::test]
    async fn done_without_content_is_still_the_empty_stream_error() {
        let events = collect(ScriptedUpstream::with_chunks(vec!["{\"done\":true}\n"])).await;
        assert_eq!(
            events,
            vec![RelayEvent::Error(EMPTY_STREAM_MESSAGE.to_string())]
        );
    }

    // ---------------------------------------------------------------
    // 3. Health failure short-circuits before streaming
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn health_failure_never_opens_the_stream() {
        let upstream = Arc::new(ScriptedUpstream::unhealthy());
        let events = run(upstream.clone(), turn(), "req-test".to_string())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            RelayEvent::Error(message) => {
                assert!(message.contains("model backend unavailable"), "{message}");
            }
            other => panic!("expected error terminal, got {other:?}"),
        }
        assert!(!upstream.was_opened());
    }

    // ---------------------------------------------------------------
    // 4. Malformed lines skipped without losing surrounding tokens
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn malformed_line_between_valid_tokens_skipped() {
        let events = collect(ScriptedUpstream::with_chunks(vec![
            "{\"delta\":{\"content\":\"a\"}}\nnot-json\n{\"delta\":{\"content\":\"b\"}}\n",
        ]))
        .await;

        assert_eq!(
            events,
            vec![
                RelayEvent::Token("a".to_string()),
                RelayEvent::Token("b".to_string()),
                RelayEvent::Done,
            ]
        );
    }

    // ---------------------------------------------------------------
    // 5. Upstream-declared error terminates, nothing after it
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn upstream_error_field_terminates_session() {
        let events = collect(ScriptedUpstream::with_chunks(vec![
            "{\"delta\":{\"content\":\"partial\"}}\n",
            "{\"error\":\"model exploded\"}\n",
            "{\"delta\":{\"content\":\"never seen\"}}\n",
        ]))
        .await;

        assert_eq!(
            events,
            vec![
                RelayEvent::Token("partial".to_string()),
                RelayEvent::Error("model exploded".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn transport_error_surfaces_as_terminal_error() {
        let upstream = ScriptedUpstream {
            healthy: true,
            chunks: vec![
                Ok("{\"delta\":{\"content\":\"x\"}}\n"),
                Err(UpstreamError::Transport(String::new())),
            ],
            opened: AtomicBool::new(false),
        };
        let events = collect(upstream).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RelayEvent::Token("x".to_string()));
        assert!(matches!(&events[1], RelayEvent::Error(m) if m.contains("transport")));
    }

    // ---------------------------------------------------------------
    // 6. done stops consumption of later lines
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn finished_signal_stops_consuming() {
        let events = collect(ScriptedUpstream::with_chunks(vec![
            "{\"delta\":{\"content\":\"a\"}}\n{\"done\":true}\n{\"delta\":{\"content\":\"late\"}}\n",
        ]))
        .await;

        assert_eq!(
            events,
            vec![RelayEvent::Token("a".to_string()), RelayEvent::Done]
        );
    }

    // ---------------------------------------------------------------
    // 7. Tail without trailing newline is flushed once
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn unterminated_final_line_is_processed() {
        let events = collect(ScriptedUpstream::with_chunks(vec![
            "{\"delta\":{\"content\":\"tail\"}}",
        ]))
        .await;

        assert_eq!(
            events,
            vec![RelayEvent::Token("tail".to_string()), RelayEvent::Done]
        );
    }

    // ---------------------------------------------------------------
    // 8. Every script ends in exactly one terminal event
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn exactly_one_terminal_event_per_session() {
        let scripts: Vec<Vec<&'static str>> = vec![
            vec![],
            vec!["garbage\n"],
            vec!["{\"delta\":{\"content\":\"a\"}}\n{\"done\":true}\n"],
            vec!["{\"error\":\"boom\"}\n"],
            vec!["{\"response\":\"full answer\"}\n"],
        ];

        for script in scripts {
            let events = collect(ScriptedUpstream::with_chunks(script.clone())).await;
            assert_eq!(terminal_count(&events), 1, "script {script:?}: {events:?}");
            assert!(
                matches!(events.last(), Some(RelayEvent::Done | RelayEvent::Error(_))),
                "terminal must come last: {events:?}"
            );
        }
    }

    // ---------------------------------------------------------------
    // 9. Client disconnect releases the upstream promptly
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn cancellation_releases_silent_upstream() {
        let released = Arc::new(AtomicBool::new(false));
        let upstream = Arc::new(SilentUpstream {
            released: released.clone(),
        });

        let mut events = run(upstream, turn(), "req-test".to_string());
        assert_eq!(
            events.next().await,
            Some(RelayEvent::Token("tok".to_string()))
        );

        // Client disconnects while the upstream is silent.
        drop(events);

        let mut waited = Duration::ZERO;
        while !released.load(Ordering::SeqCst) && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert!(
            released.load(Ordering::SeqCst),
            "upstream connection not released after client disconnect"
        );
    }
}
