// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// Frame decoder
//
// Turns a raw byte stream into discrete logical lines. Used on both the
// upstream NDJSON stream and the client-side SSE stream, which share the
// same framing: lines delimited by `\n`, optional trailing `\r` stripped.
//
// The decoder buffers raw bytes, not text, so a multi-byte UTF-8 sequence
// split across chunk boundaries is only decoded once its line is complete.

/// Stateful line decoder over an incoming byte stream.
///
/// `feed` never blocks: each call returns whatever complete lines the
/// buffer now holds, keeping any incomplete trailing fragment buffered.
/// `flush` is called once at end-of-data and yields the undecoded tail
/// as one final line iff it is non-empty.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every complete line now available, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the '\n' delimiter
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Decode the remaining tail at end-of-stream.
    ///
    /// Returns `None` when the buffer is empty so an input that ended on a
    /// newline does not produce a spurious empty line.
    pub fn flush(&mut self) -> Option<String> {
        let mut tail = std::mem::take(&mut self.buf);
        if tail.last() == Some(&b'\r') {
            tail.pop();
        }
        if tail.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&tail).into_owned())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `input` in chunks split at `split`, then flush, collecting all lines.
    fn decode_split(input: &[u8], split: usize) -> Vec<String> {
        let mut decoder = LineDecoder::new();
        let mut lines = decoder.feed(&input[..split]);
        lines.extend(decoder.feed(&input[split..]));
        lines.extend(decoder.flush());
        lines
    }

    // ---------------------------------------------------------------
    // 1. Complete lines yielded in order
    // ---------------------------------------------------------------

    #[test]
    fn complete_lines_in_order() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"alpha\nbeta\ngamma\n");
        assert_eq!(lines, vec!["alpha", "beta", "gamma"]);
        assert_eq!(decoder.flush(), None);
    }

    // ---------------------------------------------------------------
    // 2. Identical output for every possible chunk split point
    // ---------------------------------------------------------------

    #[test]
    fn invariant_under_every_chunk_split() {
        let input = "first line\r\nsecond\n\nthird with trailing".as_bytes();
        let expected = decode_split(input, 0);

        for split in 1..input.len() {
            assert_eq!(
                decode_split(input, split),
                expected,
                "split at byte {split} changed the decoded lines"
            );
        }
    }

    // ---------------------------------------------------------------
    // 3. CRLF endings stripped
    // ---------------------------------------------------------------

    #[test]
    fn trailing_carriage_return_stripped() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"windows\r\nunix\n");
        assert_eq!(lines, vec!["windows", "unix"]);
    }

    #[test]
    fn carriage_return_inside_line_preserved() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"a\rb\n");
        assert_eq!(lines, vec!["a\rb"]);
    }

    // ---------------------------------------------------------------
    // 4. Partial line stays buffered across feeds
    // ---------------------------------------------------------------

    #[test]
    fn partial_line_buffered_until_complete() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"hel").is_empty());
        assert!(decoder.feed(b"lo wor").is_empty());
        assert_eq!(decoder.feed(b"ld\n"), vec!["hello world"]);
    }

    // ---------------------------------------------------------------
    // 5. Multi-byte UTF-8 split across chunks decodes intact
    // ---------------------------------------------------------------

    #[test]
    fn multibyte_utf8_split_across_chunks() {
        let input = "prix: 12€\n".as_bytes();
        // The euro sign is three bytes; split inside it.
        let euro_start = "prix: 12".len();
        for split in euro_start..euro_start + 3 {
            let mut decoder = LineDecoder::new();
            let mut lines = decoder.feed(&input[..split]);
            lines.extend(decoder.feed(&input[split..]));
            assert_eq!(lines, vec!["prix: 12€"], "split at byte {split}");
        }
    }

    #[test]
    fn multibyte_utf8_split_in_flushed_tail() {
        let input = "né".as_bytes(); // no trailing newline
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(&input[..2]).is_empty());
        assert!(decoder.feed(&input[2..]).is_empty());
        assert_eq!(decoder.flush(), Some("né".to_string()));
    }

    // ---------------------------------------------------------------
    // 6. Flush yields the tail once, and nothing when empty
    // ---------------------------------------------------------------

    #[test]
    fn flush_yields_nonempty_tail() {
        let mut decoder = LineDecoder::new();
        decoder.feed(b"line\ntail");
        assert_eq!(decoder.flush(), Some("tail".to_string()));
        // A second flush must not repeat the tail.
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn flush_after_newline_terminated_input_is_empty() {
        let mut decoder = LineDecoder::new();
        decoder.feed(b"done\n");
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn flush_strips_trailing_carriage_return() {
        let mut decoder = LineDecoder::new();
        decoder.feed(b"tail\r");
        assert_eq!(decoder.flush(), Some("tail".to_string()));
    }

    // ---------------------------------------------------------------
    // 7. Empty lines are real lines, not noise
    // ---------------------------------------------------------------

    #[test]
    fn empty_lines_yielded() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"a\n\nb\n");
        assert_eq!(lines, vec!["a", "", "b"]);
    }
}
