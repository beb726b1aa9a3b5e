//! Inbound line assembly
//!
//! Turns raw serial chunks into SLCAN tokens:
//! - CR or LF terminates a line; the trimmed text is emitted as [`LineEvent::Line`]
//! - CR with nothing pending is the adapter's positive ack ([`LineEvent::AckToken`])
//! - LF with nothing pending is ignored, so CRLF yields one token
//! - BEL flushes any partial line, then emits [`LineEvent::Bell`] (negative ack)
//!
//! UTF-8 is decoded incrementally: a multi-byte sequence split across reads
//! is held back until complete; invalid sequences become U+FFFD.

/// Longest line kept before the partial buffer is discarded
const MAX_LINE_LEN: usize = 512;

const CR: char = '\r';
const LF: char = '\n';
const BEL: char = '\u{7}';

/// One token recovered from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Non-empty trimmed line
    Line(String),
    /// Bare terminator: positive acknowledgement
    AckToken,
    /// BEL: negative acknowledgement
    Bell,
}

/// Incremental decoder and line splitter
#[derive(Debug, Default)]
pub struct LineAssembler {
    /// Trailing bytes of an incomplete UTF-8 sequence
    partial_utf8: Vec<u8>,
    line: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all buffered state
    pub fn reset(&mut self) {
        self.partial_utf8.clear();
        self.line.clear();
    }

    /// Feed a chunk, appending recovered tokens to `events`
    pub fn push(&mut self, bytes: &[u8], events: &mut Vec<LineEvent>) {
        self.partial_utf8.extend_from_slice(bytes);
        let pending = std::mem::take(&mut self.partial_utf8);

        let mut rest = pending.as_slice();
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.push_str(text, events);
                    rest = &[];
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // `valid` is verified UTF-8 by `valid_up_to`
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.push_str(text, events);
                    }
                    match e.error_len() {
                        Some(len) => {
                            self.push_char(char::REPLACEMENT_CHARACTER, events);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes
                            self.partial_utf8.extend_from_slice(after);
                            rest = &[];
                        }
                    }
                }
            }
        }
    }

    fn push_str(&mut self, text: &str, events: &mut Vec<LineEvent>) {
        for c in text.chars() {
            self.push_char(c, events);
        }
    }

    fn push_char(&mut self, c: char, events: &mut Vec<LineEvent>) {
        match c {
            CR => self.terminate(events, true),
            LF => {
                if !self.line.is_empty() {
                    self.terminate(events, false);
                }
            }
            BEL => {
                if !self.line.is_empty() {
                    self.terminate(events, false);
                }
                events.push(LineEvent::Bell);
            }
            _ => {
                if self.line.len() >= MAX_LINE_LEN {
                    log::debug!("SLCAN: discarding {} byte unterminated line", self.line.len());
                    self.line.clear();
                }
                self.line.push(c);
            }
        }
    }

    /// Emit the pending line; a blank line is an ack token when `ack_if_blank`
    fn terminate(&mut self, events: &mut Vec<LineEvent>, ack_if_blank: bool) {
        let trimmed = self.line.trim();
        if !trimmed.is_empty() {
            events.push(LineEvent::Line(trimmed.to_string()));
        } else if ack_if_blank || !self.line.is_empty() {
            events.push(LineEvent::AckToken);
        }
        self.line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut LineAssembler, chunks: &[&[u8]]) -> Vec<LineEvent> {
        let mut events = Vec::new();
        for chunk in chunks {
            assembler.push(chunk, &mut events);
        }
        events
    }

    fn line(s: &str) -> LineEvent {
        LineEvent::Line(s.to_string())
    }

    #[test]
    fn test_split_on_cr_and_lf() {
        let mut a = LineAssembler::new();
        let events = feed(&mut a, &[b"t5203010823\rOK\n"]);
        assert_eq!(events, vec![line("t5203010823"), line("OK")]);
    }

    #[test]
    fn test_crlf_yields_single_token() {
        let mut a = LineAssembler::new();
        let events = feed(&mut a, &[b"OK\r\n", b"V1013\r\n"]);
        assert_eq!(events, vec![line("OK"), line("V1013")]);
    }

    #[test]
    fn test_bare_cr_is_ack() {
        let mut a = LineAssembler::new();
        let events = feed(&mut a, &[b"\r", b"\n\n", b"z\r\r"]);
        assert_eq!(
            events,
            vec![LineEvent::AckToken, line("z"), LineEvent::AckToken]
        );
    }

    #[test]
    fn test_line_reassembled_across_chunks() {
        let mut a = LineAssembler::new();
        let events = feed(&mut a, &[b"t52", b"0301", b"0823", b"\r"]);
        assert_eq!(events, vec![line("t5203010823")]);
    }

    #[test]
    fn test_bell_flushes_partial_line() {
        let mut a = LineAssembler::new();
        let events = feed(&mut a, &[b"ER\x07"]);
        assert_eq!(events, vec![line("ER"), LineEvent::Bell]);
        let events = feed(&mut a, &[b"\x07"]);
        assert_eq!(events, vec![LineEvent::Bell]);
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        let mut a = LineAssembler::new();
        let bytes = "Vé1\r".as_bytes();
        // Split inside the two-byte 'é'
        let events = feed(&mut a, &[&bytes[..2], &bytes[2..]]);
        assert_eq!(events, vec![line("Vé1")]);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut a = LineAssembler::new();
        let events = feed(&mut a, &[b"A\xFFB\r"]);
        assert_eq!(events, vec![line("A\u{FFFD}B")]);
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut a = LineAssembler::new();
        feed(&mut a, &[b"t520"]);
        a.reset();
        let events = feed(&mut a, &[b"OK\r"]);
        assert_eq!(events, vec![line("OK")]);
    }
}
