//! Message framing for the ingestion streams.
//!
//! Producers write JSON documents back to back with no length prefix or
//! delimiter, and a single document may arrive split over several reads.
//! [`BraceFramer`] treats the accumulated buffer as complete exactly when its
//! last byte is `}`. This misfires on a string value that happens to end a read
//! with `}` and never completes for a producer that does not end documents
//! with `}`; both are accepted behaviour for the current producers.

use crate::types::StreamKind;

/// Result of feeding one chunk to a framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framed {
    /// More bytes needed.
    Pending,
    /// One complete message; the framer's buffer is now empty.
    Complete(String),
    /// The buffer exceeded the size cap and was dropped (byte count).
    Discarded(usize),
}

/// Connection-local message assembler.
pub trait Framer: Send {
    fn push(&mut self, chunk: &[u8]) -> Framed;

    /// Bytes buffered toward the next message.
    fn pending(&self) -> usize;
}

/// Accumulates until the buffer ends in `}`.
#[derive(Debug, Default)]
pub struct BraceFramer {
    buf: Vec<u8>,
    max_len: Option<usize>,
}

impl BraceFramer {
    pub fn new(max_len: Option<usize>) -> Self {
        BraceFramer {
            buf: Vec::new(),
            max_len,
        }
    }
}

impl Framer for BraceFramer {
    fn push(&mut self, chunk: &[u8]) -> Framed {
        self.buf.extend_from_slice(chunk);

        if self.buf.last() == Some(&b'}') {
            let bytes = std::mem::take(&mut self.buf);
            return Framed::Complete(String::from_utf8_lossy(&bytes).into_owned());
        }

        match self.max_len {
            Some(max) if self.buf.len() > max => {
                let dropped = self.buf.len();
                self.buf.clear();
                Framed::Discarded(dropped)
            }
            _ => Framed::Pending,
        }
    }

    fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Every non-empty read is one message.
#[derive(Debug, Default)]
pub struct ChunkFramer;

impl Framer for ChunkFramer {
    fn push(&mut self, chunk: &[u8]) -> Framed {
        if chunk.is_empty() {
            return Framed::Pending;
        }
        Framed::Complete(String::from_utf8_lossy(chunk).into_owned())
    }

    fn pending(&self) -> usize {
        0
    }
}

/// The framer a connection on `kind`'s port should use.
pub fn framer_for(kind: StreamKind, max_len: Option<usize>) -> Box<dyn Framer> {
    if kind.is_chunk_framed() {
        Box::new(ChunkFramer)
    } else {
        Box::new(BraceFramer::new(max_len))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_chunk_message() {
        let mut f = BraceFramer::default();
        assert_eq!(f.push(br#"{"delay":[1"#), Framed::Pending);
        assert_eq!(f.pending(), 11);
        assert_eq!(
            f.push(br#"],"doppler":[2]}"#),
            Framed::Complete(r#"{"delay":[1],"doppler":[2]}"#.to_string())
        );
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn test_single_chunk_message() {
        let mut f = BraceFramer::default();
        assert_eq!(f.push(b"{}"), Framed::Complete("{}".to_string()));
        assert_eq!(f.push(b"{\"a\":1}"), Framed::Complete("{\"a\":1}".to_string()));
    }

    #[test]
    fn test_buffer_resets_after_completion() {
        let mut f = BraceFramer::default();
        f.push(b"{\"a\":");
        f.push(b"1}");
        assert_eq!(f.push(b"{\"b\":2}"), Framed::Complete("{\"b\":2}".to_string()));
    }

    #[test]
    fn test_trailing_whitespace_never_completes() {
        let mut f = BraceFramer::default();
        assert_eq!(f.push(b"{\"a\":1}\n"), Framed::Pending);
        assert_eq!(f.pending(), 8);
    }

    #[test]
    fn test_brace_inside_string_completes_early() {
        let mut f = BraceFramer::default();
        assert_eq!(
            f.push(br#"{"note":"x}"#),
            Framed::Complete(r#"{"note":"x}"#.to_string())
        );
    }

    #[test]
    fn test_cap_discards_incomplete_buffer() {
        let mut f = BraceFramer::new(Some(8));
        assert_eq!(f.push(b"{\"a\":"), Framed::Pending);
        assert_eq!(f.push(b"12345"), Framed::Discarded(10));
        assert_eq!(f.pending(), 0);
        // A complete message over the cap is still emitted
        assert_eq!(
            f.push(b"{\"abcdefgh\":1}"),
            Framed::Complete("{\"abcdefgh\":1}".to_string())
        );
    }

    #[test]
    fn test_chunk_framer() {
        let mut f = ChunkFramer;
        assert_eq!(f.push(b"1718747749000"), Framed::Complete("1718747749000".to_string()));
        assert_eq!(f.push(b""), Framed::Pending);
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn test_framer_for_kind() {
        let mut ts = framer_for(StreamKind::Timestamp, None);
        assert_eq!(ts.push(b"42"), Framed::Complete("42".to_string()));

        for kind in [StreamKind::Map, StreamKind::Detection, StreamKind::IqData] {
            let mut f = framer_for(kind, None);
            assert_eq!(f.push(b"42"), Framed::Pending);
        }
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut f = BraceFramer::default();
        match f.push(b"{\xff}") {
            Framed::Complete(s) => assert_eq!(s, "{\u{fffd}}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
