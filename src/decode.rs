//! Decoding of raw chunked text bodies.
//!
//! The plain-text endpoint writes assistant text straight into the response
//! body. Network reads can split a multi-byte character, so bytes are held
//! back until they form complete UTF-8 sequences.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::observability::{STREAM_BYTES, STREAM_ERRORS};
use crate::{Error, Result};

/// Incremental UTF-8 decoder that tolerates sequences split across reads.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a new, empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every complete character decoded so far.
    pub fn push(&mut self, bytes: &[u8]) -> Result<String> {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                Ok(text)
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end; keep it for the next read.
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                Ok(text)
            }
            Err(e) => {
                self.pending.clear();
                Err(Error::encoding(
                    format!("Invalid UTF-8 in stream: {e}"),
                    Some(Box::new(e)),
                ))
            }
        }
    }

    /// Signal end of input; fails if a partial character is left over.
    pub fn finish(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            let len = self.pending.len();
            self.pending.clear();
            Err(Error::encoding(
                format!("stream ended inside a {len}-byte partial character"),
                None,
            ))
        }
    }
}

/// Turn a raw byte stream into a stream of non-empty text fragments.
pub fn process_text<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    stream::unfold(
        (byte_stream, Utf8Decoder::new(), false),
        |(mut stream, mut decoder, done)| async move {
            if done {
                return None;
            }
            loop {
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        match decoder.push(&bytes) {
                            Ok(text) if text.is_empty() => continue,
                            Ok(text) => return Some((Ok(text), (stream, decoder, false))),
                            Err(e) => {
                                STREAM_ERRORS.click();
                                return Some((Err(e), (stream, decoder, true)));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), (stream, decoder, true)));
                    }
                    None => {
                        return match decoder.finish() {
                            Ok(()) => None,
                            Err(e) => Some((Err(e), (stream, decoder, true))),
                        };
                    }
                }
            }
        },
    )
}
