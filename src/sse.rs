//! Server-Sent Events (SSE) processing for streaming responses.
//!
//! The chat endpoint frames its reply as `data: {...}` lines separated by a
//! blank line. This module turns the raw byte stream of the HTTP response
//! into a stream of [`StreamFrame`]s, buffering partial frames across reads.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_FRAMES};
use crate::{Error, Result, StreamFrame};

/// Process a stream of bytes into a stream of decoded frames.
///
/// Frames without any `data:` line (keep-alives, comments) are skipped. A
/// trailing frame that is not followed by a blank line is still decoded when
/// the connection closes.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamFrame>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        (byte_stream, buffer, false),
        move |(mut stream, mut buffer, mut closed)| async move {
            loop {
                // First check if we have a complete frame in the buffer
                if let Some((frame, consumed)) = next_frame(&buffer) {
                    buffer.drain(..consumed);
                    match frame {
                        Some(frame) => return Some((frame, (stream, buffer, closed))),
                        None => continue,
                    }
                }

                if closed {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), (stream, buffer, closed)));
                    }
                    None => {
                        // End of stream: whatever is left is the final frame.
                        closed = true;
                        if buffer.iter().all(u8::is_ascii_whitespace) {
                            return None;
                        }
                        let rest = std::mem::take(&mut buffer);
                        if let Some(frame) = decode_frame(&rest) {
                            return Some((frame, (stream, buffer, closed)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Find the first complete frame in `buffer`.
///
/// Returns the decoded frame (or `None` for a frame with no data) and the
/// number of bytes it occupied including its delimiter.
fn next_frame(buffer: &[u8]) -> Option<(Option<Result<StreamFrame>>, usize)> {
    let lf = find(buffer, b"\n\n").map(|idx| (idx, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|idx| (idx, 4));
    let (end, delimiter) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((decode_frame(&buffer[..end]), end + delimiter))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Decode one frame's bytes. Returns `None` when the frame carries no data.
fn decode_frame(raw: &[u8]) -> Option<Result<StreamFrame>> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            STREAM_ERRORS.click();
            return Some(Err(Error::encoding(
                format!("Invalid UTF-8 in stream: {e}"),
                Some(Box::new(e)),
            )));
        }
    };

    let mut data: Option<String> = None;
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    let data = data?;
    let data = data.trim();
    STREAM_FRAMES.click();
    match StreamFrame::parse(data) {
        Ok(frame) => Some(Ok(frame)),
        Err(e) => {
            STREAM_ERRORS.click();
            Some(Err(Error::stream_protocol(
                format!("Malformed frame '{data}': {e}"),
                Some(Box::new(e)),
            )))
        }
    }
}
