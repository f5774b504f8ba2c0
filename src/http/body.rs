//! Resumable body readers.
//!
//! A [`BodyReader`] is polled with the direction's [`ChunkReader`] until the
//! body is complete. It keeps its own progress, so polling can stop whenever
//! the reader runs dry and pick up again after more chunks are pushed.

use super::reader::{ChunkReader, Pull};
use crate::error::ChunkDecodeError;
use tracing::debug;

/// How the end of a body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Empty,
    Length(u64),
    Chunked,
    ToEnd,
}

#[derive(Debug)]
enum Progress {
    Fixed { remaining: usize },
    ToEnd,
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkEnd,
    Trailers,
    Done,
}

#[derive(Debug)]
pub(crate) struct BodyReader {
    progress: Progress,
    /// Consume without keeping the bytes.
    discard: bool,
    body: Vec<u8>,
    error: Option<ChunkDecodeError>,
}

impl BodyReader {
    pub(crate) fn new(framing: Framing, discard: bool) -> Self {
        let progress = match framing {
            Framing::Empty | Framing::Length(0) => Progress::Done,
            Framing::Length(n) => Progress::Fixed {
                remaining: usize::try_from(n).unwrap_or(usize::MAX),
            },
            Framing::Chunked => Progress::ChunkSize,
            Framing::ToEnd => Progress::ToEnd,
        };
        Self {
            progress,
            discard,
            body: Vec::new(),
            error: None,
        }
    }

    /// Set when a chunked body stopped early on a malformed size line.
    pub(crate) fn error(&self) -> Option<&ChunkDecodeError> {
        self.error.as_ref()
    }

    /// Drive the body forward. Returns `None` while more input is needed and
    /// the body (empty when discarding) once it is complete. A stream that ends
    /// early completes the body with whatever was read.
    pub(crate) fn poll(&mut self, reader: &mut ChunkReader) -> Option<Vec<u8>> {
        loop {
            let next = match self.progress {
                Progress::Done => return Some(core::mem::take(&mut self.body)),
                Progress::Fixed { remaining } => match self.take(reader, remaining)? {
                    Some(0) | None => Progress::Done,
                    Some(n) if n >= remaining => Progress::Done,
                    Some(n) => Progress::Fixed {
                        remaining: remaining - n,
                    },
                },
                Progress::ToEnd => {
                    if self.discard {
                        match reader.skip_to_end() {
                            Pull::Pending => return None,
                            Pull::Ready(()) | Pull::Ended => Progress::Done,
                        }
                    } else {
                        match reader.read_to_end() {
                            Pull::Pending => return None,
                            Pull::Ready(data) => {
                                self.body.extend_from_slice(&data);
                                Progress::Done
                            }
                            Pull::Ended => Progress::Done,
                        }
                    }
                }
                Progress::ChunkSize => match reader.read_line() {
                    Pull::Pending => return None,
                    Pull::Ended => Progress::Done,
                    Pull::Ready(line) => match parse_chunk_size(&line) {
                        Ok(0) => Progress::Trailers,
                        Ok(size) => Progress::ChunkData {
                            remaining: usize::try_from(size).unwrap_or(usize::MAX),
                        },
                        Err(e) => {
                            debug!(body_len = self.body.len(), "Chunked body abandoned: {e}");
                            self.error = Some(e);
                            Progress::Done
                        }
                    },
                },
                Progress::ChunkData { remaining } => match self.take(reader, remaining)? {
                    Some(0) | None => Progress::Done,
                    Some(n) if n >= remaining => Progress::ChunkEnd,
                    Some(n) => Progress::ChunkData {
                        remaining: remaining - n,
                    },
                },
                // CRLF closing the chunk data
                Progress::ChunkEnd => match reader.read_line() {
                    Pull::Pending => return None,
                    Pull::Ended => Progress::Done,
                    Pull::Ready(_) => Progress::ChunkSize,
                },
                Progress::Trailers => match reader.read_line() {
                    Pull::Pending => return None,
                    Pull::Ended => Progress::Done,
                    Pull::Ready(line) if line.trim_ascii().is_empty() => Progress::Done,
                    Pull::Ready(_) => Progress::Trailers,
                },
            };
            self.progress = next;
        }
    }

    /// Consume up to `n` bytes into the body (or drop them).
    ///
    /// `None` means wait for input, `Some(None)` means the stream ended and
    /// `Some(Some(count))` is the number of bytes consumed.
    fn take(&mut self, reader: &mut ChunkReader, n: usize) -> Option<Option<usize>> {
        if self.discard {
            return match reader.skip(n) {
                Pull::Pending => None,
                Pull::Ended => Some(None),
                Pull::Ready(count) => Some(Some(count)),
            };
        }
        match reader.read(n) {
            Pull::Pending => None,
            Pull::Ended => Some(None),
            Pull::Ready(data) => {
                let count = data.len();
                self.body.extend_from_slice(&data);
                // A short read only happens at stream end.
                Some(Some(if count < n { 0 } else { count }))
            }
        }
    }
}

/// Hex chunk size, ignoring any `;` extension.
fn parse_chunk_size(line: &[u8]) -> Result<u64, ChunkDecodeError> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| ChunkDecodeError::BadChunkSize(text.trim().to_owned()))
}
