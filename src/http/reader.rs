//! Pull-based reader over the chunks released for one direction.
//!
//! Chunks are pushed in as the reassembler releases them and pulled out by the
//! parser. No operation blocks: when the buffered bytes cannot satisfy a
//! request the reader answers [`Pull::Pending`] and consumes nothing, or
//! [`Pull::Ended`] once [`ChunkReader::end`] has been called and the buffer is
//! exhausted.

use std::collections::VecDeque;

/// Outcome of a reader operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    Ready(T),
    /// Not enough bytes yet; try again after more input.
    Pending,
    /// The stream is over and nothing more will arrive.
    Ended,
}

#[derive(Debug, Default)]
pub struct ChunkReader {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of the front chunk already consumed.
    offset: usize,
    buffered: usize,
    ended: bool,
}

impl ChunkReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() || self.ended {
            return;
        }
        self.buffered += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// No more chunks will be pushed.
    pub fn end(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Read through and including the next `\n`. At stream end an unterminated
    /// tail is returned as the last line.
    pub fn read_line(&mut self) -> Pull<Vec<u8>> {
        match self.line_len() {
            Pull::Ready(len) => Pull::Ready(self.take(len)),
            Pull::Pending => Pull::Pending,
            Pull::Ended => Pull::Ended,
        }
    }

    /// The line [`read_line`](Self::read_line) would return, left in the
    /// buffer.
    pub fn peek_line(&self) -> Pull<Vec<u8>> {
        let len = match self.line_len() {
            Pull::Ready(len) => len,
            Pull::Pending => return Pull::Pending,
            Pull::Ended => return Pull::Ended,
        };
        let mut out = Vec::with_capacity(len);
        for (i, chunk) in self.chunks.iter().enumerate() {
            let start = if i == 0 { self.offset } else { 0 };
            let want = (len - out.len()).min(chunk.len() - start);
            out.extend_from_slice(&chunk[start..start + want]);
            if out.len() == len {
                break;
            }
        }
        Pull::Ready(out)
    }

    fn line_len(&self) -> Pull<usize> {
        let mut scanned = 0;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let start = if i == 0 { self.offset } else { 0 };
            if let Some(pos) = memchr::memchr(b'\n', &chunk[start..]) {
                return Pull::Ready(scanned + pos + 1);
            }
            scanned += chunk.len() - start;
        }
        match (self.ended, self.buffered) {
            (true, 0) => Pull::Ended,
            (true, rest) => Pull::Ready(rest),
            (false, _) => Pull::Pending,
        }
    }

    /// Read exactly `n` bytes. At stream end whatever is left is returned even
    /// if it is shorter.
    pub fn read(&mut self, n: usize) -> Pull<Vec<u8>> {
        if n == 0 {
            return Pull::Ready(Vec::new());
        }
        if self.buffered >= n {
            return Pull::Ready(self.take(n));
        }
        match (self.ended, self.buffered) {
            (false, _) => Pull::Pending,
            (true, 0) => Pull::Ended,
            (true, rest) => Pull::Ready(self.take(rest)),
        }
    }

    /// Discard up to `n` bytes, returning how many were discarded. Unlike
    /// [`read`](Self::read) this makes progress with whatever is buffered.
    pub fn skip(&mut self, n: usize) -> Pull<usize> {
        if n == 0 {
            return Pull::Ready(0);
        }
        if self.buffered == 0 {
            return if self.ended { Pull::Ended } else { Pull::Pending };
        }
        let count = n.min(self.buffered);
        self.discard(count);
        Pull::Ready(count)
    }

    /// Discard everything buffered. Ready once the stream has ended.
    pub fn skip_to_end(&mut self) -> Pull<()> {
        self.chunks.clear();
        self.offset = 0;
        self.buffered = 0;
        if self.ended { Pull::Ready(()) } else { Pull::Pending }
    }

    /// Everything up to stream end. Pending until [`end`](Self::end) is called.
    pub fn read_to_end(&mut self) -> Pull<Vec<u8>> {
        if !self.ended {
            return Pull::Pending;
        }
        Pull::Ready(self.take(self.buffered))
    }

    fn take(&mut self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let want = n - out.len();
            let available = &front[self.offset..];
            if available.len() > want {
                out.extend_from_slice(&available[..want]);
                self.offset += want;
            } else {
                out.extend_from_slice(available);
                self.chunks.pop_front();
                self.offset = 0;
            }
        }
        self.buffered -= out.len();
        out
    }

    fn discard(&mut self, mut n: usize) {
        self.buffered -= n;
        while n > 0 {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let available = front.len() - self.offset;
            if available > n {
                self.offset += n;
                n = 0;
            } else {
                n -= available;
                self.chunks.pop_front();
                self.offset = 0;
            }
        }
    }
}
