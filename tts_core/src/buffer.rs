//! Growable in-memory byte store used as the encoder's output sink.
//!
//! The encoder writes at arbitrary offsets (header placeholders first, PCM
//! payload next, size fields patched last), while the HTTP layer later reads
//! the same bytes either sequentially through [`Read`] or by range through
//! [`ReadAt`]. The sequential read cursor is independent of all positional
//! writes.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Positional reads that do not disturb any cursor.
pub trait ReadAt {
    /// Copy bytes starting at `offset` into `buf`, returning the count copied.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] when `offset` is at or
    /// past the end of the data and `buf` is non-empty. A zero-length read
    /// never fails.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

/// Positional writes that do not disturb any cursor.
pub trait WriteAt {
    /// Copy `buf` into the store starting at `offset`, returning the count written.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

#[derive(Debug, Default, Clone)]
pub struct RandomAccessBuffer {
    buf: Vec<u8>,
    cursor: u64,
}

impl RandomAccessBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    /// Logical length: one past the highest byte ever written.
    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Current position of the sequential read cursor.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Ensure capacity for at least `min_len` bytes.
    ///
    /// When the backing storage has to move, the new capacity is at least
    /// twice the old capacity plus the requested growth, so a run of small
    /// appends costs amortised O(1) per byte.
    pub fn grow_to(&mut self, min_len: usize) {
        let cap = self.buf.capacity();
        if min_len <= cap {
            return;
        }
        let growth = min_len - self.buf.len();
        let target = cap.saturating_mul(2).saturating_add(growth);
        self.buf.reserve_exact(target - self.buf.len());
    }

    /// Append at the current logical end.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let end = self.buf.len();
        self.put(bytes, end)
    }

    fn put(&mut self, bytes: &[u8], offset: usize) -> usize {
        let end = offset + bytes.len();
        if end > self.buf.len() {
            self.grow_to(end);
            // Gaps between the old end and `offset` read back as zeroes.
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(bytes);
        bytes.len()
    }

    fn clamp(&self, pos: i128) -> u64 {
        pos.clamp(0, self.buf.len() as i128) as u64
    }
}

impl From<Vec<u8>> for RandomAccessBuffer {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf, cursor: 0 }
    }
}

impl WriteAt for RandomAccessBuffer {
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let offset = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds address space"))?;
        offset
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write end overflows"))?;
        Ok(self.put(buf, offset))
    }
}

impl ReadAt for RandomAccessBuffer {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if offset >= self.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let src = &self.buf[offset as usize..];
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        Ok(n)
    }
}

impl Read for RandomAccessBuffer {
    /// Sequential read from the cursor; returns `Ok(0)` once the cursor reaches the end.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor >= self.len() || buf.is_empty() {
            return Ok(0);
        }
        let n = self.read_at(buf, self.cursor)?;
        self.cursor += n as u64;
        Ok(n)
    }
}

impl Seek for RandomAccessBuffer {
    /// Moves the read cursor, clamped to `[0, len]`.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => self.cursor as i128 + d as i128,
            SeekFrom::End(d) => self.len() as i128 + d as i128,
        };
        self.cursor = self.clamp(target);
        Ok(self.cursor)
    }
}

impl Write for RandomAccessBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.append(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
