//! Append-only byte buffers and a bounds-checked reader.
//!
//! [`CommandBuffer`] is the storage behind every command stream: writer
//! buffers filled by encoders, and the static/dynamic/persistent outputs of
//! the splitter. Writes follow a `reserve` then `add` protocol so that hot
//! paths reserve once for a whole record and then copy payloads without
//! re-checking capacity (asserted in debug builds only).

use bytemuck::Pod;

use crate::error::{DrawError, DrawResult};
use crate::pool::Poolable;

/// Default sanity ceiling for a single buffer (1 GiB).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1 << 30;

/// Growable, append-only byte buffer holding encoded command records.
#[derive(Clone)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
    ceiling: usize,
}

impl CommandBuffer {
    /// Create an empty buffer without allocating.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            ceiling: DEFAULT_MAX_BUFFER_BYTES,
        }
    }

    /// Create an empty buffer with the given capacity in bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            ceiling: DEFAULT_MAX_BUFFER_BYTES,
        }
    }

    /// Set the sanity ceiling. Growing past it panics.
    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Drop all content, keeping the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Roll the buffer back to `len` bytes. Used to elide empty scopes.
    pub fn truncate(&mut self, len: usize) {
        debug_assert!(len <= self.bytes.len());
        self.bytes.truncate(len);
    }

    /// Ensure room for `additional` more bytes.
    ///
    /// Grows geometrically (at least doubling) and never shrinks.
    ///
    /// # Panics
    ///
    /// Panics if the buffer would exceed its sanity ceiling. That only
    /// happens on a runaway encode loop in the caller.
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        let len = self.bytes.len();
        if self.bytes.capacity() - len >= additional {
            return;
        }
        let required = len + additional;
        assert!(
            required <= self.ceiling,
            "command buffer would grow to {} bytes (ceiling {}); is something encoding in an infinite loop?",
            required,
            self.ceiling
        );
        let grown = (self.bytes.capacity() * 2).max(required).min(self.ceiling);
        self.bytes.reserve_exact(grown - len);
    }

    /// Spare capacity that can be written without reallocating.
    #[inline]
    pub fn spare(&self) -> usize {
        self.bytes.capacity() - self.bytes.len()
    }

    /// Append a POD value. The caller must have reserved room for it.
    #[inline]
    pub fn add<T: Pod>(&mut self, value: &T) {
        debug_assert!(
            self.spare() >= std::mem::size_of::<T>(),
            "add() without reserve()"
        );
        self.bytes.extend_from_slice(bytemuck::bytes_of(value));
    }

    /// Append raw bytes. The caller must have reserved room for them.
    #[inline]
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(self.spare() >= bytes.len(), "add_bytes() without reserve()");
        self.bytes.extend_from_slice(bytes);
    }

    /// Reserve and append a POD value.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.reserve(std::mem::size_of::<T>());
        self.add(value);
    }

    /// Reserve and append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.add_bytes(bytes);
    }

    /// Move `len` bytes starting at `src` down to `dest` (`dest <= src`).
    ///
    /// Used by in-place filters that copy records forward.
    pub(crate) fn move_down(&mut self, src: usize, len: usize, dest: usize) {
        debug_assert!(dest <= src);
        if dest != src {
            self.bytes.copy_within(src..src + len, dest);
        }
    }

    /// Read a POD value at an absolute offset.
    pub fn read_pod_at<T: Pod>(&self, offset: usize) -> DrawResult<T> {
        ByteReader::at(&self.bytes, offset).read_pod()
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("len", &self.bytes.len())
            .field("capacity", &self.bytes.capacity())
            .finish()
    }
}

impl Poolable for CommandBuffer {
    fn new_empty() -> Self {
        Self::new()
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn capacity_bytes(&self) -> usize {
        self.capacity()
    }
}

/// Sequential, bounds-checked reader over a byte slice.
///
/// Reading past the end yields [`DrawError::Truncated`] instead of panicking,
/// so malformed streams fail safe.
#[derive(Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    pub fn is_at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    /// Borrow the next `len` bytes and advance.
    pub fn take(&mut self, len: usize) -> DrawResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(DrawError::Truncated {
                offset: self.offset,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read a POD value (unaligned) and advance.
    pub fn read_pod<T: Pod>(&mut self) -> DrawResult<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read a POD value without advancing.
    pub fn peek_pod<T: Pod>(&self) -> DrawResult<T> {
        self.clone().read_pod()
    }
}
