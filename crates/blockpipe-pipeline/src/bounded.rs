//! Bounded segment - a zero-origin window into a base stream
//!
//! The window may start and end anywhere; with an alignment configured,
//! reads from the base are rounded out to whole blocks while the window
//! itself stays byte-exact.

use async_trait::async_trait;
use blockpipe_core::{
    align_up, alignment_bits, read_full, resolve_seek, u64_to_usize, validate_alignment,
    AsyncMediaStream, BufferPool, Error, MediaStream, PhysicalPosition,
};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::trace;

/// Configuration for a [`BoundedAlignedSegment`]
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// Requested alignment, rounded up to a power of two (1 disables alignment)
    pub alignment: usize,
    /// Pool scratch buffers are rented from
    pub pool: BufferPool,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            alignment: 1,
            pool: BufferPool::shared(),
        }
    }
}

impl SegmentOptions {
    /// Set the alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Use a specific buffer pool
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }
}

/// A fixed-length window of a base stream, exposed as its own stream.
///
/// This is how a partition or a slice of an image is presented as an
/// independent stream without copying. The physical cursor on the base is
/// always rounded down to the alignment; the skew is remembered as the
/// position offset.
///
/// # Example
///
/// ```rust
/// use blockpipe_pipeline::BoundedAlignedSegment;
/// use std::io::{Cursor, Read};
///
/// let data: Vec<u8> = (0..=255).collect();
///
/// // Bytes 100..150 of the base
/// let mut segment = BoundedAlignedSegment::new(Cursor::new(data), 100, 50).unwrap();
/// let mut buf = [0u8; 4];
/// segment.read_exact(&mut buf).unwrap();
/// assert_eq!(buf, [100, 101, 102, 103]);
/// ```
pub struct BoundedAlignedSegment<B> {
    base: B,
    start: u64,
    length: u64,
    alignment_bits: u32,
    alignment_mask: u64,
    position: u64,
    /// Where the base stream's cursor is known to be
    base_cursor: Option<u64>,
    pool: BufferPool,
}

impl<B> BoundedAlignedSegment<B> {
    fn build(base: B, start: u64, length: u64, options: SegmentOptions) -> io::Result<Self> {
        validate_alignment(options.alignment)?;
        let bits = alignment_bits(options.alignment);

        Ok(Self {
            base,
            start,
            length,
            alignment_bits: bits,
            alignment_mask: (1u64 << bits) - 1,
            position: 0,
            base_cursor: None,
            pool: options.pool,
        })
    }

    /// Offset of the window on the base stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the window
    pub fn len(&self) -> u64 {
        self.length
    }

    /// True for a window of zero bytes
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Position within the window
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Remaining bytes from the current position to the end of the window
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }

    /// Effective (power of two) alignment
    pub fn alignment(&self) -> u64 {
        1u64 << self.alignment_bits
    }

    /// Skew between the logical position and the rounded-down base cursor
    pub fn position_offset(&self) -> u64 {
        (self.start + self.position) & self.alignment_mask
    }

    fn physical_target(&self) -> u64 {
        (self.start + self.position) & !self.alignment_mask
    }

    /// Borrow the base stream
    pub fn get_ref(&self) -> &B {
        &self.base
    }

    /// Mutably borrow the base stream
    ///
    /// The base cursor is re-established on the next operation.
    pub fn get_mut(&mut self) -> &mut B {
        self.base_cursor = None;
        &mut self.base
    }

    /// Unwrap, returning the base stream
    pub fn into_inner(self) -> B {
        self.base
    }

    fn seek_target(&self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.position, self.length)?;
        if target > self.length {
            return Err(Error::invalid_argument(format!(
                "Seek to {} beyond end of segment ({} bytes)",
                target, self.length
            ))
            .into());
        }
        Ok(target)
    }

    /// Bytes a read of `len` may deliver, and the padded base read it needs
    fn plan_read(&self, len: usize) -> io::Result<(usize, usize)> {
        let count = (len as u64).min(self.remaining());
        let padded = align_up(count + self.position_offset(), self.alignment())?;
        Ok((
            u64_to_usize(count, "Segment read")?,
            u64_to_usize(padded, "Segment read")?,
        ))
    }

    fn check_writable(&self, can_write: bool) -> io::Result<()> {
        if !can_write {
            return Err(Error::unsupported("Write on a read-only segment").into());
        }
        if self.position >= self.length {
            return Err(Error::end_of_stream(format!(
                "Write at {} past end of segment ({} bytes)",
                self.position, self.length
            ))
            .into());
        }
        Ok(())
    }
}

impl<B: MediaStream> BoundedAlignedSegment<B> {
    /// Create an unaligned window of at most `max_length` bytes at `start`
    pub fn new(base: B, start: u64, max_length: u64) -> io::Result<Self> {
        Self::with_options(base, start, max_length, SegmentOptions::default())
    }

    /// Create a window with explicit options
    ///
    /// The length is clamped to what the base stream holds past `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the alignment is invalid or the base cannot be
    /// positioned at the window start
    pub fn with_options(
        mut base: B,
        start: u64,
        max_length: u64,
        options: SegmentOptions,
    ) -> io::Result<Self> {
        let available = base.length()?.saturating_sub(start);
        let mut segment = Self::build(base, start, max_length.min(available), options)?;
        segment.settle_base()?;
        Ok(segment)
    }

    /// Put the base cursor on the rounded-down physical position
    fn settle_base(&mut self) -> io::Result<()> {
        let target = self.physical_target();
        if self.base_cursor != Some(target) {
            self.base.seek(SeekFrom::Start(target))?;
            self.base_cursor = Some(target);
        }
        Ok(())
    }

    fn read_window(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (count, padded) = self.plan_read(buf.len())?;
        if count == 0 {
            return Ok(0);
        }
        self.settle_base()?;
        let target = self.physical_target();
        let offset = self.position_offset() as usize;

        if padded == count {
            let n = read_full(&mut self.base, &mut buf[..count])?;
            self.base_cursor = Some(target + n as u64);
            self.position += n as u64;
            return Ok(n);
        }

        trace!(offset = target, count = padded, "padded segment read");
        let mut scratch = self.pool.rent(padded)?;
        let got = read_full(&mut self.base, &mut scratch)?;
        self.base_cursor = Some(target + got as u64);

        let usable = got.saturating_sub(offset).min(count);
        buf[..usable].copy_from_slice(&scratch[offset..offset + usable]);
        self.position += usable as u64;
        Ok(usable)
    }

    fn write_window(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.check_writable(self.base.can_write())?;

        let count = (buf.len() as u64).min(self.remaining()) as usize;
        let absolute = self.start + self.position;
        if self.base_cursor != Some(absolute) {
            self.base.seek(SeekFrom::Start(absolute))?;
        }
        let n = self.base.write(&buf[..count])?;
        self.base_cursor = Some(absolute + n as u64);
        self.position += n as u64;
        Ok(n)
    }

    /// Flush and close the base stream, reporting any failure
    pub fn close(mut self) -> io::Result<()> {
        self.base.flush()
    }
}

impl<B: MediaStream> Read for BoundedAlignedSegment<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_window(buf)
    }
}

impl<B: MediaStream> Write for BoundedAlignedSegment<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_window(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.base.flush()
    }
}

impl<B: MediaStream> Seek for BoundedAlignedSegment<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = self.seek_target(pos)?;
        self.settle_base()?;
        Ok(self.position)
    }
}

impl<B: MediaStream> PhysicalPosition for BoundedAlignedSegment<B> {
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        self.settle_base()?;
        let base = self.base.physical_or_raw_position()?;
        Ok(Some(base + self.position_offset()))
    }
}

impl<B: MediaStream> MediaStream for BoundedAlignedSegment<B> {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.length)
    }

    fn set_length(&mut self, _length: u64) -> io::Result<()> {
        Err(Error::unsupported("Segment length is fixed").into())
    }

    fn can_read(&self) -> bool {
        self.base.can_read()
    }

    fn can_write(&self) -> bool {
        self.base.can_write()
    }
}

impl<B: AsyncMediaStream> BoundedAlignedSegment<B> {
    /// Suspending form of [`BoundedAlignedSegment::with_options`]
    pub async fn open_async(
        mut base: B,
        start: u64,
        max_length: u64,
        options: SegmentOptions,
    ) -> io::Result<Self> {
        let available = base.length_async().await?.saturating_sub(start);
        let mut segment = Self::build(base, start, max_length.min(available), options)?;
        segment.settle_base_async().await?;
        Ok(segment)
    }

    async fn settle_base_async(&mut self) -> io::Result<()> {
        let target = self.physical_target();
        if self.base_cursor != Some(target) {
            // Forget the cursor until the seek completes
            self.base_cursor = None;
            self.base.seek_async(SeekFrom::Start(target)).await?;
            self.base_cursor = Some(target);
        }
        Ok(())
    }

    async fn read_window_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (count, padded) = self.plan_read(buf.len())?;
        if count == 0 {
            return Ok(0);
        }
        self.settle_base_async().await?;
        let target = self.physical_target();
        let offset = self.position_offset() as usize;
        self.base_cursor = None;

        if padded == count {
            let n = self.base.read_full_async(&mut buf[..count]).await?;
            self.base_cursor = Some(target + n as u64);
            self.position += n as u64;
            return Ok(n);
        }

        trace!(offset = target, count = padded, "padded segment read");
        let mut scratch = self.pool.rent(padded)?;
        let got = self.base.read_full_async(&mut scratch).await?;
        self.base_cursor = Some(target + got as u64);

        let usable = got.saturating_sub(offset).min(count);
        buf[..usable].copy_from_slice(&scratch[offset..offset + usable]);
        self.position += usable as u64;
        Ok(usable)
    }

    async fn write_window_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.check_writable(AsyncMediaStream::can_write(&self.base))?;

        let count = (buf.len() as u64).min(self.remaining()) as usize;
        let absolute = self.start + self.position;
        if self.base_cursor != Some(absolute) {
            self.base_cursor = None;
            self.base.seek_async(SeekFrom::Start(absolute)).await?;
        }
        self.base_cursor = None;
        let n = self.base.write_async(&buf[..count]).await?;
        self.base_cursor = Some(absolute + n as u64);
        self.position += n as u64;
        Ok(n)
    }

    /// Flush and close the base stream, reporting any failure
    pub async fn close_async(mut self) -> io::Result<()> {
        self.base.flush_async().await
    }
}

#[async_trait]
impl<B: AsyncMediaStream> AsyncMediaStream for BoundedAlignedSegment<B> {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_window_async(buf).await
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_window_async(buf).await
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = self.seek_target(pos)?;
        self.position = target;
        self.settle_base_async().await?;
        Ok(target)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        self.base.flush_async().await
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Ok(self.length)
    }

    async fn set_length_async(&mut self, _length: u64) -> io::Result<()> {
        Err(Error::unsupported("Segment length is fixed").into())
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        self.settle_base_async().await?;
        let base = self.base.physical_or_raw_position_async().await?;
        Ok(Some(base + self.position_offset()))
    }

    fn can_read(&self) -> bool {
        AsyncMediaStream::can_read(&self.base)
    }

    fn can_write(&self) -> bool {
        AsyncMediaStream::can_write(&self.base)
    }
}
