//! Aligned stream - block-aligned I/O over any base stream
//!
//! Every transfer issued to the base stream starts on an alignment boundary
//! and spans whole blocks; the only exception is a short final read clamped
//! at the end of the medium. Unaligned requests are padded through a pooled
//! scratch buffer, and unaligned writes read-modify-write the partial blocks
//! at either end so bytes outside the write window survive.

use async_trait::async_trait;
use blockpipe_core::{
    align_up, checked_add_u64, read_full, resolve_seek, validate_alignment, AlignedSpan,
    AsyncMediaStream, BufferPool, Error, MediaStream, PhysicalPosition, DEFAULT_ALIGNMENT,
};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, trace, warn};

/// Configuration for an [`AlignedStream`]
#[derive(Debug, Clone)]
pub struct AlignedStreamOptions {
    /// Block size every base transfer is aligned to
    pub alignment: usize,
    /// Extend the base in multiples of this many bytes when a write passes
    /// its end (0 disables growth)
    pub grow_interval: u64,
    /// Pool scratch buffers are rented from
    pub pool: BufferPool,
}

impl Default for AlignedStreamOptions {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            grow_interval: 0,
            pool: BufferPool::shared(),
        }
    }
}

impl AlignedStreamOptions {
    /// Set the alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the growth interval
    pub fn with_grow_interval(mut self, grow_interval: u64) -> Self {
        self.grow_interval = grow_interval;
        self
    }

    /// Use a specific buffer pool
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }
}

/// A stream that only ever issues block-aligned I/O to its base.
///
/// The logical position is independent of the base stream's position and
/// always reflects exactly the bytes delivered or accepted. The base stream
/// is repositioned by every call; the wrapper is not synchronized.
///
/// Owning `B` closes the base together with the wrapper; pass `&mut B` to
/// keep the base open afterwards.
///
/// # Example
///
/// ```rust
/// use blockpipe_pipeline::{AlignedStream, AlignedStreamOptions};
/// use std::io::{Cursor, Read, Seek, SeekFrom, Write};
///
/// let disk = Cursor::new(vec![0u8; 4096]);
/// let mut aligned = AlignedStream::with_options(disk, AlignedStreamOptions::default()).unwrap();
///
/// aligned.seek(SeekFrom::Start(5)).unwrap();
/// aligned.write_all(b"liberation").unwrap();
///
/// let mut buf = [0u8; 10];
/// aligned.seek(SeekFrom::Start(5)).unwrap();
/// aligned.read_exact(&mut buf).unwrap();
/// assert_eq!(&buf, b"liberation");
/// ```
pub struct AlignedStream<B> {
    base: B,
    alignment: usize,
    grow_interval: u64,
    position: u64,
    pool: BufferPool,
}

impl<B> AlignedStream<B> {
    /// Wrap `base` with the given alignment and default options
    ///
    /// # Errors
    ///
    /// Returns an error if the alignment is zero or above the limit
    pub fn new(base: B, alignment: usize) -> io::Result<Self> {
        Self::with_options(base, AlignedStreamOptions::default().with_alignment(alignment))
    }

    /// Wrap `base` with explicit options
    pub fn with_options(base: B, options: AlignedStreamOptions) -> io::Result<Self> {
        validate_alignment(options.alignment)?;

        Ok(Self {
            base,
            alignment: options.alignment,
            grow_interval: options.grow_interval,
            position: 0,
            pool: options.pool,
        })
    }

    /// Block size of base transfers
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Growth interval (0 when growth is disabled)
    pub fn grow_interval(&self) -> u64 {
        self.grow_interval
    }

    /// Logical position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Borrow the base stream
    pub fn get_ref(&self) -> &B {
        &self.base
    }

    /// Mutably borrow the base stream
    pub fn get_mut(&mut self) -> &mut B {
        &mut self.base
    }

    /// Unwrap, returning the base stream
    pub fn into_inner(self) -> B {
        self.base
    }
}

/// Clamp `count` bytes at `offset` to a medium of `length` bytes
fn clamp_window(offset: u64, count: usize, length: u64) -> usize {
    if offset >= length {
        return 0;
    }
    let available = length - offset;
    if count as u64 > available {
        debug!(
            offset,
            requested = count,
            available,
            "read clamped at end of medium"
        );
        available as usize
    } else {
        count
    }
}

/// Copy the payload out of a padded read; `None` when the prefix came back short
fn extract_payload(span: &AlignedSpan, scratch: &[u8], got: usize, buf: &mut [u8]) -> Option<usize> {
    if got < span.prefix {
        warn!(
            prefix = span.prefix,
            got, "short read inside leading padding"
        );
        return None;
    }
    let available = (got - span.prefix).min(span.count);
    buf[..available].copy_from_slice(&scratch[span.prefix..span.prefix + available]);
    Some(available)
}

fn read_only_error() -> io::Error {
    Error::unsupported("Write on a read-only aligned stream").into()
}

impl<B: MediaStream> AlignedStream<B> {
    /// Bounds-checked read of `buf.len()` bytes at `offset`
    ///
    /// Reading at or past the end returns 0; a window crossing the end is
    /// clamped and logged rather than failed.
    fn safe_read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let length = self.base.length()?;
        let count = clamp_window(offset, buf.len(), length);
        if count == 0 {
            return Ok(0);
        }

        self.base.seek(SeekFrom::Start(offset))?;
        trace!(offset, count, "aligned read");
        read_full(&mut self.base, &mut buf[..count])
    }

    /// Extend the base so `end` fits, rounding up to the growth interval
    fn grow_to(&mut self, end: u64) -> io::Result<()> {
        if self.grow_interval == 0 {
            return Ok(());
        }
        let length = self.base.length()?;
        if end <= length {
            return Ok(());
        }
        let new_length = align_up(end, self.grow_interval)?;
        debug!(from = length, to = new_length, "growing base stream");
        self.base.set_length(new_length)
    }

    fn write_block(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.base.seek(SeekFrom::Start(offset))?;
        trace!(offset, count = data.len(), "aligned write");
        self.base.write_all(data)
    }

    fn read_aligned(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let span = AlignedSpan::new(self.position, buf.len(), self.alignment)?;
        if span.is_aligned() {
            let n = self.safe_read(self.position, buf)?;
            self.position += n as u64;
            return Ok(n);
        }

        let mut scratch = self.pool.rent(span.total())?;
        let got = self.safe_read(span.start(self.position), &mut scratch)?;
        match extract_payload(&span, &scratch, got, buf) {
            Some(n) => {
                self.position += n as u64;
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write_aligned(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.base.can_write() {
            return Err(read_only_error());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let span = AlignedSpan::new(self.position, buf.len(), self.alignment)?;
        let start = span.start(self.position);
        let end = checked_add_u64(start, span.total() as u64, "Aligned write end")?;
        let new_position = checked_add_u64(self.position, buf.len() as u64, "Aligned write")?;

        if span.is_aligned() {
            self.grow_to(end)?;
            self.write_block(start, buf)?;
        } else {
            let mut scratch = self.pool.rent(span.total())?;
            if span.prefix > 0 {
                self.safe_read(start, &mut scratch[..span.alignment])?;
            }
            if span.suffix > 0 && !(span.prefix > 0 && span.single_block()) {
                let last = span.last_block();
                self.safe_read(start + last as u64, &mut scratch[last..])?;
            }
            scratch[span.prefix..span.prefix + span.count].copy_from_slice(buf);

            self.grow_to(end)?;
            self.write_block(start, &scratch)?;
        }

        self.position = new_position;
        Ok(buf.len())
    }

    /// Flush and close the base stream, reporting any failure
    pub fn close(mut self) -> io::Result<()> {
        self.base.flush()
    }
}

impl<B: MediaStream> Read for AlignedStream<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_aligned(buf)
    }
}

impl<B: MediaStream> Write for AlignedStream<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_aligned(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.base.flush()
    }
}

impl<B: MediaStream> Seek for AlignedStream<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let length = match pos {
            SeekFrom::End(_) => self.base.length()?,
            _ => 0,
        };
        self.position = resolve_seek(pos, self.position, length)?;
        Ok(self.position)
    }
}

impl<B: MediaStream> PhysicalPosition for AlignedStream<B> {
    /// Repositions the base at the logical position before asking it
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        self.base.seek(SeekFrom::Start(self.position))?;
        Ok(Some(self.base.physical_or_raw_position()?))
    }
}

impl<B: MediaStream> MediaStream for AlignedStream<B> {
    fn length(&mut self) -> io::Result<u64> {
        self.base.length()
    }

    fn set_length(&mut self, length: u64) -> io::Result<()> {
        if !self.base.can_write() {
            return Err(read_only_error());
        }
        self.base.set_length(length)
    }

    fn can_read(&self) -> bool {
        self.base.can_read()
    }

    fn can_write(&self) -> bool {
        self.base.can_write()
    }

    fn can_seek(&self) -> bool {
        self.base.can_seek()
    }
}

impl<B: AsyncMediaStream> AlignedStream<B> {
    async fn safe_read_async(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let length = self.base.length_async().await?;
        let count = clamp_window(offset, buf.len(), length);
        if count == 0 {
            return Ok(0);
        }

        self.base.seek_async(SeekFrom::Start(offset)).await?;
        trace!(offset, count, "aligned read");
        self.base.read_full_async(&mut buf[..count]).await
    }

    async fn grow_to_async(&mut self, end: u64) -> io::Result<()> {
        if self.grow_interval == 0 {
            return Ok(());
        }
        let length = self.base.length_async().await?;
        if end <= length {
            return Ok(());
        }
        let new_length = align_up(end, self.grow_interval)?;
        debug!(from = length, to = new_length, "growing base stream");
        self.base.set_length_async(new_length).await
    }

    async fn write_block_async(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.base.seek_async(SeekFrom::Start(offset)).await?;
        trace!(offset, count = data.len(), "aligned write");
        self.base.write_all_async(data).await
    }

    async fn read_aligned_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let position = self.position;
        let span = AlignedSpan::new(position, buf.len(), self.alignment)?;
        if span.is_aligned() {
            let n = self.safe_read_async(position, buf).await?;
            self.position = position + n as u64;
            return Ok(n);
        }

        let mut scratch = self.pool.rent(span.total())?;
        let got = self.safe_read_async(span.start(position), &mut scratch).await?;
        match extract_payload(&span, &scratch, got, buf) {
            Some(n) => {
                self.position = position + n as u64;
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn write_aligned_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !AsyncMediaStream::can_write(&self.base) {
            return Err(read_only_error());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let position = self.position;
        let span = AlignedSpan::new(position, buf.len(), self.alignment)?;
        let start = span.start(position);
        let end = checked_add_u64(start, span.total() as u64, "Aligned write end")?;
        let new_position = checked_add_u64(position, buf.len() as u64, "Aligned write")?;

        if span.is_aligned() {
            self.grow_to_async(end).await?;
            self.write_block_async(start, buf).await?;
        } else {
            let mut scratch = self.pool.rent(span.total())?;
            if span.prefix > 0 {
                self.safe_read_async(start, &mut scratch[..span.alignment])
                    .await?;
            }
            if span.suffix > 0 && !(span.prefix > 0 && span.single_block()) {
                let last = span.last_block();
                self.safe_read_async(start + last as u64, &mut scratch[last..])
                    .await?;
            }
            scratch[span.prefix..span.prefix + span.count].copy_from_slice(buf);

            self.grow_to_async(end).await?;
            self.write_block_async(start, &scratch).await?;
        }

        // Committed only once the block write has completed
        self.position = new_position;
        Ok(buf.len())
    }

    /// Flush and close the base stream, reporting any failure
    pub async fn close_async(mut self) -> io::Result<()> {
        self.base.flush_async().await
    }
}

#[async_trait]
impl<B: AsyncMediaStream> AsyncMediaStream for AlignedStream<B> {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_aligned_async(buf).await
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_aligned_async(buf).await
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let length = match pos {
            SeekFrom::End(_) => self.base.length_async().await?,
            _ => 0,
        };
        self.position = resolve_seek(pos, self.position, length)?;
        Ok(self.position)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        self.base.flush_async().await
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        self.base.length_async().await
    }

    async fn set_length_async(&mut self, length: u64) -> io::Result<()> {
        if !AsyncMediaStream::can_write(&self.base) {
            return Err(read_only_error());
        }
        self.base.set_length_async(length).await
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        self.base.seek_async(SeekFrom::Start(self.position)).await?;
        Ok(Some(self.base.physical_or_raw_position_async().await?))
    }

    fn can_read(&self) -> bool {
        AsyncMediaStream::can_read(&self.base)
    }

    fn can_write(&self) -> bool {
        AsyncMediaStream::can_write(&self.base)
    }

    fn can_seek(&self) -> bool {
        AsyncMediaStream::can_seek(&self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmented::SegmentedStream;
    use crate::testutil::{pattern, Op, RecordingMedium};
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::time::timeout;

    fn aligned(medium: RecordingMedium, alignment: usize) -> AlignedStream<RecordingMedium> {
        AlignedStream::new(medium, alignment).unwrap()
    }

    #[test]
    fn test_worked_example() {
        let original = pattern(4096);
        let mut stream = aligned(RecordingMedium::new(original.clone()), 512);

        stream.seek(SeekFrom::Start(5)).unwrap();
        let payload = *b"0123456789";
        assert_eq!(stream.write(&payload).unwrap(), 10);
        assert_eq!(stream.position(), 15);

        assert_eq!(
            stream.get_ref().ops,
            vec![
                Op::Read { offset: 0, len: 512 },
                Op::Write { offset: 0, len: 512 },
            ]
        );

        stream.seek(SeekFrom::Start(5)).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(stream.read(&mut buf).unwrap(), 10);
        assert_eq!(buf, payload);
        assert_eq!(stream.position(), 15);

        let data = &stream.get_ref().data;
        assert_eq!(data[..5], original[..5]);
        assert_eq!(data[15..512], original[15..512]);
        assert_eq!(data[512..], original[512..]);
        stream.get_ref().assert_aligned(512);
    }

    #[test]
    fn test_write_crossing_block_boundary() {
        let original = pattern(2048);
        let mut stream = aligned(RecordingMedium::new(original.clone()), 512);

        stream.seek(SeekFrom::Start(510)).unwrap();
        stream.write_all(&[0xEE; 4]).unwrap();

        assert_eq!(
            stream.get_ref().ops,
            vec![
                Op::Read { offset: 0, len: 512 },
                Op::Read { offset: 512, len: 512 },
                Op::Write { offset: 0, len: 1024 },
            ]
        );

        let data = &stream.get_ref().data;
        assert_eq!(data[..510], original[..510]);
        assert_eq!(data[510..514], [0xEE; 4]);
        assert_eq!(data[514..], original[514..]);
    }

    #[test]
    fn test_aligned_write_is_direct() {
        let mut stream = aligned(RecordingMedium::patterned(4096), 512);
        stream.seek(SeekFrom::Start(1024)).unwrap();
        stream.write_all(&[1u8; 1024]).unwrap();

        assert_eq!(
            stream.get_ref().ops,
            vec![Op::Write {
                offset: 1024,
                len: 1024
            }]
        );
    }

    #[test]
    fn test_alignment_invariant_mixed_io() {
        let mut stream = aligned(RecordingMedium::patterned(8192), 512);
        let requests: [(u64, usize); 6] = [(0, 1), (3, 700), (511, 2), (1000, 3000), (4096, 512), (8000, 100)];

        for (offset, len) in requests {
            stream.seek(SeekFrom::Start(offset)).unwrap();
            let mut buf = vec![0u8; len];
            let _ = stream.read(&mut buf).unwrap();
            stream.seek(SeekFrom::Start(offset)).unwrap();
            let write_len = len.min(8192 - offset as usize);
            stream.write_all(&vec![0x5A; write_len]).unwrap();
        }

        stream.get_ref().assert_aligned(512);
    }

    #[test]
    fn test_read_clamped_at_end_of_medium() {
        let original = pattern(1000);
        let mut stream = aligned(RecordingMedium::new(original.clone()), 512);

        stream.seek(SeekFrom::Start(900)).unwrap();
        let mut buf = [0u8; 200];
        assert_eq!(stream.read(&mut buf).unwrap(), 100);
        assert_eq!(buf[..100], original[900..]);
        assert_eq!(stream.position(), 1000);

        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.position(), 1000);
        stream.get_ref().assert_aligned(512);
    }

    #[test]
    fn test_aligned_read_clamped_at_end() {
        let mut stream = aligned(RecordingMedium::patterned(1000), 512);
        stream.seek(SeekFrom::Start(512)).unwrap();

        let mut buf = [0u8; 1024];
        assert_eq!(stream.read(&mut buf).unwrap(), 488);
        assert_eq!(
            stream.get_ref().ops,
            vec![Op::Read {
                offset: 512,
                len: 488
            }]
        );
    }

    #[test]
    fn test_read_with_short_prefix_returns_zero() {
        let mut stream = aligned(RecordingMedium::patterned(1000), 512);
        stream.seek(SeekFrom::Start(1010)).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.position(), 1010);
    }

    #[test]
    fn test_write_on_read_only_base() {
        let mut stream = aligned(RecordingMedium::patterned(1024).read_only(), 512);
        let err = stream.write(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(matches!(Error::classify(&err), Some(Error::Unsupported(_))));
        assert!(stream.get_ref().ops.is_empty());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_seek_negative_rejected() {
        let mut stream = aligned(RecordingMedium::patterned(1024), 512);
        stream.seek(SeekFrom::Start(10)).unwrap();

        let err = stream.seek(SeekFrom::Current(-11)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(stream.position(), 10);

        assert_eq!(stream.seek(SeekFrom::End(-24)).unwrap(), 1000);
    }

    #[test]
    fn test_growth_rounds_to_interval() {
        let options = AlignedStreamOptions::default()
            .with_alignment(512)
            .with_grow_interval(4096);
        let mut stream = AlignedStream::with_options(RecordingMedium::new(Vec::new()), options).unwrap();

        stream.seek(SeekFrom::Start(5)).unwrap();
        stream.write_all(b"grow").unwrap();
        assert_eq!(stream.length().unwrap(), 4096);
        assert!(stream.get_ref().ops.contains(&Op::SetLength(4096)));

        // Already large enough: no further resize
        stream.seek(SeekFrom::Start(600)).unwrap();
        stream.write_all(b"more").unwrap();
        let resizes = stream
            .get_ref()
            .ops
            .iter()
            .filter(|op| matches!(op, Op::SetLength(_)))
            .count();
        assert_eq!(resizes, 1);

        let mut buf = [0u8; 4];
        stream.seek(SeekFrom::Start(5)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"grow");
    }

    #[test]
    fn test_physical_position_adds_base_offset() {
        let medium = RecordingMedium::patterned(4096).at_physical(1_048_576);
        let mut stream = aligned(medium, 512);

        stream.seek(SeekFrom::Start(700)).unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();

        assert_eq!(stream.physical_position().unwrap(), Some(1_048_576 + 703));
    }

    #[test]
    fn test_physical_position_over_plain_base() {
        let mut stream = AlignedStream::new(Cursor::new(vec![0u8; 1024]), 512).unwrap();
        stream.seek(SeekFrom::Start(77)).unwrap();
        assert_eq!(stream.physical_position().unwrap(), Some(77));
    }

    #[test]
    fn test_scratch_buffers_return_to_pool() {
        let pool = BufferPool::new(4);
        let options = AlignedStreamOptions::default().with_pool(pool.clone());
        let mut stream = AlignedStream::with_options(RecordingMedium::patterned(2048), options).unwrap();

        stream.seek(SeekFrom::Start(3)).unwrap();
        stream.write_all(&[9u8; 20]).unwrap();
        let mut buf = [0u8; 20];
        stream.seek(SeekFrom::Start(3)).unwrap();
        stream.read_exact(&mut buf).unwrap();

        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_byte_alignment_passthrough() {
        let mut stream = aligned(RecordingMedium::patterned(100), 1);
        stream.seek(SeekFrom::Start(33)).unwrap();
        stream.write_all(&[1, 2, 3]).unwrap();

        assert_eq!(
            stream.get_ref().ops,
            vec![Op::Write { offset: 33, len: 3 }]
        );
    }

    #[test]
    fn test_zero_alignment_rejected() {
        assert!(AlignedStream::new(Cursor::new(Vec::<u8>::new()), 0).is_err());
    }

    #[test]
    fn test_borrowed_base_stays_open() {
        let mut disk = Cursor::new(vec![0u8; 1024]);
        {
            let mut stream = AlignedStream::new(&mut disk, 512).unwrap();
            stream.seek(SeekFrom::Start(100)).unwrap();
            stream.write_all(b"kept").unwrap();
            stream.close().unwrap();
        }
        assert_eq!(&disk.get_ref()[100..104], b"kept");
    }

    #[tokio::test]
    async fn test_async_worked_example() {
        let original = pattern(4096);
        let mut stream = aligned(RecordingMedium::new(original.clone()), 512);

        stream.seek_async(SeekFrom::Start(5)).await.unwrap();
        assert_eq!(stream.write_async(b"0123456789").await.unwrap(), 10);
        assert_eq!(
            stream.get_ref().ops,
            vec![
                Op::Read { offset: 0, len: 512 },
                Op::Write { offset: 0, len: 512 },
            ]
        );

        stream.seek_async(SeekFrom::Start(5)).await.unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(stream.read_async(&mut buf).await.unwrap(), 10);
        assert_eq!(&buf, b"0123456789");

        let data = &stream.get_ref().data;
        assert_eq!(data[..5], original[..5]);
        assert_eq!(data[15..], original[15..]);
    }

    #[tokio::test]
    async fn test_async_clamp_and_physical() {
        let medium = RecordingMedium::patterned(1000).at_physical(4096);
        let mut stream = aligned(medium, 512);

        stream.seek_async(SeekFrom::Start(990)).await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(stream.read_async(&mut buf).await.unwrap(), 10);
        assert_eq!(stream.position(), 1000);
        assert_eq!(
            stream.physical_position_async().await.unwrap(),
            Some(4096 + 1000)
        );
    }

    #[tokio::test]
    async fn test_async_read_only_rejected() {
        let mut stream = aligned(RecordingMedium::patterned(512).read_only(), 512);
        let err = stream.write_async(&[1]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
    fn over_two_components() -> AlignedStream<SegmentedStream<RecordingMedium>> {
        let parts = vec![
            RecordingMedium::patterned(1000).at_physical(10_000),
            RecordingMedium::patterned(1000).at_physical(50_000),
        ];
        AlignedStream::new(SegmentedStream::new(parts).unwrap(), 512).unwrap()
    }

    #[test]
    fn test_physical_position_when_padding_crosses_components() {
        let mut stream = over_two_components();

        // The padded block [512, 1024) ends inside the second component
        stream.seek(SeekFrom::Start(976)).unwrap();
        let mut buf = [0u8; 16];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(stream.position(), 992);
        assert_eq!(stream.physical_position().unwrap(), Some(10_992));

        stream.seek(SeekFrom::Start(1003)).unwrap();
        assert_eq!(stream.physical_position().unwrap(), Some(50_003));
    }

    #[tokio::test]
    async fn test_async_physical_position_when_padding_crosses_components() {
        let mut stream = over_two_components();

        stream.seek_async(SeekFrom::Start(976)).await.unwrap();
        let mut buf = [0u8; 16];
        stream.read_full_async(&mut buf).await.unwrap();
        assert_eq!(stream.physical_position_async().await.unwrap(), Some(10_992));
    }

    #[test]
    fn test_write_near_u64_max_is_rejected() {
        let mut stream = aligned(RecordingMedium::patterned(1024), 512);
        stream.seek(SeekFrom::Start(u64::MAX - 5)).unwrap();

        let err = stream.write(&[1u8; 10]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(matches!(Error::classify(&err), Some(Error::InvalidArgument(_))));
        assert_eq!(stream.position(), u64::MAX - 5);
        assert!(stream.get_ref().ops.is_empty());

        let mut bytewise = aligned(RecordingMedium::patterned(16), 1);
        bytewise.seek(SeekFrom::Start(u64::MAX - 5)).unwrap();
        assert_eq!(
            bytewise.write(&[1u8; 10]).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn test_async_write_near_u64_max_is_rejected() {
        let mut stream = aligned(RecordingMedium::patterned(1024), 512);
        stream.seek_async(SeekFrom::Start(u64::MAX - 5)).await.unwrap();

        let err = stream.write_async(&[1u8; 10]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(stream.position(), u64::MAX - 5);
    }

    #[test]
    fn test_close_reports_flush_failure() {
        let mut stream = aligned(RecordingMedium::patterned(1024).failing_flush(), 512);
        stream.seek(SeekFrom::Start(3)).unwrap();
        stream.write_all(b"abc").unwrap();

        let err = stream.close().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(err.to_string(), "flush failed");
    }

    #[tokio::test]
    async fn test_async_close_reports_flush_failure() {
        let stream = aligned(RecordingMedium::patterned(1024).failing_flush(), 512);
        let err = stream.close_async().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_dropped_write_leaves_position() {
        let original = pattern(2048);
        let medium = RecordingMedium::new(original.clone()).stalling_writes(1);
        let mut stream = aligned(medium, 512);
        stream.seek_async(SeekFrom::Start(5)).await.unwrap();

        // Block read of the merge completes, then the block write never does
        let stalled = timeout(Duration::from_millis(20), stream.write_async(b"lost")).await;
        assert!(stalled.is_err());
        assert_eq!(stream.position(), 5);
        assert_eq!(
            stream.get_ref().ops,
            vec![Op::Read { offset: 0, len: 512 }]
        );
        assert_eq!(stream.get_ref().data, original);

        assert_eq!(stream.write_async(b"kept").await.unwrap(), 4);
        assert_eq!(stream.position(), 9);
        assert_eq!(&stream.get_ref().data[5..9], b"kept");
    }

    #[tokio::test]
    async fn test_dropped_read_leaves_position() {
        let original = pattern(2048);
        let mut stream = aligned(RecordingMedium::new(original.clone()).stalling_reads(1), 512);
        stream.seek_async(SeekFrom::Start(700)).await.unwrap();

        let mut buf = [0u8; 20];
        let stalled = timeout(Duration::from_millis(20), stream.read_async(&mut buf)).await;
        assert!(stalled.is_err());
        assert_eq!(stream.position(), 700);

        assert_eq!(stream.read_async(&mut buf).await.unwrap(), 20);
        assert_eq!(buf[..], original[700..720]);
        assert_eq!(stream.position(), 720);
    }
}