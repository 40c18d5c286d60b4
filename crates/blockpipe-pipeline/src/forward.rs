//! Forward-only composite reader
//!
//! Reads a sequence of components one after another without ever seeking.
//! Each component is drained to a zero-byte read and dropped immediately, so
//! at most one of them is open at a time.

use async_trait::async_trait;
use blockpipe_core::{AsyncMediaStream, Error, MediaStream, PhysicalPosition};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

type Components<R> = Box<dyn Iterator<Item = io::Result<R>> + Send>;

/// Sequential, read-only concatenation of components.
///
/// Components are pulled lazily from an iterator, which lets callers open
/// segment files on demand. The position is a byte counter only.
///
/// # Example
///
/// ```rust
/// use blockpipe_pipeline::ForwardReader;
/// use std::io::{Cursor, Read};
///
/// let mut reader = ForwardReader::new(vec![
///     Cursor::new(b"split ".to_vec()),
///     Cursor::new(b"image".to_vec()),
/// ]);
/// let mut all = String::new();
/// reader.read_to_string(&mut all).unwrap();
/// assert_eq!(all, "split image");
/// assert_eq!(reader.position(), 11);
/// ```
pub struct ForwardReader<R> {
    components: Components<R>,
    active: Option<R>,
    position: u64,
    opened: usize,
    /// Failure met after a read had already delivered bytes
    pending: Option<io::Error>,
}

fn unsupported(operation: &str) -> io::Error {
    Error::unsupported(format!("{} on a forward-only reader", operation)).into()
}

impl<R: Send + 'static> ForwardReader<R> {
    /// Read `components` in order
    pub fn new<I>(components: I) -> Self
    where
        I: IntoIterator<Item = R>,
        I::IntoIter: Send + 'static,
    {
        Self::from_fallible(components.into_iter().map(Ok))
    }

    /// Read components produced by a fallible opener; an `Err` item fails the
    /// read that reaches it
    pub fn from_fallible<I>(components: I) -> Self
    where
        I: IntoIterator<Item = io::Result<R>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            components: Box::new(components.into_iter()),
            active: None,
            position: 0,
            opened: 0,
            pending: None,
        }
    }
}

impl<R> ForwardReader<R> {
    /// Bytes delivered so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of components opened so far
    pub fn components_opened(&self) -> usize {
        self.opened
    }

    /// Make a component active if none is; false once all are exhausted
    fn activate(&mut self) -> io::Result<bool> {
        if self.active.is_none() {
            match self.components.next() {
                Some(component) => {
                    self.active = Some(component?);
                    self.opened += 1;
                    debug!(component = self.opened, position = self.position, "component opened");
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn retire(&mut self) {
        self.active = None;
        debug!(component = self.opened, position = self.position, "component exhausted");
    }

    /// Report `err` now, or hold it for the next read if bytes were delivered
    fn fail(&mut self, total: usize, err: io::Error) -> io::Result<usize> {
        if total == 0 {
            return Err(err);
        }
        debug!(total, error = %err, "deferring component failure");
        self.pending = Some(err);
        Ok(total)
    }

    fn take_pending(&mut self) -> io::Result<()> {
        match self.pending.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<R: Read> Read for ForwardReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.take_pending()?;
        let mut total = 0;
        while total < buf.len() {
            match self.activate() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return self.fail(total, e),
            }
            let Some(component) = self.active.as_mut() else {
                break;
            };
            let n = match component.read(&mut buf[total..]) {
                Ok(n) => n,
                Err(e) => return self.fail(total, e),
            };
            if n == 0 {
                self.retire();
                continue;
            }
            total += n;
            self.position += n as u64;
        }
        Ok(total)
    }
}

impl<R> Write for ForwardReader<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("Write"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R> Seek for ForwardReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            // Reporting the counter is harmless; moving it is not
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(unsupported("Seek")),
        }
    }
}

impl<R: PhysicalPosition> PhysicalPosition for ForwardReader<R> {
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        match self.active.as_mut() {
            Some(component) => component.physical_position(),
            None => Ok(None),
        }
    }
}

impl<R: MediaStream> MediaStream for ForwardReader<R> {
    fn length(&mut self) -> io::Result<u64> {
        Err(unsupported("Length"))
    }

    fn set_length(&mut self, _length: u64) -> io::Result<()> {
        Err(unsupported("SetLength"))
    }

    fn can_write(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        false
    }
}

#[async_trait]
impl<R: AsyncMediaStream> AsyncMediaStream for ForwardReader<R> {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.take_pending()?;
        let mut total = 0;
        while total < buf.len() {
            match self.activate() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return self.fail(total, e),
            }
            let Some(component) = self.active.as_mut() else {
                break;
            };
            let n = match component.read_async(&mut buf[total..]).await {
                Ok(n) => n,
                Err(e) => return self.fail(total, e),
            };
            if n == 0 {
                self.retire();
                continue;
            }
            total += n;
            self.position += n as u64;
        }
        Ok(total)
    }

    async fn write_async(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("Write"))
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(unsupported("Seek")),
        }
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Err(unsupported("Length"))
    }

    async fn set_length_async(&mut self, _length: u64) -> io::Result<()> {
        Err(unsupported("SetLength"))
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        match self.active.as_mut() {
            Some(component) => component.physical_position_async().await,
            None => Ok(None),
        }
    }

    fn can_write(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMedium;
    use crate::testutil::{pattern, RecordingMedium};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_reads_components_in_order() {
        let parts = vec![pattern(700), vec![9u8; 300], pattern(10)];
        let expected = parts.concat();
        let mut reader = ForwardReader::new(parts.into_iter().map(Cursor::new));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, expected);
        assert_eq!(reader.position(), 1010);
        assert_eq!(reader.components_opened(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_single_read_spans_components() {
        let mut reader = ForwardReader::new(vec![
            Cursor::new(b"abc".to_vec()),
            Cursor::new(Vec::new()),
            Cursor::new(b"defg".to_vec()),
        ]);
        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"abcde");
    }

    struct DropCounter {
        inner: Cursor<Vec<u8>>,
        dropped: Arc<AtomicUsize>,
    }

    impl Read for DropCounter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_exhausted_components_released_early() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let parts: Vec<DropCounter> = (0..3)
            .map(|_| DropCounter {
                inner: Cursor::new(vec![1u8; 4]),
                dropped: Arc::clone(&dropped),
            })
            .collect();
        let mut reader = ForwardReader::new(parts);

        let mut buf = [0u8; 6];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), 6);
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_opener_error_surfaces_on_read() {
        let items: Vec<io::Result<Cursor<Vec<u8>>>> = vec![
            Ok(Cursor::new(vec![1u8; 2])),
            Err(io::Error::new(io::ErrorKind::NotFound, "segment.002")),
        ];
        let mut reader = ForwardReader::from_fallible(items);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 1]);
        assert_eq!(reader.position(), 2);

        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_opener_error_on_first_component_fails_read() {
        let items: Vec<io::Result<Cursor<Vec<u8>>>> = vec![
            Err(io::Error::new(io::ErrorKind::NotFound, "segment.001")),
            Ok(Cursor::new(vec![1u8; 2])),
        ];
        let mut reader = ForwardReader::from_fallible(items);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(reader.position(), 0);
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("bad sector"))
        }
    }

    #[test]
    fn test_component_error_keeps_delivered_bytes() {
        let parts: Vec<Box<dyn Read + Send>> = vec![
            Box::new(Cursor::new(vec![7u8; 3])),
            Box::new(FailingReader),
        ];
        let mut reader = ForwardReader::new(parts);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[7, 7, 7]);
        assert_eq!(reader.position(), 3);

        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(reader.position(), 3);
    }

    #[test]
    fn test_write_and_seek_unsupported() {
        let mut reader = ForwardReader::new(vec![Cursor::new(vec![0u8; 4])]);

        assert_eq!(reader.write(b"x").unwrap_err().kind(), io::ErrorKind::Unsupported);
        assert_eq!(
            reader.seek(SeekFrom::Start(0)).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert_eq!(reader.set_length(1).unwrap_err().kind(), io::ErrorKind::Unsupported);
        assert!(reader.length().is_err());
        assert_eq!(reader.seek(SeekFrom::Current(0)).unwrap(), 0);
        assert!(!MediaStream::can_seek(&reader));
        assert!(!MediaStream::can_write(&reader));
    }

    #[test]
    fn test_physical_position_tracks_active_component() {
        let mut reader = ForwardReader::new(vec![
            RecordingMedium::patterned(16).at_physical(100),
            RecordingMedium::patterned(16).at_physical(5000),
        ]);
        assert_eq!(reader.physical_position().unwrap(), None);

        let mut buf = [0u8; 20];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.physical_position().unwrap(), Some(5004));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(reader.physical_position().unwrap(), None);
    }

    #[tokio::test]
    async fn test_async_forward_read() {
        let parts = vec![pattern(300), pattern(200)];
        let expected = parts.concat();
        let mut reader = ForwardReader::new(parts.into_iter().map(MemoryMedium::from));

        let mut buf = vec![0u8; 600];
        assert_eq!(reader.read_full_async(&mut buf).await.unwrap(), 500);
        assert_eq!(&buf[..500], &expected[..]);
        assert_eq!(reader.stream_position_async().await.unwrap(), 500);
        assert!(reader.write_async(b"x").await.is_err());
    }
}
