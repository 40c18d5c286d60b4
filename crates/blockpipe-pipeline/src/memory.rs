//! Memory medium - growable in-memory byte store

use async_trait::async_trait;
use blockpipe_core::{AsyncMediaStream, MediaStream, PhysicalPosition};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// A medium backed by a growable byte vector.
///
/// Writes past the end extend the medium. This is the buffer-backed component
/// that appendable segmented streams create for data written at their end.
///
/// # Example
///
/// ```rust
/// use blockpipe_pipeline::MemoryMedium;
/// use blockpipe_core::MediaStream;
/// use std::io::Write;
///
/// let mut medium = MemoryMedium::new();
/// medium.write_all(b"sector").unwrap();
/// assert_eq!(medium.length().unwrap(), 6);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    cursor: Cursor<Vec<u8>>,
}

impl MemoryMedium {
    /// Create an empty medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zero-filled medium of `size` bytes
    pub fn zeroed(size: usize) -> Self {
        Self::from(vec![0u8; size])
    }

    /// Current cursor
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Length of the stored data
    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    /// Check if the medium holds no data
    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// The stored bytes
    pub fn as_slice(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    /// Consume the medium and return its bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl From<Vec<u8>> for MemoryMedium {
    fn from(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for MemoryMedium {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for MemoryMedium {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryMedium {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl PhysicalPosition for MemoryMedium {}

impl MediaStream for MemoryMedium {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.len())
    }

    fn set_length(&mut self, length: u64) -> io::Result<()> {
        MediaStream::set_length(&mut self.cursor, length)
    }
}

#[async_trait]
impl AsyncMediaStream for MemoryMedium {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cursor.write(buf)
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Ok(self.len())
    }

    async fn set_length_async(&mut self, length: u64) -> io::Result<()> {
        MediaStream::set_length(&mut self.cursor, length)
    }
}
