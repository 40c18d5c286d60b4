//! Memory-mapped medium - read-only file access without per-read syscalls

use async_trait::async_trait;
use blockpipe_core::{resolve_seek, AsyncMediaStream, Error, MediaStream, PhysicalPosition, MAX_MMAP_SIZE};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A read-only medium backed by a memory-mapped file.
///
/// Positions are file offsets, so the medium reports no separate physical
/// position. Writes and resizes fail with an unsupported-operation error.
///
/// # Example
///
/// ```rust,no_run
/// use blockpipe_pipeline::{AlignedStream, MmapMedium};
/// use std::path::Path;
///
/// let medium = MmapMedium::open(Path::new("disk.img")).unwrap();
/// let aligned = AlignedStream::new(medium, 512).unwrap();
/// ```
pub struct MmapMedium {
    mmap: Mmap,
    position: u64,
}

fn read_only() -> io::Error {
    Error::unsupported("Memory-mapped media are read-only").into()
}

impl MmapMedium {
    /// Map the file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is not a regular file,
    /// or is larger than [`MAX_MMAP_SIZE`]
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    /// Map an already opened file
    ///
    /// # Safety
    ///
    /// Mapping is `unsafe` because another process could truncate or modify
    /// the file while it is mapped. The mapping is private and read-only;
    /// callers must not shrink the file while the medium is alive.
    pub fn from_file(file: &File) -> io::Result<Self> {
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(Error::invalid_argument("Only regular files can be memory-mapped").into());
        }
        if metadata.len() > MAX_MMAP_SIZE {
            return Err(Error::invalid_argument(format!(
                "File size {} exceeds memory mapping limit {}",
                metadata.len(),
                MAX_MMAP_SIZE
            ))
            .into());
        }

        // SAFETY: regular file within the size limit, mapped read-only
        let mmap = unsafe { Mmap::map(file)? };
        Ok(Self { mmap, position: 0 })
    }

    /// Length of the mapped region
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Check if the mapped region is empty
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Current position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left from the current position
    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.position)
    }

    /// Mapped bytes from the current position on
    pub fn as_slice(&self) -> &[u8] {
        let start = self.position.min(self.len()) as usize;
        &self.mmap[start..]
    }

    /// The whole mapped region
    pub fn as_full_slice(&self) -> &[u8] {
        &self.mmap
    }

    fn copy_out(&mut self, buf: &mut [u8]) -> usize {
        let available = self.as_slice();
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        n
    }
}

impl Read for MmapMedium {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.copy_out(buf))
    }
}

impl Write for MmapMedium {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(read_only())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MmapMedium {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = resolve_seek(pos, self.position, self.len())?;
        Ok(self.position)
    }
}

impl PhysicalPosition for MmapMedium {}

impl MediaStream for MmapMedium {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.len())
    }

    fn set_length(&mut self, _length: u64) -> io::Result<()> {
        Err(read_only())
    }

    fn can_write(&self) -> bool {
        false
    }
}

#[async_trait]
impl AsyncMediaStream for MmapMedium {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.copy_out(buf))
    }

    async fn write_async(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(read_only())
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Ok(self.len())
    }

    async fn set_length_async(&mut self, _length: u64) -> io::Result<()> {
        Err(read_only())
    }

    fn can_write(&self) -> bool {
        false
    }
}
