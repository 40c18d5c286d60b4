//! Stream contracts shared by every pipeline layer

use async_trait::async_trait;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Optional physical-position capability
///
/// Reports the true offset on the innermost medium that corresponds to the
/// current logical position. Plain media keep the default (`None`), which
/// means "my raw position is the physical one". Wrappers override it and add
/// their own local offset to whatever their base reports.
pub trait PhysicalPosition {
    /// Physical offset of the current position, if this layer knows one
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

/// Blocking random-access stream over a medium
pub trait MediaStream: Read + Write + Seek + PhysicalPosition + Send {
    /// Total length of the medium in bytes
    fn length(&mut self) -> io::Result<u64>;

    /// Truncate or extend the medium
    fn set_length(&mut self, length: u64) -> io::Result<()>;

    /// Whether reads are supported
    fn can_read(&self) -> bool {
        true
    }

    /// Whether writes are supported
    fn can_write(&self) -> bool {
        true
    }

    /// Whether seeking is supported
    fn can_seek(&self) -> bool {
        true
    }

    /// Physical position when known, otherwise the raw stream position
    fn physical_or_raw_position(&mut self) -> io::Result<u64> {
        match self.physical_position()? {
            Some(position) => Ok(position),
            None => self.stream_position(),
        }
    }
}

/// Read until `buf` is full or the reader reports end of data
///
/// Returns the number of bytes read; a short count means end of medium.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Suspending counterpart of [`MediaStream`]
///
/// Cancelling an operation means dropping its future. Implementations only
/// commit their logical position after the inner awaits they depend on have
/// completed.
#[async_trait]
pub trait AsyncMediaStream: Send {
    /// Read into `buf`, returning the number of bytes read
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`, returning the number of bytes accepted
    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Move the cursor
    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Flush buffered data to the medium
    async fn flush_async(&mut self) -> io::Result<()>;

    /// Total length of the medium in bytes
    async fn length_async(&mut self) -> io::Result<u64>;

    /// Truncate or extend the medium
    async fn set_length_async(&mut self, length: u64) -> io::Result<()>;

    /// Physical offset of the current position, if this layer knows one
    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }

    /// Whether reads are supported
    fn can_read(&self) -> bool {
        true
    }

    /// Whether writes are supported
    fn can_write(&self) -> bool {
        true
    }

    /// Whether seeking is supported
    fn can_seek(&self) -> bool {
        true
    }

    /// Current cursor
    async fn stream_position_async(&mut self) -> io::Result<u64> {
        self.seek_async(SeekFrom::Current(0)).await
    }

    /// Physical position when known, otherwise the raw stream position
    async fn physical_or_raw_position_async(&mut self) -> io::Result<u64> {
        match self.physical_position_async().await? {
            Some(position) => Ok(position),
            None => self.stream_position_async().await,
        }
    }

    /// Read until `buf` is full or the stream reports end of data
    async fn read_full_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_async(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Write the whole of `buf`
    async fn write_all_async(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_async(buf).await {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "medium accepted no bytes",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl PhysicalPosition for File {}

impl MediaStream for File {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_length(&mut self, length: u64) -> io::Result<()> {
        self.set_len(length)
    }
}

impl PhysicalPosition for Cursor<Vec<u8>> {}

impl MediaStream for Cursor<Vec<u8>> {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn set_length(&mut self, length: u64) -> io::Result<()> {
        let length = crate::limits::u64_to_usize(length, "Cursor length")?;
        self.get_mut().resize(length, 0);
        Ok(())
    }
}

impl<T: PhysicalPosition + ?Sized> PhysicalPosition for &mut T {
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        (**self).physical_position()
    }
}

/// Borrowing a medium leaves it open: dropping the wrapper releases only the borrow
impl<T: MediaStream + ?Sized> MediaStream for &mut T {
    fn length(&mut self) -> io::Result<u64> {
        (**self).length()
    }

    fn set_length(&mut self, length: u64) -> io::Result<()> {
        (**self).set_length(length)
    }

    fn can_read(&self) -> bool {
        (**self).can_read()
    }

    fn can_write(&self) -> bool {
        (**self).can_write()
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }
}

impl<T: PhysicalPosition + ?Sized> PhysicalPosition for Box<T> {
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        (**self).physical_position()
    }
}

impl<T: MediaStream + ?Sized> MediaStream for Box<T> {
    fn length(&mut self) -> io::Result<u64> {
        (**self).length()
    }

    fn set_length(&mut self, length: u64) -> io::Result<()> {
        (**self).set_length(length)
    }

    fn can_read(&self) -> bool {
        (**self).can_read()
    }

    fn can_write(&self) -> bool {
        (**self).can_write()
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }
}

#[async_trait]
impl AsyncMediaStream for tokio::fs::File {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::io::AsyncReadExt::read(self, buf).await
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        tokio::io::AsyncWriteExt::write(self, buf).await
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        tokio::io::AsyncSeekExt::seek(self, pos).await
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::flush(self).await
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn set_length_async(&mut self, length: u64) -> io::Result<()> {
        self.set_len(length).await
    }
}

#[async_trait]
impl AsyncMediaStream for Cursor<Vec<u8>> {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        MediaStream::length(self)
    }

    async fn set_length_async(&mut self, length: u64) -> io::Result<()> {
        MediaStream::set_length(self, length)
    }
}

#[async_trait]
impl<T: AsyncMediaStream + ?Sized> AsyncMediaStream for &mut T {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_async(buf).await
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write_async(buf).await
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek_async(pos).await
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        (**self).flush_async().await
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        (**self).length_async().await
    }

    async fn set_length_async(&mut self, length: u64) -> io::Result<()> {
        (**self).set_length_async(length).await
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        (**self).physical_position_async().await
    }

    fn can_read(&self) -> bool {
        (**self).can_read()
    }

    fn can_write(&self) -> bool {
        (**self).can_write()
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }
}

#[async_trait]
impl<T: AsyncMediaStream + ?Sized> AsyncMediaStream for Box<T> {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_async(buf).await
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write_async(buf).await
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek_async(pos).await
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        (**self).flush_async().await
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        (**self).length_async().await
    }

    async fn set_length_async(&mut self, length: u64) -> io::Result<()> {
        (**self).set_length_async(length).await
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        (**self).physical_position_async().await
    }

    fn can_read(&self) -> bool {
        (**self).can_read()
    }

    fn can_write(&self) -> bool {
        (**self).can_write()
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }
}
