//! Test media that record every transfer issued to them

use async_trait::async_trait;
use blockpipe_core::{AsyncMediaStream, MediaStream, PhysicalPosition};
use std::io::{self, Read, Seek, SeekFrom, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read { offset: u64, len: usize },
    Write { offset: u64, len: usize },
    SetLength(u64),
}

/// In-memory medium that logs reads, writes and resizes
pub struct RecordingMedium {
    pub data: Vec<u8>,
    pub position: u64,
    pub ops: Vec<Op>,
    pub read_only: bool,
    /// When set, reports `physical_base + position` as its physical position
    pub physical_base: Option<u64>,
    pub fail_flush: bool,
    pub fail_reads: bool,
    /// Async reads that move the cursor and then never complete
    pub stall_reads: usize,
    /// Async writes that never start
    pub stall_writes: usize,
}

impl RecordingMedium {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            ops: Vec::new(),
            read_only: false,
            physical_base: None,
            fail_flush: false,
            fail_reads: false,
            stall_reads: 0,
            stall_writes: 0,
        }
    }

    /// Medium of `len` bytes where byte `i` is `i % 251`
    pub fn patterned(len: usize) -> Self {
        Self::new(pattern(len))
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn at_physical(mut self, base: u64) -> Self {
        self.physical_base = Some(base);
        self
    }

    pub fn failing_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn stalling_reads(mut self, count: usize) -> Self {
        self.stall_reads = count;
        self
    }

    pub fn stalling_writes(mut self, count: usize) -> Self {
        self.stall_writes = count;
        self
    }

    fn check_flush(&self) -> io::Result<()> {
        if self.fail_flush {
            return Err(io::Error::other("flush failed"));
        }
        Ok(())
    }

    /// Panics unless every transfer starts on and spans whole blocks, except
    /// a final read ending exactly at the end of the medium.
    pub fn assert_aligned(&self, alignment: usize) {
        let a = alignment as u64;
        for op in &self.ops {
            match *op {
                Op::Read { offset, len } => {
                    assert_eq!(offset % a, 0, "unaligned read offset in {:?}", op);
                    let ends_medium = offset + len as u64 == self.data.len() as u64;
                    assert!(
                        len as u64 % a == 0 || ends_medium,
                        "unaligned read length in {:?}",
                        op
                    );
                }
                Op::Write { offset, len } => {
                    assert_eq!(offset % a, 0, "unaligned write offset in {:?}", op);
                    assert_eq!(len as u64 % a, 0, "unaligned write length in {:?}", op);
                }
                Op::SetLength(_) => {}
            }
        }
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

impl Read for RecordingMedium {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads {
            return Err(io::Error::other("unreadable sector"));
        }
        let start = (self.position as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        if !buf.is_empty() {
            self.ops.push(Op::Read {
                offset: self.position,
                len: buf.len(),
            });
        }
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for RecordingMedium {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "read-only medium",
            ));
        }
        self.ops.push(Op::Write {
            offset: self.position,
            len: buf.len(),
        });
        let start = self.position as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_flush()
    }
}

impl Seek for RecordingMedium {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let length = self.data.len() as u64;
        self.position = blockpipe_core::resolve_seek(pos, self.position, length)?;
        Ok(self.position)
    }
}

impl PhysicalPosition for RecordingMedium {
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        Ok(self.physical_base.map(|base| base + self.position))
    }
}

impl MediaStream for RecordingMedium {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_length(&mut self, length: u64) -> io::Result<()> {
        self.ops.push(Op::SetLength(length));
        self.data.resize(length as usize, 0);
        Ok(())
    }

    fn can_write(&self) -> bool {
        !self.read_only
    }
}

#[async_trait]
impl AsyncMediaStream for RecordingMedium {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = Read::read(self, buf)?;
        if self.stall_reads > 0 {
            self.stall_reads -= 1;
            std::future::pending::<()>().await;
        }
        Ok(n)
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stall_writes > 0 {
            self.stall_writes -= 1;
            std::future::pending::<()>().await;
        }
        Write::write(self, buf)
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        self.check_flush()
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn set_length_async(&mut self, length: u64) -> io::Result<()> {
        MediaStream::set_length(self, length)
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        PhysicalPosition::physical_position(self)
    }

    fn can_write(&self) -> bool {
        !self.read_only
    }
}
