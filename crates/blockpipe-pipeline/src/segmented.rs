//! Segmented streams - several components presented as one address space
//!
//! Components are registered under their cumulative end offset, so routing
//! an offset is a range lookup for the first end strictly greater than it.
//! [`SegmentedStream`] has a fixed component set and never grows;
//! [`AppendableSegmentedStream`] starts empty and appends a memory-backed
//! component whenever data is written at its end.

use crate::memory::MemoryMedium;
use async_trait::async_trait;
use blockpipe_core::{
    checked_add_u64, resolve_seek, AsyncMediaStream, Error, MediaStream, PhysicalPosition,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Bound::{Excluded, Unbounded};
use tracing::debug;

/// Where one component sits in the combined address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentBounds {
    /// Index of the component in registration order
    pub index: usize,
    /// First combined offset served by the component
    pub start: u64,
    /// Combined offset one past its last byte
    pub end: u64,
}

struct Component<S> {
    stream: S,
    start: u64,
    length: u64,
}

/// Routing table shared by both segmented stream types
struct SegmentMap<S> {
    /// Keyed by cumulative end offset
    components: BTreeMap<u64, Component<S>>,
    length: u64,
    position: u64,
    /// End key of the component covering `position`
    current: Option<u64>,
    /// False while an interrupted operation may have left the current
    /// component's cursor out of step with `position`
    synced: bool,
}

fn invalid_component() -> io::Error {
    Error::invalid_argument("Components must be seekable and readable").into()
}

fn past_end(position: u64, length: u64) -> io::Error {
    Error::end_of_stream(format!(
        "Write at {} past end of segmented stream ({} bytes)",
        position, length
    ))
    .into()
}

fn read_only() -> io::Error {
    Error::unsupported("Write on a read-only segmented stream").into()
}

fn fixed_length() -> io::Error {
    Error::unsupported("Length of a segmented stream follows its components").into()
}

/// Bytes already transferred win over a later failure; a retry at the new
/// position reaches the same component and reports it
fn partial(total: usize, err: io::Error) -> io::Result<usize> {
    if total == 0 {
        return Err(err);
    }
    debug!(total, error = %err, "partial transfer before component failure");
    Ok(total)
}

impl<S> SegmentMap<S> {
    fn new() -> Self {
        Self {
            components: BTreeMap::new(),
            length: 0,
            position: 0,
            current: None,
            synced: true,
        }
    }

    fn register(&mut self, stream: S, length: u64) -> io::Result<()> {
        if length == 0 {
            return Err(Error::invalid_argument("Components must not be empty").into());
        }
        let end = checked_add_u64(self.length, length, "Segmented stream length")?;
        debug!(
            index = self.components.len(),
            start = self.length,
            end,
            "component registered"
        );
        self.components.insert(
            end,
            Component {
                stream,
                start: self.length,
                length,
            },
        );
        self.length = end;
        Ok(())
    }

    /// Component covering `offset` and the offset local to it
    fn route(&mut self, offset: u64) -> Option<(u64, &mut Component<S>, u64)> {
        let (end, component) = self
            .components
            .range_mut((Excluded(offset), Unbounded))
            .next()?;
        let local = component.length - (*end - offset);
        Some((*end, component, local))
    }

    /// Bytes left in the current component, clipped to `want`
    fn clip(&self, want: usize) -> Option<(u64, usize)> {
        let end = self.current?;
        Some((end, (want as u64).min(end - self.position) as usize))
    }

    fn last_key(&self) -> Option<u64> {
        self.components.keys().next_back().copied()
    }

    fn bounds(&self) -> Vec<SegmentBounds> {
        self.components
            .iter()
            .enumerate()
            .map(|(index, (end, component))| SegmentBounds {
                index,
                start: component.start,
                end: *end,
            })
            .collect()
    }

    fn component_at(&self, offset: u64) -> Option<(usize, u64)> {
        self.components
            .iter()
            .enumerate()
            .find(|(_, (end, _))| **end > offset)
            .map(|(index, (_, component))| (index, offset - component.start))
    }
}

impl<S: MediaStream> SegmentMap<S> {
    fn admit(&mut self, mut component: S) -> io::Result<()> {
        if !component.can_seek() || !component.can_read() {
            return Err(invalid_component());
        }
        let length = component.length()?;
        self.register(component, length)?;
        // The new component may now cover the cursor
        self.seek_to(self.position)
    }

    /// Move to `offset`; the position is committed even if the component
    /// seek fails, and the next operation retries it
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.position = offset;
        self.synced = false;
        self.current = match self.route(offset) {
            Some((end, component, local)) => {
                component.stream.seek(SeekFrom::Start(local))?;
                Some(end)
            }
            None => None,
        };
        self.synced = true;
        Ok(())
    }

    fn resync(&mut self) -> io::Result<()> {
        if !self.synced {
            self.seek_to(self.position)?;
        }
        Ok(())
    }

    fn advance(&mut self, n: u64) -> io::Result<()> {
        let next = self.position + n;
        match self.current {
            Some(end) if next < end => {
                self.position = next;
                self.synced = true;
                Ok(())
            }
            _ => self.seek_to(next),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.resync()?;
        let mut total = 0;
        while total < buf.len() {
            let Some((end, want)) = self.clip(buf.len() - total) else {
                break;
            };
            self.synced = false;
            let Some(component) = self.components.get_mut(&end) else {
                break;
            };
            let n = match component.stream.read(&mut buf[total..total + want]) {
                Ok(n) => n,
                Err(e) => return partial(total, e),
            };
            if n == 0 {
                debug!(end, "component ended before its recorded length");
                break;
            }
            total += n;
            if let Err(e) = self.advance(n as u64) {
                return partial(total, e);
            }
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.resync()?;
        let mut total = 0;
        while total < buf.len() {
            let Some((end, want)) = self.clip(buf.len() - total) else {
                break;
            };
            self.synced = false;
            let Some(component) = self.components.get_mut(&end) else {
                break;
            };
            let n = match component.stream.write(&buf[total..total + want]) {
                Ok(n) => n,
                Err(e) => return partial(total, e),
            };
            if n == 0 {
                break;
            }
            total += n;
            if let Err(e) = self.advance(n as u64) {
                return partial(total, e);
            }
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        for component in self.components.values_mut() {
            component.stream.flush()?;
        }
        Ok(())
    }

    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        self.resync()?;
        let Some(key) = self.current.or_else(|| self.last_key()) else {
            return Ok(None);
        };
        match self.components.get_mut(&key) {
            Some(component) => component.stream.physical_or_raw_position().map(Some),
            None => Ok(None),
        }
    }

    /// Flush every component, then drop them all; the first failure wins
    fn close(self) -> io::Result<()> {
        let mut first_error = None;
        for (_, mut component) in self.components {
            if let Err(e) = component.stream.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<S: AsyncMediaStream> SegmentMap<S> {
    async fn admit_async(&mut self, mut component: S) -> io::Result<()> {
        if !component.can_seek() || !component.can_read() {
            return Err(invalid_component());
        }
        let length = component.length_async().await?;
        self.register(component, length)?;
        self.seek_to_async(self.position).await
    }

    async fn seek_to_async(&mut self, offset: u64) -> io::Result<()> {
        self.position = offset;
        self.synced = false;
        self.current = match self.route(offset) {
            Some((end, component, local)) => {
                component.stream.seek_async(SeekFrom::Start(local)).await?;
                Some(end)
            }
            None => None,
        };
        self.synced = true;
        Ok(())
    }

    async fn resync_async(&mut self) -> io::Result<()> {
        if !self.synced {
            self.seek_to_async(self.position).await?;
        }
        Ok(())
    }

    async fn advance_async(&mut self, n: u64) -> io::Result<()> {
        let next = self.position + n;
        match self.current {
            Some(end) if next < end => {
                self.position = next;
                self.synced = true;
                Ok(())
            }
            _ => self.seek_to_async(next).await,
        }
    }

    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.resync_async().await?;
        let mut total = 0;
        while total < buf.len() {
            let Some((end, want)) = self.clip(buf.len() - total) else {
                break;
            };
            self.synced = false;
            let Some(component) = self.components.get_mut(&end) else {
                break;
            };
            let n = match component.stream.read_async(&mut buf[total..total + want]).await {
                Ok(n) => n,
                Err(e) => return partial(total, e),
            };
            if n == 0 {
                debug!(end, "component ended before its recorded length");
                break;
            }
            total += n;
            if let Err(e) = self.advance_async(n as u64).await {
                return partial(total, e);
            }
        }
        Ok(total)
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.resync_async().await?;
        let mut total = 0;
        while total < buf.len() {
            let Some((end, want)) = self.clip(buf.len() - total) else {
                break;
            };
            self.synced = false;
            let Some(component) = self.components.get_mut(&end) else {
                break;
            };
            let n = match component.stream.write_async(&buf[total..total + want]).await {
                Ok(n) => n,
                Err(e) => return partial(total, e),
            };
            if n == 0 {
                break;
            }
            total += n;
            if let Err(e) = self.advance_async(n as u64).await {
                return partial(total, e);
            }
        }
        Ok(total)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        for component in self.components.values_mut() {
            component.stream.flush_async().await?;
        }
        Ok(())
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        self.resync_async().await?;
        let Some(key) = self.current.or_else(|| self.last_key()) else {
            return Ok(None);
        };
        match self.components.get_mut(&key) {
            Some(component) => component
                .stream
                .physical_or_raw_position_async()
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    async fn close_async(self) -> io::Result<()> {
        let mut first_error = None;
        for (_, mut component) in self.components {
            if let Err(e) = component.stream.flush_async().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// A fixed set of components presented as one seekable stream.
///
/// The combined length is the sum of the component lengths. Writes are
/// routed component by component and never extend the stream; writing at or
/// past the end fails with an end-of-stream error. The stream owns its
/// components and closes them together.
///
/// # Example
///
/// ```rust
/// use blockpipe_pipeline::SegmentedStream;
/// use std::io::{Cursor, Read, Seek, SeekFrom};
///
/// let parts = vec![
///     Cursor::new(b"disk.".to_vec()),
///     Cursor::new(b"001+".to_vec()),
///     Cursor::new(b"002".to_vec()),
/// ];
/// let mut joined = SegmentedStream::new(parts).unwrap();
///
/// let mut buf = [0u8; 6];
/// joined.seek(SeekFrom::Start(3)).unwrap();
/// joined.read_exact(&mut buf).unwrap();
/// assert_eq!(&buf, b"k.001+");
/// ```
pub struct SegmentedStream<S> {
    map: SegmentMap<S>,
    writable: bool,
}

impl<S> SegmentedStream<S> {
    fn empty(writable: bool) -> Self {
        Self {
            map: SegmentMap::new(),
            writable,
        }
    }

    /// Combined position
    pub fn position(&self) -> u64 {
        self.map.position
    }

    /// Combined length
    pub fn len(&self) -> u64 {
        self.map.length
    }

    /// True while no component holds any bytes
    pub fn is_empty(&self) -> bool {
        self.map.length == 0
    }

    /// Number of components
    pub fn component_count(&self) -> usize {
        self.map.components.len()
    }

    /// Placement of every component
    pub fn bounds(&self) -> Vec<SegmentBounds> {
        self.map.bounds()
    }

    /// Index of the component holding `offset` and the offset inside it
    pub fn component_at(&self, offset: u64) -> Option<(usize, u64)> {
        self.map.component_at(offset)
    }

    fn check_write(&self, len: usize) -> io::Result<bool> {
        if !self.writable {
            return Err(read_only());
        }
        if len == 0 {
            return Ok(false);
        }
        if self.map.position >= self.map.length {
            return Err(past_end(self.map.position, self.map.length));
        }
        Ok(true)
    }
}

impl<S: MediaStream> SegmentedStream<S> {
    /// Join `components` in order
    ///
    /// The stream accepts writes only if every initial component does.
    ///
    /// # Errors
    ///
    /// Returns an error if a component is empty, not seekable or not readable
    pub fn new<I: IntoIterator<Item = S>>(components: I) -> io::Result<Self> {
        let mut stream = Self::empty(true);
        for component in components {
            stream.writable &= component.can_write();
            stream.add_stream(component)?;
        }
        Ok(stream)
    }

    /// Join `components` in order, rejecting all writes
    pub fn read_only<I: IntoIterator<Item = S>>(components: I) -> io::Result<Self> {
        let mut stream = Self::empty(false);
        for component in components {
            stream.add_stream(component)?;
        }
        Ok(stream)
    }

    /// Append a component after the current end
    pub fn add_stream(&mut self, component: S) -> io::Result<()> {
        self.map.admit(component)
    }

    /// Flush and close every component, reporting the first failure
    pub fn close(self) -> io::Result<()> {
        self.map.close()
    }
}

impl<S: MediaStream> Read for SegmentedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.map.read(buf)
    }
}

impl<S: MediaStream> Write for SegmentedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.check_write(buf.len())? {
            return Ok(0);
        }
        self.map.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.map.flush()
    }
}

impl<S: MediaStream> Seek for SegmentedStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.map.position, self.map.length)?;
        self.map.seek_to(target)?;
        Ok(target)
    }
}

impl<S: MediaStream> PhysicalPosition for SegmentedStream<S> {
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        self.map.physical_position()
    }
}

impl<S: MediaStream> MediaStream for SegmentedStream<S> {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.map.length)
    }

    fn set_length(&mut self, _length: u64) -> io::Result<()> {
        Err(fixed_length())
    }

    fn can_write(&self) -> bool {
        self.writable
    }
}

impl<S: AsyncMediaStream> SegmentedStream<S> {
    /// Suspending form of [`SegmentedStream::new`]
    pub async fn new_async<I: IntoIterator<Item = S>>(components: I) -> io::Result<Self> {
        let mut stream = Self::empty(true);
        for component in components {
            stream.writable &= component.can_write();
            stream.add_stream_async(component).await?;
        }
        Ok(stream)
    }

    /// Suspending form of [`SegmentedStream::add_stream`]
    pub async fn add_stream_async(&mut self, component: S) -> io::Result<()> {
        self.map.admit_async(component).await
    }

    /// Flush and close every component, reporting the first failure
    pub async fn close_async(self) -> io::Result<()> {
        self.map.close_async().await
    }
}

#[async_trait]
impl<S: AsyncMediaStream> AsyncMediaStream for SegmentedStream<S> {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.map.read_async(buf).await
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.check_write(buf.len())? {
            return Ok(0);
        }
        self.map.write_async(buf).await
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.map.position, self.map.length)?;
        self.map.seek_to_async(target).await?;
        Ok(target)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        self.map.flush_async().await
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Ok(self.map.length)
    }

    async fn set_length_async(&mut self, _length: u64) -> io::Result<()> {
        Err(fixed_length())
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        self.map.physical_position_async().await
    }

    fn can_write(&self) -> bool {
        self.writable
    }
}

/// A segmented stream that grows by appending buffer-backed components.
///
/// It starts with no components. A write at the current end becomes a new
/// component holding exactly the written bytes; writes inside the existing
/// range overwrite in place. The length therefore grows by the size of each
/// appending write.
///
/// # Example
///
/// ```rust
/// use blockpipe_pipeline::AppendableSegmentedStream;
/// use std::io::{Read, Seek, SeekFrom, Write};
///
/// let mut stream: AppendableSegmentedStream = AppendableSegmentedStream::new();
/// stream.write_all(b"first").unwrap();
/// stream.write_all(b"second").unwrap();
/// assert_eq!(stream.len(), 11);
/// assert_eq!(stream.component_count(), 2);
///
/// let mut buf = String::new();
/// stream.seek(SeekFrom::Start(0)).unwrap();
/// stream.read_to_string(&mut buf).unwrap();
/// assert_eq!(buf, "firstsecond");
/// ```
pub struct AppendableSegmentedStream<S = MemoryMedium> {
    map: SegmentMap<S>,
}

impl<S> AppendableSegmentedStream<S> {
    /// Create an empty stream
    pub fn new() -> Self {
        Self {
            map: SegmentMap::new(),
        }
    }

    /// Combined position
    pub fn position(&self) -> u64 {
        self.map.position
    }

    /// Combined length
    pub fn len(&self) -> u64 {
        self.map.length
    }

    /// True while no component holds any bytes
    pub fn is_empty(&self) -> bool {
        self.map.length == 0
    }

    /// Number of components
    pub fn component_count(&self) -> usize {
        self.map.components.len()
    }

    /// Placement of every component
    pub fn bounds(&self) -> Vec<SegmentBounds> {
        self.map.bounds()
    }

    /// Index of the component holding `offset` and the offset inside it
    pub fn component_at(&self, offset: u64) -> Option<(usize, u64)> {
        self.map.component_at(offset)
    }

    fn check_write(&self) -> io::Result<()> {
        if self.map.position > self.map.length {
            return Err(past_end(self.map.position, self.map.length));
        }
        Ok(())
    }

    /// Bytes of `buf` not yet written once the existing range is exhausted
    fn appendable<'a>(&self, buf: &'a [u8], written: usize) -> Option<&'a [u8]> {
        let rest = &buf[written..];
        (!rest.is_empty() && self.map.position == self.map.length).then_some(rest)
    }
}

impl<S> Default for AppendableSegmentedStream<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MediaStream + From<Vec<u8>>> AppendableSegmentedStream<S> {
    /// Append a component after the current end
    pub fn add_stream(&mut self, component: S) -> io::Result<()> {
        self.map.admit(component)
    }

    /// Flush and close every component, reporting the first failure
    pub fn close(self) -> io::Result<()> {
        self.map.close()
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.add_stream(S::from(data.to_vec()))?;
        self.map.advance(data.len() as u64)
    }
}

impl<S: MediaStream + From<Vec<u8>>> Read for AppendableSegmentedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.map.read(buf)
    }
}

impl<S: MediaStream + From<Vec<u8>>> Write for AppendableSegmentedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.check_write()?;

        let written = self.map.write(buf)?;
        if let Some(rest) = self.appendable(buf, written) {
            self.append(rest)?;
            return Ok(buf.len());
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.map.flush()
    }
}

impl<S: MediaStream + From<Vec<u8>>> Seek for AppendableSegmentedStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.map.position, self.map.length)?;
        self.map.seek_to(target)?;
        Ok(target)
    }
}

impl<S: MediaStream + From<Vec<u8>>> PhysicalPosition for AppendableSegmentedStream<S> {
    fn physical_position(&mut self) -> io::Result<Option<u64>> {
        self.map.physical_position()
    }
}

impl<S: MediaStream + From<Vec<u8>>> MediaStream for AppendableSegmentedStream<S> {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.map.length)
    }

    fn set_length(&mut self, _length: u64) -> io::Result<()> {
        Err(fixed_length())
    }
}

impl<S: AsyncMediaStream + From<Vec<u8>>> AppendableSegmentedStream<S> {
    /// Suspending form of [`AppendableSegmentedStream::add_stream`]
    pub async fn add_stream_async(&mut self, component: S) -> io::Result<()> {
        self.map.admit_async(component).await
    }

    /// Flush and close every component, reporting the first failure
    pub async fn close_async(self) -> io::Result<()> {
        self.map.close_async().await
    }

    async fn append_async(&mut self, data: &[u8]) -> io::Result<()> {
        self.add_stream_async(S::from(data.to_vec())).await?;
        self.map.advance_async(data.len() as u64).await
    }
}

#[async_trait]
impl<S: AsyncMediaStream + From<Vec<u8>>> AsyncMediaStream for AppendableSegmentedStream<S> {
    async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.map.read_async(buf).await
    }

    async fn write_async(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.check_write()?;

        let written = self.map.write_async(buf).await?;
        if let Some(rest) = self.appendable(buf, written) {
            self.append_async(rest).await?;
            return Ok(buf.len());
        }
        Ok(written)
    }

    async fn seek_async(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.map.position, self.map.length)?;
        self.map.seek_to_async(target).await?;
        Ok(target)
    }

    async fn flush_async(&mut self) -> io::Result<()> {
        self.map.flush_async().await
    }

    async fn length_async(&mut self) -> io::Result<u64> {
        Ok(self.map.length)
    }

    async fn set_length_async(&mut self, _length: u64) -> io::Result<()> {
        Err(fixed_length())
    }

    async fn physical_position_async(&mut self) -> io::Result<Option<u64>> {
        self.map.physical_position_async().await
    }
}
