//! # blockpipe pipeline
//!
//! Stream wrappers for raw block media. Every wrapper implements
//! [`blockpipe_core::MediaStream`] (blocking) and
//! [`blockpipe_core::AsyncMediaStream`] (suspending), so they stack freely:
//!
//! - **AlignedStream**: forces block-aligned base I/O, padding unaligned
//!   requests through pooled scratch buffers
//! - **BoundedAlignedSegment**: a fixed-length, zero-origin window of a base
//! - **SegmentedStream**: several components addressed as one stream
//! - **AppendableSegmentedStream**: grows by appending written data
//! - **ForwardReader**: sequential, non-seekable concatenation
//! - **MmapMedium** / **MemoryMedium**: leaf media
//!
//! Any layer can report where its cursor lands on the innermost medium
//! through [`blockpipe_core::PhysicalPosition`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use blockpipe_pipeline::{AlignedStream, BoundedAlignedSegment, MmapMedium, SegmentedStream};
//! use blockpipe_core::PhysicalPosition;
//! use std::io::{Read, Seek, SeekFrom};
//! use std::path::Path;
//!
//! // A split image: two files forming one address space
//! let parts = vec![
//!     MmapMedium::open(Path::new("disk.001")).unwrap(),
//!     MmapMedium::open(Path::new("disk.002")).unwrap(),
//! ];
//! let joined = SegmentedStream::read_only(parts).unwrap();
//!
//! // A partition window read with sector-aligned I/O
//! let window = BoundedAlignedSegment::new(joined, 0x8000, 0x100000).unwrap();
//! let mut sectors = AlignedStream::new(window, 512).unwrap();
//!
//! let mut buf = [0u8; 100];
//! sectors.seek(SeekFrom::Start(3)).unwrap();
//! sectors.read(&mut buf).unwrap();
//! println!("{:?}", sectors.physical_position().unwrap());
//! ```

pub mod aligned;
pub mod bounded;
pub mod forward;
pub mod memory;
pub mod mmap;
pub mod segmented;

#[cfg(test)]
mod testutil;

pub use aligned::{AlignedStream, AlignedStreamOptions};
pub use bounded::{BoundedAlignedSegment, SegmentOptions};
pub use forward::ForwardReader;
pub use memory::MemoryMedium;
pub use mmap::MmapMedium;
pub use segmented::{AppendableSegmentedStream, SegmentBounds, SegmentedStream};
