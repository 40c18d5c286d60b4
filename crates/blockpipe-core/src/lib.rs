//! # blockpipe core
//!
//! Contracts, errors and shared plumbing for the block pipeline.
//!
//! This crate provides the foundations the stream wrappers build on:
//! - **MediaStream / AsyncMediaStream**: the blocking and suspending stream contracts
//! - **PhysicalPosition**: opt-in query for the true on-medium offset
//! - **BufferPool**: scoped scratch buffers for alignment padding
//! - **AlignedSpan**: prefix/suffix arithmetic for unaligned transfers
//!
//! ## Terminology
//!
//! - **Alignment** = byte granularity every physical transfer must respect
//! - **Base stream** = the stream a wrapper delegates actual I/O to
//! - **Logical position** = position as seen by a wrapper's caller
//! - **Physical position** = matching offset on the innermost medium
//! - **Component** = one constituent stream of a segmented stream
//!
//! ## Example
//!
//! ```rust
//! use blockpipe_core::{AlignedSpan, MediaStream, Result};
//! use std::io::Cursor;
//!
//! fn inspect(mut medium: impl MediaStream) -> Result<()> {
//!     let span = AlignedSpan::new(5, 10, 512)?;
//!     println!("medium: {} bytes", medium.length()?);
//!     println!("padded window: {} bytes", span.total());
//!     Ok(())
//! }
//!
//! inspect(Cursor::new(vec![0u8; 4096])).unwrap();
//! ```

pub mod buffer;
pub mod error;
pub mod geometry;
pub mod limits;
pub mod traits;

// Re-export commonly used items
pub use buffer::{BufferPool, PooledBuffer};
pub use error::{Error, Result};
pub use geometry::{align_down, align_up, alignment_bits, resolve_seek, AlignedSpan};
pub use limits::*;
pub use traits::{read_full, AsyncMediaStream, MediaStream, PhysicalPosition};
