//! Alignment arithmetic shared by the pipeline wrappers

use crate::limits::{checked_add_u64, validate_alignment, validate_allocation_size, MAX_SCRATCH_SIZE};
use crate::{Error, Result};
use std::io::SeekFrom;

/// Round `value` down to a multiple of `alignment`
pub fn align_down(value: u64, alignment: u64) -> u64 {
    value - value % alignment
}

/// Round `value` up to a multiple of `alignment`
pub fn align_up(value: u64, alignment: u64) -> Result<u64> {
    if alignment == 0 {
        return Err(Error::invalid_alignment("alignment must be positive"));
    }
    let rem = value % alignment;
    if rem == 0 {
        return Ok(value);
    }
    checked_add_u64(value, alignment - rem, "align_up")
}

/// Number of bits needed to round `alignment` up to a power of two
pub fn alignment_bits(alignment: usize) -> u32 {
    alignment.max(1).next_power_of_two().trailing_zeros()
}

/// Resolve a `SeekFrom` against a cursor and a length
///
/// Negative results are rejected; positions past `length` are allowed.
pub fn resolve_seek(pos: SeekFrom, current: u64, length: u64) -> Result<u64> {
    let (base, delta) = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::End(delta) => (length, delta),
        SeekFrom::Current(delta) => (current, delta),
    };

    let target = base as i128 + delta as i128;
    if target < 0 {
        return Err(Error::invalid_argument(format!(
            "Seek to negative offset {}",
            target
        )));
    }

    u64::try_from(target)
        .map_err(|_| Error::invalid_argument(format!("Seek offset {} overflows", target)))
}

/// The padded window an unaligned transfer expands to
///
/// A transfer of `count` bytes at `position` becomes `prefix` bytes of
/// leading padding, the payload, and `suffix` bytes of trailing padding,
/// starting at `position - prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedSpan {
    /// Bytes between the aligned start and the requested position
    pub prefix: usize,
    /// Requested payload size
    pub count: usize,
    /// Padding after the payload up to the next boundary
    pub suffix: usize,
    /// Alignment the span was computed for
    pub alignment: usize,
}

impl AlignedSpan {
    /// Compute the span for `count` bytes at `position`
    pub fn new(position: u64, count: usize, alignment: usize) -> Result<Self> {
        validate_alignment(alignment)?;

        let prefix = (position % alignment as u64) as usize;
        let padded = align_up(prefix as u64 + count as u64, alignment as u64)?;
        let total = validate_allocation_size(padded, MAX_SCRATCH_SIZE, "Aligned transfer")?;

        Ok(Self {
            prefix,
            count,
            suffix: total - prefix - count,
            alignment,
        })
    }

    /// True when the request already sits on block boundaries
    pub fn is_aligned(&self) -> bool {
        self.prefix == 0 && self.suffix == 0
    }

    /// Size of the padded window
    pub fn total(&self) -> usize {
        self.prefix + self.count + self.suffix
    }

    /// Aligned offset the padded window starts at
    pub fn start(&self, position: u64) -> u64 {
        position - self.prefix as u64
    }

    /// Offset of the last block inside the padded window, relative to its start
    pub fn last_block(&self) -> usize {
        self.total() - self.alignment
    }

    /// True when the leading and trailing padding live in the same block
    pub fn single_block(&self) -> bool {
        self.total() == self.alignment
    }
}
