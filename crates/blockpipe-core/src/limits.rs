//! Pipeline limits and validation helpers
//!
//! Bounds on alignment and scratch allocations, plus the checked arithmetic
//! every wrapper uses when translating between logical and physical offsets.

use crate::Error;

/// Default alignment: the classic 512-byte sector
pub const DEFAULT_ALIGNMENT: usize = 512;

/// Largest alignment we'll accept (1 MiB, well above any device sector)
pub const MAX_ALIGNMENT: usize = 1024 * 1024;

/// Maximum size of a single scratch buffer (256 MB)
pub const MAX_SCRATCH_SIZE: usize = 256 * 1024 * 1024;

/// Number of idle scratch buffers a pool keeps around
pub const MAX_POOLED_BUFFERS: usize = 16;

/// Maximum file size for memory mapping (16 GB - practical limit for most systems)
pub const MAX_MMAP_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// Validate that an alignment is usable
pub fn validate_alignment(alignment: usize) -> crate::Result<()> {
    if alignment == 0 || alignment > MAX_ALIGNMENT {
        return Err(Error::invalid_alignment(format!(
            "Alignment {} must be between 1 and {}",
            alignment, MAX_ALIGNMENT
        )));
    }

    Ok(())
}

/// Validate that a scratch allocation is within limits
///
/// # Security
/// Prevents a single huge request from exhausting memory via padding buffers
pub fn validate_allocation_size(size: u64, limit: usize, context: &str) -> crate::Result<usize> {
    if size > limit as u64 {
        return Err(Error::invalid_argument(format!(
            "{} size {} exceeds limit {}",
            context, size, limit
        )));
    }

    size.try_into()
        .map_err(|_| Error::invalid_argument(format!("{} size exceeds platform limits", context)))
}

/// Safely add two u64 offsets with overflow checking
pub fn checked_add_u64(a: u64, b: u64, context: &str) -> crate::Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| Error::invalid_argument(format!("{}: offset overflow", context)))
}

/// Safely convert u64 to usize with platform checking
///
/// # Security
/// Prevents truncation on 32-bit platforms
pub fn u64_to_usize(value: u64, context: &str) -> crate::Result<usize> {
    value.try_into().map_err(|_| {
        Error::invalid_argument(format!(
            "{}: value {} exceeds platform usize limit",
            context, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_alignment() {
        assert!(validate_alignment(1).is_ok());
        assert!(validate_alignment(512).is_ok());
        assert!(validate_alignment(4096).is_ok());
        // Not a power of 2, still a valid byte granularity
        assert!(validate_alignment(520).is_ok());

        assert!(validate_alignment(0).is_err());
        assert!(validate_alignment(MAX_ALIGNMENT + 1).is_err());
    }

    #[test]
    fn test_validate_allocation_size() {
        assert_eq!(
            validate_allocation_size(1024, MAX_SCRATCH_SIZE, "test").unwrap(),
            1024
        );

        assert!(validate_allocation_size(
            MAX_SCRATCH_SIZE as u64 + 1,
            MAX_SCRATCH_SIZE,
            "test"
        )
        .is_err());
    }

    #[test]
    fn test_checked_add_u64() {
        assert_eq!(checked_add_u64(1000, 512, "test").unwrap(), 1512);
        assert!(checked_add_u64(u64::MAX, 1, "test").is_err());
    }

    #[test]
    fn test_u64_to_usize() {
        assert_eq!(u64_to_usize(1024, "test").unwrap(), 1024);

        #[cfg(target_pointer_width = "32")]
        {
            assert!(u64_to_usize(0xFFFFFFFF + 1, "test").is_err());
        }
    }
}
