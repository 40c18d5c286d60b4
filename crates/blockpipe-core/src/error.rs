//! Pipeline error types

use std::io;
use thiserror::Error;

/// The main error type for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error reported by a base stream
    #[error("Pipeline I/O error: {0}")]
    Io(#[from] io::Error),

    /// Argument outside the accepted domain (negative seek, bad component)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not supported by this stream configuration
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The region is full; no more bytes can be written
    #[error("End of stream: {0}")]
    EndOfStream(String),

    /// Alignment is zero or exceeds the accepted limit
    #[error("Invalid alignment: {0}")]
    InvalidAlignment(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a custom error from a string
    pub fn custom(msg: impl Into<String>) -> Self {
        Error::Custom(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an end of stream error
    pub fn end_of_stream(msg: impl Into<String>) -> Self {
        Error::EndOfStream(msg.into())
    }

    /// Create an invalid alignment error
    pub fn invalid_alignment(msg: impl Into<String>) -> Self {
        Error::InvalidAlignment(msg.into())
    }

    /// The `io::ErrorKind` this error surfaces as through the `std::io` traits
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Error::Io(e) => e.kind(),
            Error::InvalidArgument(_) | Error::InvalidAlignment(_) => io::ErrorKind::InvalidInput,
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
            Error::EndOfStream(_) => io::ErrorKind::UnexpectedEof,
            Error::Custom(_) => io::ErrorKind::Other,
        }
    }

    /// Recover the pipeline error carried inside an `io::Error`, if any
    ///
    /// Wrappers report failures through `std::io::Error`; this lets callers
    /// tell a full region apart from a failing medium.
    pub fn classify(err: &io::Error) -> Option<&Error> {
        err.get_ref()?.downcast_ref::<Error>()
    }

    /// True when `err` reports that a bounded region has no room left
    pub fn is_end_of_stream(err: &io::Error) -> bool {
        matches!(Self::classify(err), Some(Error::EndOfStream(_)))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => io::Error::new(other.kind(), other),
        }
    }
}
