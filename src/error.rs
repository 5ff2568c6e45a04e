//! Error types for image-meta-io

use std::io;

/// Result type for image-meta-io operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or rewriting image metadata
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error, including unexpected end of input
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed input: bad magic number, byte order, version, missing field...
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid segment or chunk
    #[error("Invalid segment at offset {offset}: {reason}")]
    InvalidSegment { offset: u64, reason: String },

    /// Malformed XMP packet
    #[error("XMP error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Output could not be produced from the in-memory model
    #[error("Write error: {0}")]
    Write(String),

    /// Data size exceeds maximum allowed
    #[error("Data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },

    /// Unsupported file format
    #[error("Unsupported format")]
    UnsupportedFormat,
}

impl Error {
    /// Shorthand for [`Error::InvalidFormat`]
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Shorthand for [`Error::Write`]
    pub(crate) fn write(msg: impl Into<String>) -> Self {
        Error::Write(msg.into())
    }

    /// True for errors caused by malformed or unreadable input.
    pub fn is_read_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::InvalidFormat(_) | Error::InvalidSegment { .. } | Error::Xml(_)
        )
    }

    /// True for errors raised while producing output.
    pub fn is_write_error(&self) -> bool {
        matches!(
            self,
            Error::Write(_) | Error::DataTooLarge { .. } | Error::UnsupportedFormat
        )
    }
}
