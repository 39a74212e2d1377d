//! Error types for oxilz operations.
//!
//! Every failure mode of the codec and the framing layer maps onto one of
//! the variants below. The process exit-code contract follows lzip:
//! 0 for success, 1 for environmental problems, 2 for corrupt or invalid
//! compressed input, 3 for an internal consistency error.

use std::io;
use thiserror::Error;

/// The main error type for oxilz operations.
#[derive(Debug, Error)]
pub enum LzipError {
    /// I/O error from the underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The first four bytes of a member are not "LZIP".
    #[error("Bad magic number (file not in lzip format)")]
    BadMagic,

    /// The version byte names a member format this decoder does not know.
    #[error("Version {version} member format not supported.")]
    UnsupportedVersion {
        /// Version byte found in the header.
        version: u8,
    },

    /// The coded dictionary size is outside 4 KiB .. 512 MiB.
    #[error("Invalid dictionary size in member header")]
    InvalidDictSize,

    /// The input ended in the middle of a member.
    #[error("File ends unexpectedly at position {offset}")]
    Truncated {
        /// Member-relative byte offset where the input ran out.
        offset: u64,
    },

    /// The range-coded payload is inconsistent.
    #[error("Decoder error at position {offset}: {message}")]
    DataError {
        /// Member-relative byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The trailer CRC does not match the decoded data.
    #[error("CRC mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// CRC stored in the member trailer.
        expected: u32,
        /// CRC computed over the decoded data.
        computed: u32,
    },

    /// The trailer's uncompressed size does not match the decoded data.
    #[error("Data size mismatch: trailer says {expected}, decoded {found}")]
    DataSizeMismatch {
        /// Size stored in the member trailer.
        expected: u64,
        /// Number of bytes actually decoded.
        found: u64,
    },

    /// The trailer's member size does not match the bytes consumed.
    #[error("Member size mismatch: trailer says {expected}, read {found}")]
    MemberSizeMismatch {
        /// Size stored in the member trailer.
        expected: u64,
        /// Number of bytes actually consumed.
        found: u64,
    },

    /// Valid members were followed by bytes that are not a member.
    #[error("Trailing data not allowed")]
    TrailingData,

    /// Allocation of the window, tree, or trellis failed.
    #[error("Not enough memory. Try a smaller dictionary size.")]
    OutOfMemory,

    /// An invariant was broken inside the coder; this is a bug.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Result type alias for oxilz operations.
pub type Result<T> = std::result::Result<T, LzipError>;

impl LzipError {
    /// Create a data error at the given member offset.
    pub fn data(offset: u64, message: impl Into<String>) -> Self {
        Self::DataError {
            offset,
            message: message.into(),
        }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(expected: u32, computed: u32) -> Self {
        Self::CrcMismatch { expected, computed }
    }

    /// Process exit status for this error: 1 for environmental problems,
    /// 2 for corrupt or invalid input, 3 for internal errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) | Self::OutOfMemory => 1,
            Self::Internal(_) => 3,
            _ => 2,
        }
    }

    /// True when the error describes bad input data rather than an
    /// environmental or internal failure.
    pub fn is_data_error(&self) -> bool {
        self.exit_code() == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LzipError::UnsupportedVersion { version: 2 };
        assert_eq!(err.to_string(), "Version 2 member format not supported.");

        let err = LzipError::crc_mismatch(0x12345678, 0xDEADBEEF);
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_exit_codes() {
        let io_err: LzipError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io_err.exit_code(), 1);
        assert_eq!(LzipError::OutOfMemory.exit_code(), 1);
        assert_eq!(LzipError::BadMagic.exit_code(), 2);
        assert_eq!(LzipError::TrailingData.exit_code(), 2);
        assert_eq!(LzipError::data(0, "x").exit_code(), 2);
        assert_eq!(LzipError::Internal("bug").exit_code(), 3);
    }

    #[test]
    fn test_is_data_error() {
        assert!(LzipError::BadMagic.is_data_error());
        assert!(!LzipError::OutOfMemory.is_data_error());
    }
}
