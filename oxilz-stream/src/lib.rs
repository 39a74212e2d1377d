//! # oxilz Stream
//!
//! The lzip container format: framing around the `oxilz-lzma` codec.
//!
//! Each member is a 6-byte header (magic, version, coded dictionary
//! size), a range-coded LZMA payload ended by an explicit end-of-stream
//! marker, and a 20-byte trailer (CRC-32, data size, member size).
//! Members may be concatenated; this crate provides the per-member
//! encoder/decoder and the stream loops over them.
//!
//! ## Usage
//!
//! ```
//! use oxilz_stream::{compress_bytes, decompress_bytes};
//!
//! let data = b"an example worth keeping around";
//! let compressed = compress_bytes(data, 6).unwrap();
//! assert_eq!(decompress_bytes(&compressed).unwrap(), data);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod header;
pub mod member;

// Re-exports
pub use header::{
    HEADER_SIZE, LZIP_MAGIC, LZIP_VERSION, LzipHeader, LzipTrailer, TRAILER_SIZE, coded_dict_size,
    decode_dict_size,
};
pub use member::{
    CompressionOptions, DecodeOptions, MAX_MEMBER_SIZE, MAX_VOLUME_SIZE, MIN_MEMBER_SIZE,
    MIN_VOLUME_SIZE, MemberEncoder, MemberStats, StreamStats, decode_stream, encode_stream,
};

use oxilz_core::error::Result;
use std::io::Cursor;

/// Compress a byte slice at the given level (0..9) into a fresh vector.
pub fn compress_bytes(data: &[u8], level: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_stream(
        Cursor::new(data),
        &mut out,
        CompressionOptions::from_level(level),
        MAX_MEMBER_SIZE,
    )?;
    Ok(out)
}

/// Decompress a byte slice with default options into a fresh vector.
pub fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decode_stream(Cursor::new(data), &mut out, DecodeOptions::default())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        let fast = CompressionOptions::from_level(0);
        assert!(fast.fast);
        assert_eq!(fast.dict_size, 1 << 16);
        assert_eq!(fast.match_len_limit, 16);

        let default = CompressionOptions::default();
        assert!(!default.fast);
        assert_eq!(default.dict_size, 1 << 23);
        assert_eq!(default.match_len_limit, 36);

        let best = CompressionOptions::from_level(9);
        assert_eq!(best.dict_size, 1 << 25);
        assert_eq!(best.match_len_limit, 273);
    }

    #[test]
    fn test_compress_bytes_roundtrip() {
        let data = b"smoke test for the convenience wrappers";
        let compressed = compress_bytes(data, 6).unwrap();
        assert_eq!(decompress_bytes(&compressed).unwrap(), data);
    }
}
