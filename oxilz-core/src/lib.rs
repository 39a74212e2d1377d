//! # oxilz Core
//!
//! Core components shared by the oxilz crates:
//!
//! - [`crc`]: the CRC-32 checksum stored in lzip member trailers
//! - [`error`]: error types and the process exit-code contract
//!
//! The codec itself lives in `oxilz-lzma`; the lzip container framing in
//! `oxilz-stream`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crc;
pub mod error;

// Re-exports for convenience
pub use crc::Crc32;
pub use error::{LzipError, Result};
