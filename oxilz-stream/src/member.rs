//! Per-member encode and decode, and the multi-member stream loop.
//!
//! A member is header + range-coded payload + trailer. Compression may
//! split one input into several members (member-size cap); decompression
//! walks members until the input ends and then applies the trailing-data
//! policy: bytes after the last member may be ignored, rejected, or - if
//! they look like a corrupt header - reported as corruption.

use crate::header::{
    HEADER_SIZE, LzipHeader, LzipTrailer, TRAILER_SIZE, is_magic_prefix, looks_like_corrupt_header,
};
use oxilz_core::error::{LzipError, Result};
use oxilz_lzma::{EncoderBase, FastEncoder, LzDecoder, LzEncoder, RangeDecoder};
use std::io::{Read, Write};

/// Room reserved for the end-of-stream marker and coder flush when
/// honouring a member size limit.
const MAX_MARKER_SIZE: u64 = 16;

/// Largest member size a stream may be split at (2 PiB).
pub const MAX_MEMBER_SIZE: u64 = 0x0008_0000_0000_0000;
/// Smallest member size limit accepted from the driver.
pub const MIN_MEMBER_SIZE: u64 = 100_000;
/// Smallest volume size limit accepted from the driver.
pub const MIN_VOLUME_SIZE: u64 = 100_000;
/// Largest volume size limit accepted from the driver (4 EiB).
pub const MAX_VOLUME_SIZE: u64 = 0x4000_0000_0000_0000;

/// Dictionary size and match length limit for the optimal encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Dictionary size in bytes (4 KiB .. 512 MiB).
    pub dict_size: u32,
    /// Longest match the encoder will emit (5 .. 273).
    pub match_len_limit: usize,
    /// Use the greedy level-0 encoder.
    pub fast: bool,
}

impl CompressionOptions {
    /// The gzip-style level mapping (0..9, default 6).
    pub fn from_level(level: u8) -> Self {
        let (dict_size, match_len_limit) = match level {
            0 => (1 << 16, 16),
            1 => (1 << 20, 5),
            2 => (3 << 19, 6),
            3 => (1 << 21, 8),
            4 => (3 << 20, 12),
            5 => (1 << 22, 20),
            6 => (1 << 23, 36),
            7 => (1 << 24, 68),
            8 => (3 << 23, 132),
            _ => (1 << 25, 273),
        };
        Self {
            dict_size,
            match_len_limit,
            fast: level == 0,
        }
    }
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self::from_level(6)
    }
}

/// Totals for one member.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberStats {
    /// Uncompressed bytes in the member.
    pub in_size: u64,
    /// Member size including header and trailer.
    pub out_size: u64,
}

/// Totals for a whole stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// Members encoded or decoded.
    pub members: u64,
    /// Uncompressed bytes.
    pub in_size: u64,
    /// Compressed bytes.
    pub out_size: u64,
    /// Decoding only: valid members were followed by non-member bytes.
    pub trailing_data: bool,
}

/// One member encoder: the driver-level tagged choice between the fast
/// and optimal variants, which share [`EncoderBase`].
#[derive(Debug)]
pub enum MemberEncoder<R: Read, W: Write> {
    /// Greedy level-0 encoder.
    Fast(FastEncoder<R, W>),
    /// Dynamic-programming encoder.
    Optimal(LzEncoder<R, W>),
}

impl<R: Read, W: Write> MemberEncoder<R, W> {
    /// Create the encoder selected by `options`.
    pub fn new(reader: R, sink: W, options: CompressionOptions) -> Result<Self> {
        if options.fast {
            Ok(Self::Fast(FastEncoder::new(reader, sink)?))
        } else {
            Ok(Self::Optimal(LzEncoder::new(
                reader,
                sink,
                options.dict_size,
                options.match_len_limit,
            )?))
        }
    }

    /// The shared coder state.
    pub fn base_mut(&mut self) -> &mut EncoderBase<W> {
        match self {
            Self::Fast(e) => e.base_mut(),
            Self::Optimal(e) => e.base_mut(),
        }
    }

    fn base(&self) -> &EncoderBase<W> {
        match self {
            Self::Fast(e) => e.base(),
            Self::Optimal(e) => e.base(),
        }
    }

    /// Dictionary size for the member header.
    pub fn dictionary_size(&self) -> u32 {
        match self {
            Self::Fast(e) => e.dictionary_size(),
            Self::Optimal(e) => e.dictionary_size(),
        }
    }

    /// Bytes of input consumed into the current member.
    pub fn data_position(&self) -> u64 {
        match self {
            Self::Fast(e) => e.data_position(),
            Self::Optimal(e) => e.data_position(),
        }
    }

    /// True when all input has been encoded.
    pub fn data_finished(&self) -> bool {
        match self {
            Self::Fast(e) => e.data_finished(),
            Self::Optimal(e) => e.data_finished(),
        }
    }

    /// Bytes produced for the current member, framing included.
    pub fn member_position(&self) -> u64 {
        self.base().member_position()
    }

    /// Reset coder state for the next member of the same stream.
    pub fn reset_member(&mut self) -> Result<()> {
        match self {
            Self::Fast(e) => e.reset_member(),
            Self::Optimal(e) => e.reset_member(),
        }
    }

    /// Swap the output sink (the driver's volume rotation), returning
    /// the previous sink with all pending bytes flushed into it.
    pub fn swap_sink(&mut self, new_sink: W) -> Result<W> {
        self.base_mut().flush_data()?;
        Ok(self.base_mut().swap_sink(new_sink))
    }

    /// Encode one complete member: header, payload up to `size_limit`
    /// total member bytes, end marker, trailer.
    pub fn encode_member(&mut self, size_limit: u64) -> Result<MemberStats> {
        let header = LzipHeader::new(self.dictionary_size());
        self.base_mut().write_raw(&header.to_bytes())?;

        let payload_limit = size_limit.saturating_sub(TRAILER_SIZE as u64 + MAX_MARKER_SIZE);
        match self {
            Self::Fast(e) => e.encode_member(payload_limit)?,
            Self::Optimal(e) => e.encode_member(payload_limit)?,
        }

        let trailer = LzipTrailer {
            data_crc: self.base().crc(),
            data_size: self.data_position(),
            member_size: self.member_position() + TRAILER_SIZE as u64,
        };
        self.base_mut().write_raw(&trailer.to_bytes())?;
        self.base_mut().flush_data()?;
        Ok(MemberStats {
            in_size: self.data_position(),
            out_size: self.member_position(),
        })
    }
}

/// Compress a whole input into as many members as the member size limit
/// requires.
pub fn encode_stream<R: Read, W: Write>(
    reader: R,
    sink: &mut W,
    options: CompressionOptions,
    member_size: u64,
) -> Result<StreamStats> {
    let mut encoder = MemberEncoder::new(reader, sink, options)?;
    let mut stats = StreamStats::default();
    loop {
        let member = encoder.encode_member(member_size)?;
        stats.members += 1;
        stats.in_size += member.in_size;
        stats.out_size += member.out_size;
        if encoder.data_finished() {
            return Ok(stats);
        }
        encoder.reset_member()?;
    }
}

/// Trailing-data policy for decoding.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Accept bytes after the last member (with a warning at the driver).
    pub ignore_trailing: bool,
    /// Accept trailing bytes even when they resemble a corrupt header.
    pub loose_trailing: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            ignore_trailing: true,
            loose_trailing: false,
        }
    }
}

fn verify_trailer<R: Read, W: Write>(
    rdec: &mut RangeDecoder<R>,
    decoder: &LzDecoder<W>,
) -> Result<()> {
    let mut bytes = [0u8; TRAILER_SIZE];
    if rdec.read_data(&mut bytes)? < TRAILER_SIZE {
        return Err(LzipError::Truncated {
            offset: rdec.member_position(),
        });
    }
    let trailer = LzipTrailer::parse(&bytes);
    if trailer.data_crc != decoder.crc() {
        return Err(LzipError::crc_mismatch(trailer.data_crc, decoder.crc()));
    }
    if trailer.data_size != decoder.data_position() {
        return Err(LzipError::DataSizeMismatch {
            expected: trailer.data_size,
            found: decoder.data_position(),
        });
    }
    if trailer.member_size != rdec.member_position() {
        return Err(LzipError::MemberSizeMismatch {
            expected: trailer.member_size,
            found: rdec.member_position(),
        });
    }
    Ok(())
}

/// Decode every member of a stream into `sink`, applying the
/// trailing-data policy after the last one. Output decoded before a
/// failure stays in the sink, so the driver can decide what to keep.
pub fn decode_stream<R: Read, W: Write>(
    reader: R,
    sink: &mut W,
    options: DecodeOptions,
) -> Result<StreamStats> {
    let mut rdec = RangeDecoder::new(reader);
    let mut decoder: Option<LzDecoder<&mut W>> = None;
    let mut sink = Some(sink);
    let mut stats = StreamStats::default();

    loop {
        rdec.reset_member_position();
        let mut hbuf = [0u8; HEADER_SIZE];
        let len = rdec.read_data(&mut hbuf)?;

        if len < HEADER_SIZE {
            if stats.members == 0 {
                return Err(LzipError::data(
                    len as u64,
                    "file ends unexpectedly at member header",
                ));
            }
            if len == 0 {
                return Ok(stats);
            }
            if is_magic_prefix(&hbuf[..len]) {
                return Err(LzipError::data(0, "truncated header in multimember file"));
            }
            if !options.ignore_trailing {
                return Err(LzipError::TrailingData);
            }
            stats.trailing_data = true;
            return Ok(stats);
        }

        if hbuf[..4] != crate::header::LZIP_MAGIC {
            if stats.members == 0 {
                return Err(LzipError::BadMagic);
            }
            if !options.loose_trailing && looks_like_corrupt_header(&hbuf) {
                return Err(LzipError::data(0, "corrupt header in multimember file"));
            }
            if !options.ignore_trailing {
                return Err(LzipError::TrailingData);
            }
            stats.trailing_data = true;
            return Ok(stats);
        }

        let header = LzipHeader::parse(&hbuf)?;
        if let Some(d) = decoder.as_mut() {
            d.reset_member(header.dict_size)?;
        } else {
            decoder = Some(LzDecoder::new(
                sink.take().expect("sink present before first member"),
                header.dict_size,
            )?);
        }
        let member_decoder = decoder.as_mut().expect("decoder initialized");

        member_decoder.decode_member(&mut rdec)?;
        verify_trailer(&mut rdec, member_decoder)?;
        stats.members += 1;
        stats.in_size += rdec.member_position();
        stats.out_size += member_decoder.data_position();
    }
}
