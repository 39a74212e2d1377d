//! Greedy encoder for compression level 0.
//!
//! Single pass, no trellis: at each position the depth-16 hash chain is
//! asked for its longest match, the rep0 distance is probed, and
//! whichever of {rep0, match >= 4 bytes, literal} applies is emitted
//! immediately. Dictionary 64 KiB, matches capped at 16 bytes; the point
//! is minimal memory and CPU, not ratio.

use crate::encoder::EncoderBase;
use crate::match_finder::MatchFinder;
use crate::{MIN_MATCH_LEN, POS_STATE_MASK};
use oxilz_core::error::Result;
use std::io::{Read, Write};

/// Dictionary size used by the fast encoder.
pub const FAST_DICT_SIZE: u32 = 1 << 16;
/// Match length limit used by the fast encoder.
pub const FAST_MATCH_LEN_LIMIT: usize = 16;

/// Greedy hash-chain encoder.
#[derive(Debug)]
pub struct FastEncoder<R: Read, W: Write> {
    base: EncoderBase<W>,
    finder: MatchFinder<R>,
}

impl<R: Read, W: Write> FastEncoder<R, W> {
    /// Create a fast encoder reading from `reader` and writing the coded
    /// stream to `sink`.
    pub fn new(reader: R, sink: W) -> Result<Self> {
        Ok(Self {
            base: EncoderBase::new(sink),
            finder: MatchFinder::new_hash_chain(reader, FAST_DICT_SIZE, FAST_MATCH_LEN_LIMIT)?,
        })
    }

    /// Dictionary size in effect for the member header.
    pub fn dictionary_size(&self) -> u32 {
        self.finder.dictionary_size()
    }

    /// Bytes of input consumed into the current member.
    pub fn data_position(&self) -> u64 {
        self.finder.data_position()
    }

    /// True when all input has been encoded.
    pub fn data_finished(&self) -> bool {
        self.finder.data_finished()
    }

    /// Access the shared encoder base (framing, CRC, positions).
    pub fn base_mut(&mut self) -> &mut EncoderBase<W> {
        &mut self.base
    }

    /// Shared encoder base, read-only.
    pub fn base(&self) -> &EncoderBase<W> {
        &self.base
    }

    /// Reset for the next member of the same stream.
    pub fn reset_member(&mut self) -> Result<()> {
        self.base.reset_member();
        self.finder.reset_member()
    }

    /// Advance past an emitted op of length `len`; the current position
    /// is already in the chain.
    fn skip(&mut self, len: usize) -> Result<()> {
        self.finder.move_pos()?;
        for _ in 1..len {
            self.finder.chain_update();
            self.finder.move_pos()?;
        }
        Ok(())
    }

    /// Encode input until end of data or `size_limit`, then emit the
    /// end-of-stream marker and flush the coder.
    pub fn encode_member(&mut self, size_limit: u64) -> Result<()> {
        if self.finder.data_position() == 0 && !self.finder.data_finished() {
            let byte = self.finder.byte_back(0);
            self.base.crc.update_byte(byte);
            self.base.emit_literal(0, byte, 0, 0)?;
            self.finder.chain_update();
            self.finder.move_pos()?;
        }
        while !self.finder.data_finished() {
            let limit = self.finder.match_len_limit();
            let rep_len = self
                .finder
                .true_match_len(0, self.base.rep[0] as usize + 1, limit);
            let best = self.finder.longest_match();
            let ps = (self.finder.data_position() as usize) & POS_STATE_MASK;

            if rep_len >= MIN_MATCH_LEN && rep_len >= best.map_or(0, |(_, len)| len) {
                self.base
                    .crc
                    .update(&self.finder.suffix(0)[..rep_len]);
                self.base.emit_rep(0, rep_len, ps)?;
                self.skip(rep_len)?;
            } else if let Some((dis, len)) = best.filter(|&(_, len)| len >= 4) {
                self.base.crc.update(&self.finder.suffix(0)[..len]);
                self.base.emit_match(dis, len, ps)?;
                self.skip(len)?;
            } else {
                let byte = self.finder.byte_back(0);
                let prev = self.finder.byte_back(1);
                let match_byte = self
                    .finder
                    .byte_back(self.base.rep[0] as usize + 1);
                self.base.crc.update_byte(byte);
                self.base.emit_literal(prev, byte, match_byte, ps)?;
                self.skip(1)?;
            }

            if self.base.member_position() >= size_limit {
                break;
            }
        }
        let ps = (self.finder.data_position() as usize) & POS_STATE_MASK;
        self.base.emit_eos(ps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::LzDecoder;
    use crate::range_coder::RangeDecoder;
    use std::io::Cursor;

    fn roundtrip(data: &[u8]) {
        let mut enc = FastEncoder::new(Cursor::new(data.to_vec()), Vec::new()).unwrap();
        enc.encode_member(u64::MAX).unwrap();
        assert!(enc.data_finished());
        let crc = enc.base().crc();
        enc.base_mut().flush_data().unwrap();
        let payload = enc.base_mut().swap_sink(Vec::new());

        let mut rdec = RangeDecoder::new(Cursor::new(payload));
        let mut dec = LzDecoder::new(Vec::new(), FAST_DICT_SIZE).unwrap();
        dec.decode_member(&mut rdec).unwrap();
        assert_eq!(dec.crc(), crc);
        assert_eq!(dec.into_sink(), data);
    }

    #[test]
    fn test_roundtrip_empty() {
        roundtrip(b"");
    }

    #[test]
    fn test_roundtrip_text() {
        roundtrip(b"a greedy encoder still has to get greedy text right");
    }

    #[test]
    fn test_roundtrip_run() {
        roundtrip(&vec![b'A'; 50_000]);
    }

    #[test]
    fn test_roundtrip_repeats() {
        let data = b"0123456789abcdef".repeat(1000);
        roundtrip(&data);
    }

    #[test]
    fn test_roundtrip_pseudorandom() {
        let mut seed = 99u32;
        let data: Vec<u8> = (0..30_000)
            .map(|_| {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                (seed >> 24) as u8
            })
            .collect();
        roundtrip(&data);
    }

    #[test]
    fn test_matches_capped_at_limit() {
        // Runs longer than the 16-byte cap still round-trip.
        let data = b"zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz only 16 at a time".to_vec();
        roundtrip(&data);
    }
}
