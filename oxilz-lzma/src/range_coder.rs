//! Renormalizing binary range coder.
//!
//! The encoder keeps a 33-bit `low` accumulator and resolves carries by
//! deferring one byte (`cache`) and counting a run of 0xFF bytes; on a
//! carry the deferred byte is incremented and the run flushes as zeros.
//! The decoder keeps a 32-bit `code` window over the stream and refills
//! through a small internal buffer.
//!
//! Both sides also pass raw bytes through (`write_raw` / `read_data`) so
//! the framing layer can emit headers and trailers at the right offsets
//! and member positions include them.

use crate::{BIT_MODEL_TOTAL, BIT_MODEL_TOTAL_BITS, MOVE_BITS};
use oxilz_core::error::{LzipError, Result};
use std::io::{ErrorKind, Read, Write};

const TOP: u32 = 1 << 24;
const BUFFER_SIZE: usize = 1 << 16;

/// Range encoder writing to an output sink.
#[derive(Debug)]
pub struct RangeEncoder<W: Write> {
    sink: W,
    buffer: Vec<u8>,
    low: u64,
    range: u32,
    cache: u8,
    ff_count: u32,
    member_pos: u64,
}

impl<W: Write> RangeEncoder<W> {
    /// Create a new range encoder around `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(BUFFER_SIZE),
            low: 0,
            range: 0xFFFF_FFFF,
            cache: 0,
            ff_count: 0,
            member_pos: 0,
        }
    }

    /// Reset coder state for a new member. Buffered output is retained.
    pub fn reset_member(&mut self) {
        self.low = 0;
        self.range = 0xFFFF_FFFF;
        self.cache = 0;
        self.ff_count = 0;
        self.member_pos = 0;
    }

    /// Bytes produced for the current member so far, including pending
    /// 0xFF runs and raw framing bytes.
    pub fn member_position(&self) -> u64 {
        self.member_pos + self.ff_count as u64
    }

    /// Swap the output sink, returning the previous one. The caller must
    /// have flushed first; this is how the driver rotates volume files.
    pub fn swap_sink(&mut self, new_sink: W) -> W {
        std::mem::replace(&mut self.sink, new_sink)
    }

    /// Consume the encoder and return the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }

    #[inline]
    fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.buffer.push(byte);
        self.member_pos += 1;
        if self.buffer.len() >= BUFFER_SIZE {
            self.sink.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Write raw bytes, bypassing the coder. Only valid while no coded
    /// bits are pending (member start, or after `flush`).
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            self.put_byte(byte)?;
        }
        Ok(())
    }

    fn shift_low(&mut self) -> Result<()> {
        if (self.low >> 24) != 0xFF {
            let carry = (self.low > 0xFFFF_FFFF) as u8;
            let cache = self.cache;
            self.put_byte(cache.wrapping_add(carry))?;
            while self.ff_count > 0 {
                self.ff_count -= 1;
                self.put_byte(0xFFu8.wrapping_add(carry))?;
            }
            self.cache = (self.low >> 24) as u8;
        } else {
            self.ff_count += 1;
        }
        self.low = (self.low & 0x00FF_FFFF) << 8;
        Ok(())
    }

    /// Encode one bit under the adaptive probability `prob`.
    #[inline]
    pub fn encode_bit(&mut self, prob: &mut u16, bit: u32) -> Result<()> {
        let bound = (self.range >> BIT_MODEL_TOTAL_BITS) * (*prob as u32);
        if bit == 0 {
            self.range = bound;
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
        } else {
            self.low += bound as u64;
            self.range -= bound;
            *prob -= *prob >> MOVE_BITS;
        }
        while self.range < TOP {
            self.range <<= 8;
            self.shift_low()?;
        }
        Ok(())
    }

    /// Encode `num_bits` equiprobable bits, most significant first.
    pub fn encode_direct_bits(&mut self, value: u32, num_bits: u32) -> Result<()> {
        for i in (0..num_bits).rev() {
            self.range >>= 1;
            if (value >> i) & 1 != 0 {
                self.low += self.range as u64;
            }
            while self.range < TOP {
                self.range <<= 8;
                self.shift_low()?;
            }
        }
        Ok(())
    }

    /// Encode a bit-tree symbol, most significant bit first.
    pub fn encode_tree(&mut self, probs: &mut [u16], symbol: u32, num_bits: u32) -> Result<()> {
        let mut model = 1usize;
        for i in (0..num_bits).rev() {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[model], bit)?;
            model = (model << 1) | bit as usize;
        }
        Ok(())
    }

    /// Encode a reverse bit-tree symbol, least significant bit first.
    pub fn encode_tree_reversed(
        &mut self,
        probs: &mut [u16],
        mut symbol: u32,
        num_bits: u32,
    ) -> Result<()> {
        let mut model = 1usize;
        for _ in 0..num_bits {
            let bit = symbol & 1;
            symbol >>= 1;
            self.encode_bit(&mut probs[model], bit)?;
            model = (model << 1) | bit as usize;
        }
        Ok(())
    }

    /// Encode a reverse bit-tree symbol through the shared mid-range
    /// distance predictors, which pack the per-slot trees into one array
    /// at offset `base`.
    pub fn encode_tree_reversed_dis(
        &mut self,
        probs: &mut [u16],
        base: usize,
        mut symbol: u32,
        num_bits: u32,
    ) -> Result<()> {
        let mut model = 1usize;
        for _ in 0..num_bits {
            let bit = symbol & 1;
            symbol >>= 1;
            self.encode_bit(&mut probs[base + model - 1], bit)?;
            model = (model << 1) | bit as usize;
        }
        Ok(())
    }

    /// Encode a literal byte against the byte found at the last used
    /// distance ("matched" mode).
    pub fn encode_matched(
        &mut self,
        probs: &mut [u16; 0x300],
        byte: u8,
        match_byte: u8,
    ) -> Result<()> {
        let mut symbol = (byte as usize) | 0x100;
        let mut match_symbol = (match_byte as usize) << 1;
        let mut model = 1usize;
        loop {
            let match_bit = (match_symbol >> 8) & 1;
            match_symbol <<= 1;
            let bit = (symbol >> 7) & 1;
            symbol <<= 1;
            self.encode_bit(&mut probs[0x100 + (match_bit << 8) + model], bit as u32)?;
            model = (model << 1) | bit;
            if model >= 0x100 {
                break;
            }
            if bit != match_bit {
                while model < 0x100 {
                    let bit = (symbol >> 7) & 1;
                    symbol <<= 1;
                    self.encode_bit(&mut probs[model], bit as u32)?;
                    model = (model << 1) | bit;
                }
                break;
            }
        }
        Ok(())
    }

    /// Flush pending coder state: after this, the sink holds every coded
    /// bit and raw bytes may be written again.
    pub fn flush(&mut self) -> Result<()> {
        for _ in 0..5 {
            self.shift_low()?;
        }
        Ok(())
    }

    /// Write buffered bytes through to the sink.
    pub fn flush_data(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.sink.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        self.sink.flush()?;
        Ok(())
    }
}

/// Range decoder pulling from an input source through a 64 KiB buffer.
#[derive(Debug)]
pub struct RangeDecoder<R: Read> {
    reader: R,
    buffer: Vec<u8>,
    pos: usize,
    stream_pos: usize,
    code: u32,
    range: u32,
    at_stream_end: bool,
    member_pos: u64,
}

impl<R: Read> RangeDecoder<R> {
    /// Create a new range decoder around `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: vec![0u8; BUFFER_SIZE],
            pos: 0,
            stream_pos: 0,
            code: 0,
            range: 0xFFFF_FFFF,
            at_stream_end: false,
            member_pos: 0,
        }
    }

    /// Bytes consumed since the last `reset_member_position`.
    pub fn member_position(&self) -> u64 {
        self.member_pos
    }

    /// Start counting a new member.
    pub fn reset_member_position(&mut self) {
        self.member_pos = 0;
    }

    fn read_block(&mut self) -> Result<()> {
        if self.at_stream_end {
            return Ok(());
        }
        self.pos = 0;
        self.stream_pos = 0;
        while self.stream_pos < self.buffer.len() {
            match self.reader.read(&mut self.buffer[self.stream_pos..]) {
                Ok(0) => {
                    self.at_stream_end = true;
                    break;
                }
                Ok(n) => self.stream_pos += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// True when every input byte has been consumed.
    pub fn finished(&mut self) -> Result<bool> {
        if self.pos < self.stream_pos {
            return Ok(false);
        }
        if !self.at_stream_end {
            self.read_block()?;
        }
        Ok(self.pos >= self.stream_pos)
    }

    #[inline]
    fn get_byte(&mut self) -> Result<u8> {
        if self.finished()? {
            return Err(LzipError::Truncated {
                offset: self.member_pos,
            });
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        self.member_pos += 1;
        Ok(byte)
    }

    /// Read up to `out.len()` raw bytes, returning how many were read.
    /// Short counts only happen at end of input.
    pub fn read_data(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut count = 0;
        while count < out.len() && !self.finished()? {
            let n = (self.stream_pos - self.pos).min(out.len() - count);
            out[count..count + n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            self.member_pos += n as u64;
            count += n;
        }
        Ok(count)
    }

    /// Prime the code window at the start of a member's coded payload.
    pub fn load(&mut self) -> Result<()> {
        self.range = 0xFFFF_FFFF;
        self.code = 0;
        let first = self.get_byte()?;
        if first != 0 {
            return Err(LzipError::data(
                self.member_pos,
                "nonzero first byte of coded data",
            ));
        }
        for _ in 0..4 {
            self.code = (self.code << 8) | self.get_byte()? as u32;
        }
        Ok(())
    }

    #[inline]
    fn normalize(&mut self) -> Result<()> {
        if self.range < TOP {
            self.range <<= 8;
            self.code = (self.code << 8) | self.get_byte()? as u32;
        }
        Ok(())
    }

    /// Decode one bit under the adaptive probability `prob`.
    #[inline]
    pub fn decode_bit(&mut self, prob: &mut u16) -> Result<u32> {
        self.normalize()?;
        let bound = (self.range >> BIT_MODEL_TOTAL_BITS) * (*prob as u32);
        if self.code < bound {
            self.range = bound;
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
            Ok(0)
        } else {
            self.code -= bound;
            self.range -= bound;
            *prob -= *prob >> MOVE_BITS;
            Ok(1)
        }
    }

    /// Decode `num_bits` equiprobable bits, most significant first.
    pub fn decode_direct_bits(&mut self, num_bits: u32) -> Result<u32> {
        let mut symbol = 0u32;
        for _ in 0..num_bits {
            self.normalize()?;
            self.range >>= 1;
            symbol <<= 1;
            if self.code >= self.range {
                self.code -= self.range;
                symbol |= 1;
            }
        }
        Ok(symbol)
    }

    /// Decode a bit-tree symbol.
    pub fn decode_tree(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32> {
        let mut model = 1usize;
        for _ in 0..num_bits {
            let bit = self.decode_bit(&mut probs[model])?;
            model = (model << 1) | bit as usize;
        }
        Ok(model as u32 - (1 << num_bits))
    }

    /// Decode a reverse bit-tree symbol.
    pub fn decode_tree_reversed(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32> {
        let mut symbol = 0u32;
        let mut model = 1usize;
        for i in 0..num_bits {
            let bit = self.decode_bit(&mut probs[model])?;
            model = (model << 1) | bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }

    /// Decode a reverse bit-tree symbol through the shared mid-range
    /// distance predictors at offset `base`.
    pub fn decode_tree_reversed_dis(
        &mut self,
        probs: &mut [u16],
        base: usize,
        num_bits: u32,
    ) -> Result<u32> {
        let mut symbol = 0u32;
        let mut model = 1usize;
        for i in 0..num_bits {
            let bit = self.decode_bit(&mut probs[base + model - 1])?;
            model = (model << 1) | bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }

    /// Decode a literal byte in "matched" mode.
    pub fn decode_matched(&mut self, probs: &mut [u16; 0x300], match_byte: u8) -> Result<u8> {
        let mut symbol = 1usize;
        let mut match_symbol = match_byte as usize;
        loop {
            let match_bit = (match_symbol >> 7) & 1;
            match_symbol <<= 1;
            let bit = self.decode_bit(&mut probs[0x100 + (match_bit << 8) + symbol])? as usize;
            symbol = (symbol << 1) | bit;
            if symbol >= 0x100 {
                break;
            }
            if bit != match_bit {
                while symbol < 0x100 {
                    let bit = self.decode_bit(&mut probs[symbol])?;
                    symbol = (symbol << 1) | bit as usize;
                }
                break;
            }
        }
        Ok((symbol & 0xFF) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PROB_INIT;
    use std::io::Cursor;

    fn roundtrip_bits(bits: &[u32]) {
        let mut enc = RangeEncoder::new(Vec::new());
        let mut prob = PROB_INIT;
        for &bit in bits {
            enc.encode_bit(&mut prob, bit).unwrap();
        }
        enc.flush().unwrap();
        enc.flush_data().unwrap();
        let bytes = enc.into_sink();

        let mut dec = RangeDecoder::new(Cursor::new(bytes));
        dec.load().unwrap();
        let mut prob = PROB_INIT;
        for &bit in bits {
            assert_eq!(dec.decode_bit(&mut prob).unwrap(), bit);
        }
    }

    #[test]
    fn test_bit_roundtrip() {
        roundtrip_bits(&[0, 1, 0, 1]);
        roundtrip_bits(&[1; 100]);
        roundtrip_bits(&[0; 100]);
    }

    #[test]
    fn test_skewed_bit_roundtrip() {
        // Long runs drive the probability to the extremes and exercise
        // the ff-run carry path.
        let mut bits = vec![1u32; 500];
        bits.extend_from_slice(&[0; 500]);
        for i in 0..200 {
            bits.push((i % 3 == 0) as u32);
        }
        roundtrip_bits(&bits);
    }

    #[test]
    fn test_direct_bits_roundtrip() {
        let values = [0u32, 1, 0xFF, 0x1234, 0xFFFF_FFFF, 0xDEAD_BEEF];
        let mut enc = RangeEncoder::new(Vec::new());
        for &v in &values {
            enc.encode_direct_bits(v, 32).unwrap();
        }
        enc.flush().unwrap();
        enc.flush_data().unwrap();

        let mut dec = RangeDecoder::new(Cursor::new(enc.into_sink()));
        dec.load().unwrap();
        for &v in &values {
            assert_eq!(dec.decode_direct_bits(32).unwrap(), v);
        }
    }

    #[test]
    fn test_tree_roundtrip() {
        let mut enc = RangeEncoder::new(Vec::new());
        let mut probs = [PROB_INIT; 256];
        for symbol in 0..256u32 {
            enc.encode_tree(&mut probs, symbol, 8).unwrap();
        }
        enc.flush().unwrap();
        enc.flush_data().unwrap();

        let mut dec = RangeDecoder::new(Cursor::new(enc.into_sink()));
        dec.load().unwrap();
        let mut probs = [PROB_INIT; 256];
        for symbol in 0..256u32 {
            assert_eq!(dec.decode_tree(&mut probs, 8).unwrap(), symbol);
        }
    }

    #[test]
    fn test_reverse_tree_roundtrip() {
        let mut enc = RangeEncoder::new(Vec::new());
        let mut probs = [PROB_INIT; 16];
        for symbol in 0..16u32 {
            enc.encode_tree_reversed(&mut probs, symbol, 4).unwrap();
        }
        enc.flush().unwrap();
        enc.flush_data().unwrap();

        let mut dec = RangeDecoder::new(Cursor::new(enc.into_sink()));
        dec.load().unwrap();
        let mut probs = [PROB_INIT; 16];
        for symbol in 0..16u32 {
            assert_eq!(dec.decode_tree_reversed(&mut probs, 4).unwrap(), symbol);
        }
    }

    #[test]
    fn test_matched_literal_roundtrip() {
        let pairs: Vec<(u8, u8)> = (0..=255u8).map(|b| (b, b.rotate_left(3))).collect();
        let mut enc = RangeEncoder::new(Vec::new());
        let mut probs = [PROB_INIT; 0x300];
        for &(byte, mb) in &pairs {
            enc.encode_matched(&mut probs, byte, mb).unwrap();
        }
        enc.flush().unwrap();
        enc.flush_data().unwrap();

        let mut dec = RangeDecoder::new(Cursor::new(enc.into_sink()));
        dec.load().unwrap();
        let mut probs = [PROB_INIT; 0x300];
        for &(byte, mb) in &pairs {
            assert_eq!(dec.decode_matched(&mut probs, mb).unwrap(), byte);
        }
    }

    #[test]
    fn test_raw_passthrough_and_position() {
        let mut enc = RangeEncoder::new(Vec::new());
        enc.write_raw(b"LZIP\x01\x0c").unwrap();
        assert_eq!(enc.member_position(), 6);
        enc.flush_data().unwrap();
        assert_eq!(enc.into_sink(), b"LZIP\x01\x0c");
    }

    #[test]
    fn test_decoder_truncation() {
        let mut enc = RangeEncoder::new(Vec::new());
        let mut prob = PROB_INIT;
        for _ in 0..1000 {
            enc.encode_bit(&mut prob, 1).unwrap();
        }
        enc.flush().unwrap();
        enc.flush_data().unwrap();
        let mut bytes = enc.into_sink();
        bytes.truncate(bytes.len() / 2);

        let mut dec = RangeDecoder::new(Cursor::new(bytes));
        dec.load().unwrap();
        let mut prob = PROB_INIT;
        let mut result = Ok(0);
        for _ in 0..1000 {
            result = dec.decode_bit(&mut prob);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(LzipError::Truncated { .. })));
    }

    #[test]
    fn test_read_data_short_at_eof() {
        let mut dec = RangeDecoder::new(Cursor::new(vec![1u8, 2, 3]));
        let mut buf = [0u8; 6];
        assert_eq!(dec.read_data(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert!(dec.finished().unwrap());
    }
}
