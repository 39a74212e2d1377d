//! Streaming LZ decoder.
//!
//! Reconstructs the original bytes from range-coded symbols while
//! maintaining the dictionary window as a circular buffer. Output is
//! flushed to the sink (and folded into the CRC) when the buffer wraps
//! and at member end, so a length-273 copy straddling the wrap boundary
//! never re-reads flushed data from the sink side.

use crate::model::{CoderModel, LengthModel, literal_state};
use crate::range_coder::RangeDecoder;
use crate::{
    DIS_ALIGN_BITS, DIS_SLOT_BITS, END_DIS_MODEL, LEN_LOW_SYMBOLS, LEN_MID_SYMBOLS, MIN_MATCH_LEN,
    POS_STATE_MASK, START_DIS_MODEL, State, len_state,
};
use oxilz_core::crc::Crc32;
use oxilz_core::error::{LzipError, Result};
use std::io::{Read, Write};

/// Decode a match or rep length (2..273).
pub(crate) fn decode_len<R: Read>(
    rdec: &mut RangeDecoder<R>,
    lm: &mut LengthModel,
    pos_state: usize,
) -> Result<usize> {
    if rdec.decode_bit(&mut lm.choice1)? == 0 {
        let sym = rdec.decode_tree(&mut lm.low[pos_state], crate::LEN_LOW_BITS)?;
        return Ok(MIN_MATCH_LEN + sym as usize);
    }
    if rdec.decode_bit(&mut lm.choice2)? == 0 {
        let sym = rdec.decode_tree(&mut lm.mid[pos_state], crate::LEN_MID_BITS)?;
        return Ok(MIN_MATCH_LEN + LEN_LOW_SYMBOLS + sym as usize);
    }
    let sym = rdec.decode_tree(&mut lm.high, crate::LEN_HIGH_BITS)?;
    Ok(MIN_MATCH_LEN + LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + sym as usize)
}

/// Dictionary-backed streaming decoder for one or more members.
#[derive(Debug)]
pub struct LzDecoder<W: Write> {
    sink: W,
    buffer: Vec<u8>,
    /// Write cursor within the circular buffer.
    pos: usize,
    /// Flush watermark; bytes in `stream_pos..pos` are not yet written out.
    stream_pos: usize,
    partial_data_pos: u64,
    dict_size: usize,
    crc: Crc32,
    model: CoderModel,
    state: State,
    rep: [u32; 4],
}

impl<W: Write> LzDecoder<W> {
    /// Create a decoder with a window for `dict_size`.
    pub fn new(sink: W, dict_size: u32) -> Result<Self> {
        let buffer_size = (dict_size as usize).max(1 << 16);
        let mut buffer: Vec<u8> = Vec::new();
        buffer
            .try_reserve_exact(buffer_size)
            .map_err(|_| LzipError::OutOfMemory)?;
        buffer.resize(buffer_size, 0);
        Ok(Self {
            sink,
            buffer,
            pos: 0,
            stream_pos: 0,
            partial_data_pos: 0,
            dict_size: dict_size as usize,
            crc: Crc32::new(),
            model: CoderModel::new(),
            state: State::new(),
            rep: [0; 4],
        })
    }

    /// Reset coder state for the next member. The dictionary buffer is
    /// reused (grown if the new member needs more); its content is
    /// unreachable because distances are bounded by the member-local data
    /// position.
    pub fn reset_member(&mut self, dict_size: u32) -> Result<()> {
        let buffer_size = (dict_size as usize).max(1 << 16);
        if self.buffer.len() < buffer_size {
            self.buffer
                .try_reserve_exact(buffer_size - self.buffer.len())
                .map_err(|_| LzipError::OutOfMemory)?;
            self.buffer.resize(buffer_size, 0);
        }
        self.dict_size = dict_size as usize;
        self.pos = 0;
        self.stream_pos = 0;
        self.partial_data_pos = 0;
        self.crc.reset();
        self.model.reset();
        self.state = State::new();
        self.rep = [0; 4];
        Ok(())
    }

    /// Bytes decoded in the current member.
    pub fn data_position(&self) -> u64 {
        self.partial_data_pos + (self.pos - self.stream_pos) as u64
    }

    /// CRC-32 of the bytes flushed so far.
    pub fn crc(&self) -> u32 {
        self.crc.value()
    }

    /// Consume the decoder and return the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Access the sink.
    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    fn flush_data(&mut self) -> Result<()> {
        if self.pos > self.stream_pos {
            let block = &self.buffer[self.stream_pos..self.pos];
            self.crc.update(block);
            self.sink.write_all(block)?;
            self.partial_data_pos += (self.pos - self.stream_pos) as u64;
        }
        if self.pos >= self.buffer.len() {
            self.pos = 0;
        }
        self.stream_pos = self.pos;
        Ok(())
    }

    /// Byte at the given 0-based distance behind the write cursor.
    #[inline(always)]
    fn peek(&self, distance: u32) -> u8 {
        let back = distance as usize + 1;
        let index = if self.pos >= back {
            self.pos - back
        } else {
            self.buffer.len() - back + self.pos
        };
        self.buffer[index]
    }

    #[inline]
    fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.buffer[self.pos] = byte;
        self.pos += 1;
        if self.pos >= self.buffer.len() {
            self.flush_data()?;
        }
        Ok(())
    }

    fn copy_block(&mut self, distance: u32, len: usize) -> Result<()> {
        for _ in 0..len {
            let byte = self.peek(distance);
            self.put_byte(byte)?;
        }
        Ok(())
    }

    /// Decode one member's payload up to and including the end-of-stream
    /// marker. On success the sink holds the member's data and
    /// [`data_position`](Self::data_position) / [`crc`](Self::crc) describe
    /// it; the trailer is left unread for the framing layer.
    pub fn decode_member<R: Read>(&mut self, rdec: &mut RangeDecoder<R>) -> Result<()> {
        rdec.load()?;
        loop {
            if rdec.finished()? {
                return Err(LzipError::Truncated {
                    offset: rdec.member_position(),
                });
            }
            let pos_state = (self.data_position() as usize) & POS_STATE_MASK;
            let st = self.state.value();

            if rdec.decode_bit(&mut self.model.bm_match[st][pos_state])? == 0 {
                // Literal.
                let prev_byte = if self.data_position() == 0 {
                    0
                } else {
                    self.peek(0)
                };
                let ls = literal_state(prev_byte);
                let byte = if self.state.is_literal() {
                    rdec.decode_tree(&mut self.model.bm_literal[ls], 8)? as u8
                } else {
                    let match_byte = self.peek(self.rep[0]);
                    rdec.decode_matched(&mut self.model.bm_literal[ls], match_byte)?
                };
                self.put_byte(byte)?;
                self.state.update_literal();
                continue;
            }

            let len;
            if rdec.decode_bit(&mut self.model.bm_rep[st])? == 1 {
                // Rep branch.
                if rdec.decode_bit(&mut self.model.bm_rep0[st])? == 0 {
                    if rdec.decode_bit(&mut self.model.bm_len[st][pos_state])? == 0 {
                        // Short rep: one byte at rep0.
                        self.check_distance(self.rep[0], rdec.member_position())?;
                        self.state.update_short_rep();
                        let byte = self.peek(self.rep[0]);
                        self.put_byte(byte)?;
                        continue;
                    }
                } else {
                    let distance;
                    if rdec.decode_bit(&mut self.model.bm_rep1[st])? == 0 {
                        distance = self.rep[1];
                    } else if rdec.decode_bit(&mut self.model.bm_rep2[st])? == 0 {
                        distance = self.rep[2];
                        self.rep[2] = self.rep[1];
                    } else {
                        distance = self.rep[3];
                        self.rep[3] = self.rep[2];
                        self.rep[2] = self.rep[1];
                    }
                    self.rep[1] = self.rep[0];
                    self.rep[0] = distance;
                }
                len = decode_len(rdec, &mut self.model.rep_len, pos_state)?;
                self.state.update_rep();
            } else {
                // New match: decode length, then distance from its slot.
                self.rep[3] = self.rep[2];
                self.rep[2] = self.rep[1];
                self.rep[1] = self.rep[0];
                len = decode_len(rdec, &mut self.model.match_len, pos_state)?;
                let slot = rdec.decode_tree(
                    &mut self.model.bm_dis_slot[len_state(len)],
                    DIS_SLOT_BITS,
                )?;
                if slot < START_DIS_MODEL as u32 {
                    self.rep[0] = slot;
                } else {
                    let direct_bits = (slot >> 1) - 1;
                    self.rep[0] = (2 | (slot & 1)) << direct_bits;
                    if slot < END_DIS_MODEL as u32 {
                        let base = self.rep[0] as usize - slot as usize;
                        self.rep[0] += rdec.decode_tree_reversed_dis(
                            &mut self.model.bm_dis,
                            base,
                            direct_bits,
                        )?;
                    } else {
                        self.rep[0] += rdec.decode_direct_bits(direct_bits - DIS_ALIGN_BITS)?
                            << DIS_ALIGN_BITS;
                        self.rep[0] +=
                            rdec.decode_tree_reversed(&mut self.model.bm_align, DIS_ALIGN_BITS)?;
                        if self.rep[0] == 0xFFFF_FFFF {
                            // End-of-stream marker.
                            self.flush_data()?;
                            if len == MIN_MATCH_LEN {
                                return Ok(());
                            }
                            return Err(LzipError::data(
                                rdec.member_position(),
                                "unsupported marker code",
                            ));
                        }
                    }
                }
                self.state.update_match();
            }

            self.check_distance(self.rep[0], rdec.member_position())?;
            self.copy_block(self.rep[0], len)?;
        }
    }

    #[inline]
    fn check_distance(&self, distance: u32, member_pos: u64) -> Result<()> {
        if distance as usize >= self.dict_size || distance as u64 >= self.data_position() {
            return Err(LzipError::data(member_pos, "invalid distance"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_coder::RangeEncoder;
    use std::io::Cursor;

    /// Hand-encode literals plus the end marker with a mirrored model;
    /// checks the decoder against the wire grammar without the encoder.
    fn encode_literals(data: &[u8]) -> Vec<u8> {
        let mut enc = RangeEncoder::new(Vec::new());
        let mut model = CoderModel::new();
        let mut state = State::new();
        let mut pos = 0u64;
        for &byte in data {
            let pos_state = (pos as usize) & POS_STATE_MASK;
            enc.encode_bit(&mut model.bm_match[state.value()][pos_state], 0)
                .unwrap();
            let prev = if pos == 0 { 0 } else { data[pos as usize - 1] };
            let ls = literal_state(prev);
            enc.encode_tree(&mut model.bm_literal[ls], byte as u32 | 0x100, 8)
                .unwrap();
            state.update_literal();
            pos += 1;
        }
        // End-of-stream marker: match, len 2, distance 0xFFFFFFFF.
        let pos_state = (pos as usize) & POS_STATE_MASK;
        enc.encode_bit(&mut model.bm_match[state.value()][pos_state], 1)
            .unwrap();
        enc.encode_bit(&mut model.bm_rep[state.value()], 0).unwrap();
        enc.encode_bit(&mut model.match_len.choice1, 0).unwrap();
        enc.encode_tree(&mut model.match_len.low[pos_state], 0, 3)
            .unwrap();
        enc.encode_tree(&mut model.bm_dis_slot[0], 63, DIS_SLOT_BITS)
            .unwrap();
        enc.encode_direct_bits(0x03FF_FFFF, 26).unwrap();
        enc.encode_tree_reversed(&mut model.bm_align, 0xF, DIS_ALIGN_BITS)
            .unwrap();
        enc.flush().unwrap();
        enc.flush_data().unwrap();
        enc.into_sink()
    }

    #[test]
    fn test_decode_literal_stream() {
        let data = b"Hello, lzip!";
        let payload = encode_literals(data);
        let mut rdec = RangeDecoder::new(Cursor::new(payload));
        let mut dec = LzDecoder::new(Vec::new(), crate::MIN_DICT_SIZE).unwrap();
        dec.decode_member(&mut rdec).unwrap();
        assert_eq!(dec.data_position(), data.len() as u64);
        assert_eq!(dec.crc(), Crc32::compute(data));
        assert_eq!(dec.into_sink(), data);
    }

    #[test]
    fn test_decode_empty_member() {
        let payload = encode_literals(b"");
        let mut rdec = RangeDecoder::new(Cursor::new(payload));
        let mut dec = LzDecoder::new(Vec::new(), crate::MIN_DICT_SIZE).unwrap();
        dec.decode_member(&mut rdec).unwrap();
        assert_eq!(dec.data_position(), 0);
        assert_eq!(dec.crc(), 0);
        assert!(dec.into_sink().is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let data = vec![7u8; 300];
        let mut payload = encode_literals(&data);
        payload.truncate(payload.len() - 20);
        let mut rdec = RangeDecoder::new(Cursor::new(payload));
        let mut dec = LzDecoder::new(Vec::new(), crate::MIN_DICT_SIZE).unwrap();
        let err = dec.decode_member(&mut rdec).unwrap_err();
        assert!(matches!(err, LzipError::Truncated { .. }));
    }

    #[test]
    fn test_member_reset_reuses_buffer() {
        let payload = encode_literals(b"abc");
        let mut dec = LzDecoder::new(Vec::new(), crate::MIN_DICT_SIZE).unwrap();
        let mut rdec = RangeDecoder::new(Cursor::new(payload.clone()));
        dec.decode_member(&mut rdec).unwrap();
        dec.reset_member(crate::MIN_DICT_SIZE).unwrap();
        assert_eq!(dec.data_position(), 0);
        assert_eq!(dec.crc(), 0);
        let mut rdec = RangeDecoder::new(Cursor::new(payload));
        dec.decode_member(&mut rdec).unwrap();
        assert_eq!(dec.into_sink(), b"abcabc");
    }
}
