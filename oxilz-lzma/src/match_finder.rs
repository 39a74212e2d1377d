//! Sliding window and match search.
//!
//! The window holds `before + dict + after` bytes: `before` keeps already
//! encoded bytes addressable for literal contexts and CRC, `after` is
//! look-ahead so searches near the window edge never re-read. When the
//! write position reaches the limit the window slides: the processed
//! prefix is discarded, stored positions are rebased, and more input is
//! read.
//!
//! Two search structures share the window:
//!
//! - **BT4**: a binary search tree over suffixes, bucketed by a 4-byte
//!   hash, with auxiliary 2- and 3-byte hash heads for short matches.
//!   `get_match_pairs` returns matches of strictly increasing length and
//!   incrementally rebalances the tree.
//! - **Hash chain**: a depth-limited chain over the 4-byte hash, used by
//!   the greedy level-0 encoder.
//!
//! Positions are stored +1 so that 0 can mean "no link".

use crate::{MAX_MATCH_LEN, MIN_DICT_SIZE, NUM_TRIALS};
use oxilz_core::crc::Crc32;
use oxilz_core::error::{LzipError, Result};
use std::io::{ErrorKind, Read};

/// Encoded bytes kept behind the current position.
const BEFORE_SIZE: usize = NUM_TRIALS + 1;
/// Look-ahead cushion kept in front of the position limit.
const AFTER_SIZE: usize = 2 * MAX_MATCH_LEN + 1;

const NUM_PREV_POSITIONS2: usize = 1 << 10;
const NUM_PREV_POSITIONS3: usize = 1 << 16;

/// One match candidate: 0-based distance and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    /// Distance code (actual back distance minus one).
    pub dis: u32,
    /// Match length.
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    Tree,
    Chain,
}

/// Sliding window match-finder.
#[derive(Debug)]
pub struct MatchFinder<R: Read> {
    reader: R,
    buffer: Vec<u8>,
    dict_size: usize,
    match_len_limit: usize,
    /// Hash heads: 2-byte, 3-byte, then 4-byte buckets.
    prev_positions: Vec<i32>,
    /// Tree children (two per cyclic position) or chain links (one).
    pos_array: Vec<i32>,
    pos: usize,
    cyclic_pos: usize,
    stream_pos: usize,
    pos_limit: usize,
    partial_data_pos: u64,
    at_stream_end: bool,
    been_flushed: bool,
    cycles: usize,
    key4_mask: u32,
    key4_offset: usize,
    mode: SearchMode,
}

fn alloc_zeroed_i32(len: usize) -> Result<Vec<i32>> {
    let mut v: Vec<i32> = Vec::new();
    v.try_reserve_exact(len).map_err(|_| LzipError::OutOfMemory)?;
    v.resize(len, 0);
    Ok(v)
}

fn alloc_zeroed_u8(len: usize) -> Result<Vec<u8>> {
    let mut v: Vec<u8> = Vec::new();
    v.try_reserve_exact(len).map_err(|_| LzipError::OutOfMemory)?;
    v.resize(len, 0);
    Ok(v)
}

impl<R: Read> MatchFinder<R> {
    /// Create a BT4 finder for the optimal encoder.
    pub fn new_bt4(reader: R, dict_size: u32, match_len_limit: usize) -> Result<Self> {
        let cycles = if match_len_limit < MAX_MATCH_LEN {
            16 + match_len_limit / 2
        } else {
            256
        };
        Self::init(reader, dict_size, match_len_limit, SearchMode::Tree, cycles)
    }

    /// Create a depth-16 hash-chain finder for the fast encoder.
    pub fn new_hash_chain(reader: R, dict_size: u32, match_len_limit: usize) -> Result<Self> {
        Self::init(reader, dict_size, match_len_limit, SearchMode::Chain, 16)
    }

    fn init(
        reader: R,
        dict_size: u32,
        match_len_limit: usize,
        mode: SearchMode,
        cycles: usize,
    ) -> Result<Self> {
        // Each window slide discards (dict_factor - 1) dictionaries, so
        // the memmove cost amortizes away.
        let dict_factor = match mode {
            SearchMode::Tree => 2,
            SearchMode::Chain => 16,
        };
        let mut finder = Self {
            reader,
            buffer: alloc_zeroed_u8((dict_size as usize).max(1 << 16))?,
            dict_size: dict_size as usize,
            match_len_limit,
            prev_positions: Vec::new(),
            pos_array: Vec::new(),
            pos: 0,
            cyclic_pos: 0,
            stream_pos: 0,
            pos_limit: 0,
            partial_data_pos: 0,
            at_stream_end: false,
            been_flushed: false,
            cycles,
            key4_mask: 0,
            key4_offset: 0,
            mode,
        };
        // Probe read: a file smaller than the dictionary shrinks it.
        finder.read_block()?;
        if finder.at_stream_end {
            finder.dict_size = finder
                .stream_pos
                .max(MIN_DICT_SIZE as usize)
                .min(finder.dict_size);
        } else {
            let full_size = BEFORE_SIZE + dict_factor * finder.dict_size + AFTER_SIZE;
            if finder.buffer.len() < full_size {
                finder
                    .buffer
                    .try_reserve_exact(full_size - finder.buffer.len())
                    .map_err(|_| LzipError::OutOfMemory)?;
                finder.buffer.resize(full_size, 0);
            }
            finder.read_block()?;
        }

        let key4_size = match mode {
            SearchMode::Chain => 1 << 16,
            SearchMode::Tree => {
                let dict_bits = 32 - (finder.dict_size as u32 - 1).leading_zeros();
                let mut size = 1usize << dict_bits.saturating_sub(2).max(16);
                if finder.dict_size > 1 << 26 {
                    size >>= 1;
                }
                size
            }
        };
        finder.key4_mask = key4_size as u32 - 1;
        finder.key4_offset = match mode {
            SearchMode::Chain => 0,
            SearchMode::Tree => NUM_PREV_POSITIONS2 + NUM_PREV_POSITIONS3,
        };
        finder.prev_positions = alloc_zeroed_i32(finder.key4_offset + key4_size)?;
        let cyclic_size = finder.dict_size + 1;
        let factor = match mode {
            SearchMode::Tree => 2,
            SearchMode::Chain => 1,
        };
        finder.pos_array = alloc_zeroed_i32(factor * cyclic_size)?;
        Ok(finder)
    }

    fn read_block(&mut self) -> Result<()> {
        while !self.at_stream_end && self.stream_pos < self.buffer.len() {
            match self.reader.read(&mut self.buffer[self.stream_pos..]) {
                Ok(0) => self.at_stream_end = true,
                Ok(n) => self.stream_pos += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.pos_limit = if self.at_stream_end {
            self.stream_pos
        } else {
            self.buffer.len() - AFTER_SIZE
        };
        Ok(())
    }

    fn normalize_pos(&mut self) -> Result<()> {
        if self.pos > self.stream_pos {
            return Err(LzipError::Internal("match finder moved past stream end"));
        }
        if !self.at_stream_end {
            let offset = self.pos - self.dict_size - BEFORE_SIZE;
            self.buffer.copy_within(offset..self.stream_pos, 0);
            self.partial_data_pos += offset as u64;
            self.pos -= offset;
            self.stream_pos -= offset;
            let offset = offset as i32;
            for link in &mut self.prev_positions {
                *link = (*link - offset).max(0);
            }
            for link in &mut self.pos_array {
                *link = (*link - offset).max(0);
            }
            self.read_block()?;
        }
        Ok(())
    }

    /// Dictionary size actually in use (shrunk for short inputs).
    pub fn dictionary_size(&self) -> u32 {
        self.dict_size as u32
    }

    /// Configured match length limit.
    pub fn match_len_limit(&self) -> usize {
        self.match_len_limit
    }

    /// Bytes of input represented before the current position.
    pub fn data_position(&self) -> u64 {
        self.partial_data_pos + self.pos as u64
    }

    /// True once every input byte has been read and passed.
    pub fn data_finished(&self) -> bool {
        self.at_stream_end && self.pos >= self.stream_pos
    }

    /// Bytes available at and after the current position.
    pub fn available_bytes(&self) -> usize {
        self.stream_pos - self.pos
    }

    /// Byte `back` positions behind the current position.
    #[inline(always)]
    pub fn byte_back(&self, back: usize) -> u8 {
        self.buffer[self.pos - back]
    }

    /// Window slice starting `back` positions behind the current position.
    #[inline(always)]
    pub fn suffix(&self, back: usize) -> &[u8] {
        &self.buffer[self.pos - back..self.stream_pos]
    }

    fn match_len_at(&self, here: usize, distance_plus1: usize, max_len: usize) -> usize {
        if distance_plus1 > here {
            return 0;
        }
        let limit = max_len.min(self.stream_pos - here);
        let mut len = 0;
        while len < limit && self.buffer[here + len - distance_plus1] == self.buffer[here + len] {
            len += 1;
        }
        len
    }

    /// Length of the match at distance `distance_plus1` for the position
    /// `back` places behind the current one, capped at `max_len`.
    pub fn true_match_len(&self, back: usize, distance_plus1: usize, max_len: usize) -> usize {
        self.match_len_at(self.pos - back, distance_plus1, max_len)
    }

    /// Like [`true_match_len`](Self::true_match_len) but for the position
    /// `fwd` places ahead of the current one.
    pub fn true_match_len_fwd(&self, fwd: usize, distance_plus1: usize, max_len: usize) -> usize {
        self.match_len_at(self.pos + fwd, distance_plus1, max_len)
    }

    /// Advance one position, sliding the window when needed.
    pub fn move_pos(&mut self) -> Result<()> {
        if self.cyclic_pos == self.dict_size {
            self.cyclic_pos = 0;
        } else {
            self.cyclic_pos += 1;
        }
        self.pos += 1;
        if self.pos >= self.pos_limit {
            self.normalize_pos()?;
        }
        Ok(())
    }

    /// Restart for a new member: the encoded window is discarded, unread
    /// look-ahead is kept, and the search tables are cleared.
    pub fn reset_member(&mut self) -> Result<()> {
        if self.stream_pos > self.pos {
            self.buffer.copy_within(self.pos..self.stream_pos, 0);
        }
        self.stream_pos -= self.pos;
        self.pos = 0;
        self.cyclic_pos = 0;
        self.partial_data_pos = 0;
        self.been_flushed = false;
        self.prev_positions.fill(0);
        self.pos_array.fill(0);
        self.read_block()
    }

    #[inline]
    fn keys(&self) -> (usize, usize, usize) {
        let p = self.pos;
        let tmp = Crc32::table_entry(self.buffer[p]) ^ self.buffer[p + 1] as u32;
        let key2 = (tmp & (NUM_PREV_POSITIONS2 as u32 - 1)) as usize;
        let tmp = tmp ^ ((self.buffer[p + 2] as u32) << 8);
        let key3 = NUM_PREV_POSITIONS2 + (tmp & (NUM_PREV_POSITIONS3 as u32 - 1)) as usize;
        let key4 = self.key4_offset
            + ((tmp ^ (Crc32::table_entry(self.buffer[p + 3]) << 5)) & self.key4_mask) as usize;
        (key2, key3, key4)
    }

    /// Search the BT4 tree at the current position. With `pairs` the
    /// matches found are appended with strictly increasing lengths; with
    /// `None` the position is only spliced into the tree. The caller must
    /// `move_pos` afterwards.
    pub fn get_match_pairs(&mut self, mut pairs: Option<&mut Vec<Pair>>) -> usize {
        debug_assert_eq!(self.mode, SearchMode::Tree);
        if let Some(out) = pairs.as_deref_mut() {
            out.clear();
        }
        let mut len_limit = self.match_len_limit;
        if len_limit > self.available_bytes() {
            self.been_flushed = true;
            len_limit = self.available_bytes();
            if len_limit < 4 {
                let node = self.cyclic_pos << 1;
                self.pos_array[node] = 0;
                self.pos_array[node + 1] = 0;
                return 0;
            }
        }

        let p = self.pos;
        let min_pos = self.pos.saturating_sub(self.dict_size) as i32;
        let pos1 = (self.pos + 1) as i32;
        let (key2, key3, key4) = self.keys();

        let mut num_pairs = 0usize;
        let mut maxlen = 0usize;
        let mut do_pairs = pairs.is_some();
        if let Some(out) = pairs.as_deref_mut() {
            let mut np2 = self.prev_positions[key2];
            let np3 = self.prev_positions[key3];
            if np2 > min_pos && self.buffer[np2 as usize - 1] == self.buffer[p] {
                out.push(Pair {
                    dis: (pos1 - 1 - np2) as u32,
                    len: 2,
                });
                maxlen = 2;
                num_pairs = 1;
            }
            if np2 != np3 && np3 > min_pos && self.buffer[np3 as usize - 1] == self.buffer[p] {
                out.push(Pair {
                    dis: (pos1 - 1 - np3) as u32,
                    len: 3,
                });
                maxlen = 3;
                num_pairs += 1;
                np2 = np3;
            }
            if num_pairs > 0 {
                let delta = (pos1 - np2) as usize;
                while maxlen < len_limit && self.buffer[p + maxlen - delta] == self.buffer[p + maxlen]
                {
                    maxlen += 1;
                }
                out.last_mut().expect("pair recorded").len = maxlen as u32;
                if maxlen >= len_limit {
                    // Long enough already; the tree walk below only updates.
                    do_pairs = false;
                }
            }
            if maxlen < 3 {
                maxlen = 3;
            }
        }

        self.prev_positions[key2] = pos1;
        self.prev_positions[key3] = pos1;
        let mut newpos1 = self.prev_positions[key4];
        self.prev_positions[key4] = pos1;

        let mut ptr0 = self.cyclic_pos << 1;
        let mut ptr1 = ptr0 + 1;
        let mut len0 = 0usize;
        let mut len1 = 0usize;
        let mut count = self.cycles;
        loop {
            if newpos1 <= min_pos || count == 0 {
                self.pos_array[ptr0] = 0;
                self.pos_array[ptr1] = 0;
                break;
            }
            count -= 1;

            let mut len = if self.been_flushed { 0 } else { len0.min(len1) };
            let delta = (pos1 - newpos1) as usize;
            let wrap = if self.cyclic_pos >= delta {
                0
            } else {
                self.dict_size + 1
            };
            let newptr = (self.cyclic_pos + wrap - delta) << 1;

            if self.buffer[p + len - delta] == self.buffer[p + len] {
                len += 1;
                while len < len_limit && self.buffer[p + len - delta] == self.buffer[p + len] {
                    len += 1;
                }
                if do_pairs && maxlen < len {
                    pairs.as_deref_mut().expect("pairs requested").push(Pair {
                        dis: (delta - 1) as u32,
                        len: len as u32,
                    });
                    maxlen = len;
                    num_pairs += 1;
                }
                if len >= len_limit {
                    self.pos_array[ptr0] = self.pos_array[newptr];
                    self.pos_array[ptr1] = self.pos_array[newptr + 1];
                    break;
                }
            }
            if self.buffer[p + len - delta] < self.buffer[p + len] {
                self.pos_array[ptr1] = newpos1;
                ptr1 = newptr + 1;
                newpos1 = self.pos_array[ptr1];
                len1 = len;
            } else {
                self.pos_array[ptr0] = newpos1;
                ptr0 = newptr;
                newpos1 = self.pos_array[ptr0];
                len0 = len;
            }
        }
        num_pairs
    }

    /// Greedy search at the current position through the hash-4 chain.
    /// Returns the best (0-based distance, length), inserting the position
    /// into the chain. The caller must `move_pos` afterwards.
    pub fn longest_match(&mut self) -> Option<(u32, usize)> {
        debug_assert_eq!(self.mode, SearchMode::Chain);
        let mut len_limit = self.match_len_limit;
        if len_limit > self.available_bytes() {
            self.been_flushed = true;
            len_limit = self.available_bytes();
            if len_limit < 4 {
                self.pos_array[self.cyclic_pos] = 0;
                return None;
            }
        }

        let p = self.pos;
        let min_pos = self.pos.saturating_sub(self.dict_size) as i32;
        let pos1 = (self.pos + 1) as i32;
        let (_, _, key4) = self.keys();
        let mut newpos1 = self.prev_positions[key4];
        self.prev_positions[key4] = pos1;
        self.pos_array[self.cyclic_pos] = newpos1;

        let mut best_len = 0usize;
        let mut best_dis = 0u32;
        let mut count = self.cycles;
        while newpos1 > min_pos && count > 0 {
            count -= 1;
            let delta = (pos1 - newpos1) as usize;
            if best_len < len_limit
                && self.buffer[p + best_len - delta] == self.buffer[p + best_len]
            {
                let mut len = 0usize;
                while len < len_limit && self.buffer[p + len - delta] == self.buffer[p + len] {
                    len += 1;
                }
                if len > best_len {
                    best_len = len;
                    best_dis = (delta - 1) as u32;
                    if len >= len_limit {
                        break;
                    }
                }
            }
            let wrap = if self.cyclic_pos >= delta {
                0
            } else {
                self.dict_size + 1
            };
            newpos1 = self.pos_array[self.cyclic_pos + wrap - delta];
        }
        if best_len >= crate::MIN_MATCH_LEN {
            Some((best_dis, best_len))
        } else {
            None
        }
    }

    /// Insert the current position into the hash chain without searching.
    /// The caller must `move_pos` afterwards.
    pub fn chain_update(&mut self) {
        debug_assert_eq!(self.mode, SearchMode::Chain);
        if self.available_bytes() < 4 {
            self.pos_array[self.cyclic_pos] = 0;
            return;
        }
        let pos1 = (self.pos + 1) as i32;
        let (_, _, key4) = self.keys();
        self.pos_array[self.cyclic_pos] = self.prev_positions[key4];
        self.prev_positions[key4] = pos1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bt4(data: &[u8], limit: usize) -> MatchFinder<Cursor<Vec<u8>>> {
        MatchFinder::new_bt4(Cursor::new(data.to_vec()), 1 << 16, limit).unwrap()
    }

    #[test]
    fn test_small_input_shrinks_dictionary() {
        let finder = bt4(b"abcabcabcabc", 36);
        assert_eq!(finder.dictionary_size(), MIN_DICT_SIZE);
        assert!(finder.at_stream_end);
        assert_eq!(finder.available_bytes(), 12);
    }

    #[test]
    fn test_finds_periodic_match() {
        let mut finder = bt4(b"abcabcabcabc", 36);
        let mut pairs = Vec::new();
        // Pass positions 0..2, then search at position 3.
        for _ in 0..3 {
            finder.get_match_pairs(None);
            finder.move_pos().unwrap();
        }
        let n = finder.get_match_pairs(Some(&mut pairs));
        assert_eq!(n, 1);
        assert_eq!(pairs[0], Pair { dis: 2, len: 9 });
    }

    #[test]
    fn test_pairs_strictly_increasing() {
        // Two earlier occurrences with different lengths.
        let data = b"abcd_abcx_____abcd".to_vec();
        let mut finder = bt4(&data, 36);
        let mut pairs = Vec::new();
        for _ in 0..14 {
            finder.get_match_pairs(None);
            finder.move_pos().unwrap();
        }
        finder.get_match_pairs(Some(&mut pairs));
        assert!(!pairs.is_empty());
        for w in pairs.windows(2) {
            assert!(w[1].len > w[0].len);
        }
        // The longest candidate is "abcd" at back distance 14 (0-based 13).
        let last = pairs.last().unwrap();
        assert_eq!(last.len, 4);
        assert_eq!(last.dis, 13);
    }

    #[test]
    fn test_true_match_len() {
        let mut finder = bt4(b"xyxyxyxy", 36);
        for _ in 0..2 {
            finder.get_match_pairs(None);
            finder.move_pos().unwrap();
        }
        // At position 2, distance 2 matches for the remaining 6 bytes.
        assert_eq!(finder.true_match_len(0, 2, MAX_MATCH_LEN), 6);
        // Distance larger than the data so far never matches.
        assert_eq!(finder.true_match_len(0, 5, MAX_MATCH_LEN), 0);
    }

    #[test]
    fn test_data_position_tracking() {
        let mut finder = bt4(b"0123456789", 36);
        assert_eq!(finder.data_position(), 0);
        assert!(!finder.data_finished());
        for _ in 0..10 {
            finder.get_match_pairs(None);
            finder.move_pos().unwrap();
        }
        assert_eq!(finder.data_position(), 10);
        assert!(finder.data_finished());
    }

    #[test]
    fn test_hash_chain_longest_match() {
        let data = b"the cat sat on the mat, the cat sat again".to_vec();
        let mut finder =
            MatchFinder::new_hash_chain(Cursor::new(data), MIN_DICT_SIZE, 16).unwrap();
        let mut best = None;
        for _ in 0..25 {
            best = finder.longest_match();
            finder.move_pos().unwrap();
        }
        // Position 24 starts the second "the cat sat", matching position 0.
        let (dis, len) = best.expect("match expected");
        assert_eq!(dis, 23);
        assert!(len >= 11);
    }

    #[test]
    fn test_reset_member_clears_history() {
        let mut finder = bt4(b"abcabcabcabc", 36);
        for _ in 0..6 {
            finder.get_match_pairs(None);
            finder.move_pos().unwrap();
        }
        finder.reset_member().unwrap();
        assert_eq!(finder.data_position(), 0);
        assert_eq!(finder.available_bytes(), 6);
        let mut pairs = Vec::new();
        assert_eq!(finder.get_match_pairs(Some(&mut pairs)), 0);
        assert!(pairs.is_empty());
    }
}
