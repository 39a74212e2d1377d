//! Optimal LZ encoder.
//!
//! [`EncoderBase`] couples the range encoder with the probability model,
//! the CRC of the data seen so far, the state machine, and the four
//! recent distances; both encoder variants drive it. [`LzEncoder`] adds
//! the BT4 match-finder, cached bit-prices, and a dynamic-programming
//! parser over a trellis of look-ahead positions: at each step it gathers
//! candidate matches plus the four rep matches, relaxes forward cells
//! with their bit-prices, and when the trellis is cut it backtracks the
//! cheapest path and emits it through the range coder.

use crate::match_finder::{MatchFinder, Pair};
use crate::model::{CoderModel, LengthModel, literal_state};
use crate::range_coder::RangeEncoder;
use crate::{
    DIS_ALIGN_BITS, DIS_ALIGN_SIZE, DIS_SLOT_BITS, DIS_SLOTS, END_DIS_MODEL, LEN_LOW_SYMBOLS,
    LEN_MID_SYMBOLS, LEN_STATES, MAX_LEN_SYMBOLS, MAX_MATCH_LEN, MIN_MATCH_LEN, MODELED_DISTANCES,
    NUM_TRIALS, POS_STATE_MASK, START_DIS_MODEL, State, dis_slot, len_state, price_bit,
    price_direct_bits, price_symbol, price_symbol_reversed, price0, price1,
};
use oxilz_core::crc::Crc32;
use oxilz_core::error::Result;
use std::io::{Read, Write};

const INFINITE_PRICE: u32 = 0x0FFF_FFFF;
const SINGLE_STEP: i32 = -2;
const DUAL_STEP: i32 = -1;

/// Rounds between refreshes of the cached distance and align prices.
const PRICE_REFRESH: i32 = 512;

/// Encode a match or rep length (2..273).
fn encode_len<W: Write>(
    renc: &mut RangeEncoder<W>,
    lm: &mut LengthModel,
    len: usize,
    pos_state: usize,
) -> Result<()> {
    let sym = len - MIN_MATCH_LEN;
    if sym < LEN_LOW_SYMBOLS {
        renc.encode_bit(&mut lm.choice1, 0)?;
        renc.encode_tree(&mut lm.low[pos_state], sym as u32, crate::LEN_LOW_BITS)?;
    } else if sym < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
        renc.encode_bit(&mut lm.choice1, 1)?;
        renc.encode_bit(&mut lm.choice2, 0)?;
        renc.encode_tree(
            &mut lm.mid[pos_state],
            (sym - LEN_LOW_SYMBOLS) as u32,
            crate::LEN_MID_BITS,
        )?;
    } else {
        renc.encode_bit(&mut lm.choice1, 1)?;
        renc.encode_bit(&mut lm.choice2, 1)?;
        renc.encode_tree(
            &mut lm.high,
            (sym - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS) as u32,
            crate::LEN_HIGH_BITS,
        )?;
    }
    Ok(())
}

fn price_matched(probs: &[u16; 0x300], byte: u8, match_byte: u8) -> u32 {
    let mut price = 0u32;
    let mut symbol = (byte as usize) | 0x100;
    let mut match_symbol = (match_byte as usize) << 1;
    let mut model = 1usize;
    loop {
        let match_bit = (match_symbol >> 8) & 1;
        match_symbol <<= 1;
        let bit = (symbol >> 7) & 1;
        symbol <<= 1;
        price += price_bit(probs[0x100 + (match_bit << 8) + model], bit as u32);
        model = (model << 1) | bit;
        if model >= 0x100 {
            break;
        }
        if bit != match_bit {
            while model < 0x100 {
                let bit = (symbol >> 7) & 1;
                symbol <<= 1;
                price += price_bit(probs[model], bit as u32);
                model = (model << 1) | bit;
            }
            break;
        }
    }
    price
}

fn price_symbol_reversed_dis(probs: &[u16], base: usize, mut symbol: u32, num_bits: u32) -> u32 {
    let mut price = 0u32;
    let mut model = 1usize;
    for _ in 0..num_bits {
        let bit = symbol & 1;
        symbol >>= 1;
        price += price_bit(probs[base + model - 1], bit);
        model = (model << 1) | bit as usize;
    }
    price
}

/// Range encoder plus probability model, CRC, state machine, and recent
/// distances. Shared by the optimal and fast encoders.
#[derive(Debug)]
pub struct EncoderBase<W: Write> {
    pub(crate) renc: RangeEncoder<W>,
    pub(crate) model: CoderModel,
    pub(crate) crc: Crc32,
    pub(crate) state: State,
    pub(crate) rep: [u32; 4],
}

impl<W: Write> EncoderBase<W> {
    pub(crate) fn new(sink: W) -> Self {
        Self {
            renc: RangeEncoder::new(sink),
            model: CoderModel::new(),
            crc: Crc32::new(),
            state: State::new(),
            rep: [0; 4],
        }
    }

    pub(crate) fn reset_member(&mut self) {
        self.renc.reset_member();
        self.model.reset();
        self.crc.reset();
        self.state = State::new();
        self.rep = [0; 4];
    }

    /// CRC-32 of the data encoded into the current member.
    pub fn crc(&self) -> u32 {
        self.crc.value()
    }

    /// Bytes produced for the current member, framing included.
    pub fn member_position(&self) -> u64 {
        self.renc.member_position()
    }

    /// Write raw framing bytes through the coder's output path.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.renc.write_raw(data)
    }

    /// Flush buffered output to the sink.
    pub fn flush_data(&mut self) -> Result<()> {
        self.renc.flush_data()
    }

    /// Swap the output sink (volume rotation), returning the old one.
    pub fn swap_sink(&mut self, new_sink: W) -> W {
        self.renc.swap_sink(new_sink)
    }

    pub(crate) fn emit_literal(
        &mut self,
        prev_byte: u8,
        byte: u8,
        match_byte: u8,
        ps: usize,
    ) -> Result<()> {
        let st = self.state.value();
        self.renc.encode_bit(&mut self.model.bm_match[st][ps], 0)?;
        let lits = &mut self.model.bm_literal[literal_state(prev_byte)];
        if self.state.is_literal() {
            self.renc.encode_tree(lits, byte as u32, 8)?;
        } else {
            self.renc.encode_matched(lits, byte, match_byte)?;
        }
        self.state.update_literal();
        Ok(())
    }

    pub(crate) fn emit_short_rep(&mut self, ps: usize) -> Result<()> {
        let st = self.state.value();
        self.renc.encode_bit(&mut self.model.bm_match[st][ps], 1)?;
        self.renc.encode_bit(&mut self.model.bm_rep[st], 1)?;
        self.renc.encode_bit(&mut self.model.bm_rep0[st], 0)?;
        self.renc.encode_bit(&mut self.model.bm_len[st][ps], 0)?;
        self.state.update_short_rep();
        Ok(())
    }

    pub(crate) fn emit_rep(&mut self, idx: usize, len: usize, ps: usize) -> Result<()> {
        let st = self.state.value();
        self.renc.encode_bit(&mut self.model.bm_match[st][ps], 1)?;
        self.renc.encode_bit(&mut self.model.bm_rep[st], 1)?;
        if idx == 0 {
            self.renc.encode_bit(&mut self.model.bm_rep0[st], 0)?;
            self.renc.encode_bit(&mut self.model.bm_len[st][ps], 1)?;
        } else {
            self.renc.encode_bit(&mut self.model.bm_rep0[st], 1)?;
            if idx == 1 {
                self.renc.encode_bit(&mut self.model.bm_rep1[st], 0)?;
            } else {
                self.renc.encode_bit(&mut self.model.bm_rep1[st], 1)?;
                self.renc
                    .encode_bit(&mut self.model.bm_rep2[st], (idx - 2) as u32)?;
            }
            let distance = self.rep[idx];
            for j in (1..=idx).rev() {
                self.rep[j] = self.rep[j - 1];
            }
            self.rep[0] = distance;
        }
        encode_len(&mut self.renc, &mut self.model.rep_len, len, ps)?;
        self.state.update_rep();
        Ok(())
    }

    pub(crate) fn emit_match(&mut self, dis: u32, len: usize, ps: usize) -> Result<()> {
        let st = self.state.value();
        self.renc.encode_bit(&mut self.model.bm_match[st][ps], 1)?;
        self.renc.encode_bit(&mut self.model.bm_rep[st], 0)?;
        encode_len(&mut self.renc, &mut self.model.match_len, len, ps)?;

        let slot = dis_slot(dis) as u32;
        self.renc.encode_tree(
            &mut self.model.bm_dis_slot[len_state(len)],
            slot,
            DIS_SLOT_BITS,
        )?;
        if slot >= START_DIS_MODEL as u32 {
            let direct_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << direct_bits;
            let reduced = dis - base;
            if slot < END_DIS_MODEL as u32 {
                self.renc.encode_tree_reversed_dis(
                    &mut self.model.bm_dis,
                    base as usize - slot as usize,
                    reduced,
                    direct_bits,
                )?;
            } else {
                self.renc
                    .encode_direct_bits(reduced >> DIS_ALIGN_BITS, direct_bits - DIS_ALIGN_BITS)?;
                self.renc.encode_tree_reversed(
                    &mut self.model.bm_align,
                    reduced & (DIS_ALIGN_SIZE as u32 - 1),
                    DIS_ALIGN_BITS,
                )?;
            }
        }
        self.rep[3] = self.rep[2];
        self.rep[2] = self.rep[1];
        self.rep[1] = self.rep[0];
        self.rep[0] = dis;
        self.state.update_match();
        Ok(())
    }

    /// Emit the end-of-stream marker and flush the range coder; the sink
    /// then sits exactly at the trailer offset.
    pub(crate) fn emit_eos(&mut self, ps: usize) -> Result<()> {
        self.emit_match(0xFFFF_FFFF, MIN_MATCH_LEN, ps)?;
        self.renc.flush()
    }
}

/// Cached prices of every length symbol, per position state.
#[derive(Debug)]
struct LengthPrices {
    prices: [[u32; MAX_LEN_SYMBOLS]; POS_STATE_MASK + 1],
    counters: [i32; POS_STATE_MASK + 1],
}

impl LengthPrices {
    fn new() -> Self {
        Self {
            prices: [[0; MAX_LEN_SYMBOLS]; POS_STATE_MASK + 1],
            counters: [0; POS_STATE_MASK + 1],
        }
    }

    fn reset(&mut self) {
        self.counters = [0; POS_STATE_MASK + 1];
    }

    fn refresh(&mut self, lm: &LengthModel, ps: usize) {
        let choice1_0 = price0(lm.choice1);
        let choice1_1 = price1(lm.choice1);
        let mid_base = choice1_1 + price0(lm.choice2);
        let high_base = choice1_1 + price1(lm.choice2);
        for i in 0..LEN_LOW_SYMBOLS {
            self.prices[ps][i] = choice1_0 + price_symbol(&lm.low[ps], i as u32, crate::LEN_LOW_BITS);
        }
        for i in 0..LEN_MID_SYMBOLS {
            self.prices[ps][LEN_LOW_SYMBOLS + i] =
                mid_base + price_symbol(&lm.mid[ps], i as u32, crate::LEN_MID_BITS);
        }
        for i in 0..crate::LEN_HIGH_SYMBOLS {
            self.prices[ps][LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + i] =
                high_base + price_symbol(&lm.high, i as u32, crate::LEN_HIGH_BITS);
        }
        self.counters[ps] = MAX_LEN_SYMBOLS as i32;
    }

    #[inline(always)]
    fn price(&self, len: usize, ps: usize) -> u32 {
        self.prices[ps][len - MIN_MATCH_LEN]
    }

    #[inline(always)]
    fn decrement(&mut self, ps: usize) {
        self.counters[ps] -= 1;
    }
}

/// One cell of the look-ahead trellis.
#[derive(Debug, Clone, Copy)]
struct Trial {
    /// Accumulated bit-price to reach this position.
    price: u32,
    /// Op entering this cell: -1 literal, 0..3 rep index, >= 4 distance+4.
    dis: i32,
    prev_index: i32,
    /// `SINGLE_STEP`, or `DUAL_STEP` for a literal-then-rep0 transition.
    prev_index2: i32,
    /// State at this position, resolved when the cell is visited.
    state: State,
    /// Recent distances entering this position.
    reps: [u32; 4],
}

impl Trial {
    const fn empty() -> Self {
        Self {
            price: INFINITE_PRICE,
            dis: 0,
            prev_index: 0,
            prev_index2: SINGLE_STEP,
            state: State::new(),
            reps: [0; 4],
        }
    }
}

/// Dynamic-programming optimal encoder (compression levels 1..9).
#[derive(Debug)]
pub struct LzEncoder<R: Read, W: Write> {
    base: EncoderBase<W>,
    finder: MatchFinder<R>,
    trials: Vec<Trial>,
    pairs: Vec<Pair>,
    /// Reconstructed (dis code, len) ops in emission order.
    ops: Vec<(i32, u32)>,
    pending_num_pairs: usize,
    match_len_prices: LengthPrices,
    rep_len_prices: LengthPrices,
    dis_slot_prices: [[u32; DIS_SLOTS]; LEN_STATES],
    dis_prices: [[u32; MODELED_DISTANCES]; LEN_STATES],
    align_prices: [u32; DIS_ALIGN_SIZE],
    price_counter: i32,
}

impl<R: Read, W: Write> LzEncoder<R, W> {
    /// Create an optimal encoder reading from `reader` and writing the
    /// coded stream to `sink`.
    pub fn new(reader: R, sink: W, dict_size: u32, match_len_limit: usize) -> Result<Self> {
        Ok(Self {
            base: EncoderBase::new(sink),
            finder: MatchFinder::new_bt4(reader, dict_size, match_len_limit)?,
            trials: vec![Trial::empty(); NUM_TRIALS],
            pairs: Vec::with_capacity(MAX_MATCH_LEN),
            ops: Vec::with_capacity(NUM_TRIALS),
            pending_num_pairs: 0,
            match_len_prices: LengthPrices::new(),
            rep_len_prices: LengthPrices::new(),
            dis_slot_prices: [[0; DIS_SLOTS]; LEN_STATES],
            dis_prices: [[0; MODELED_DISTANCES]; LEN_STATES],
            align_prices: [0; DIS_ALIGN_SIZE],
            price_counter: 0,
        })
    }

    /// Dictionary size in effect (may be smaller than requested for
    /// short inputs); this is what the member header must carry.
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
        self.finder.reset_member()?;
        self.pending_num_pairs = 0;
        self.match_len_prices.reset();
        self.rep_len_prices.reset();
        self.price_counter = 0;
        Ok(())
    }

    fn read_match_distances(&mut self) -> Result<usize> {
        let num_pairs = self.finder.get_match_pairs(Some(&mut self.pairs));
        if num_pairs > 0 {
            let limit = self.finder.match_len_limit();
            let last = self.pairs.last_mut().expect("pairs reported");
            if last.len as usize == limit && (last.len as usize) < MAX_MATCH_LEN {
                last.len =
                    self.finder
                        .true_match_len(0, last.dis as usize + 1, MAX_MATCH_LEN) as u32;
            }
        }
        Ok(num_pairs)
    }

    /// Advance `n` positions, keeping the tree updated for all but the
    /// last one (the next search indexes it).
    fn move_and_update(&mut self, mut n: usize) -> Result<()> {
        loop {
            self.finder.move_pos()?;
            n -= 1;
            if n == 0 {
                return Ok(());
            }
            self.finder.get_match_pairs(None);
        }
    }

    fn update_distance_prices(&mut self) {
        let model = &self.base.model;
        for ls in 0..LEN_STATES {
            for slot in 0..DIS_SLOTS {
                let mut price =
                    price_symbol(&model.bm_dis_slot[ls], slot as u32, DIS_SLOT_BITS);
                if slot >= END_DIS_MODEL {
                    price += price_direct_bits((slot as u32 >> 1) - 1 - DIS_ALIGN_BITS);
                }
                self.dis_slot_prices[ls][slot] = price;
            }
            for dis in 0..MODELED_DISTANCES {
                let slot = dis_slot(dis as u32) as usize;
                let mut price = self.dis_slot_prices[ls][slot];
                if slot >= START_DIS_MODEL {
                    let direct_bits = (slot as u32 >> 1) - 1;
                    let base = (2 | (slot as u32 & 1)) << direct_bits;
                    price += price_symbol_reversed_dis(
                        &model.bm_dis,
                        base as usize - slot,
                        dis as u32 - base,
                        direct_bits,
                    );
                }
                self.dis_prices[ls][dis] = price;
            }
        }
        for (i, price) in self.align_prices.iter_mut().enumerate() {
            *price = price_symbol_reversed(&model.bm_align, i as u32, DIS_ALIGN_BITS);
        }
    }

    fn refresh_prices(&mut self) {
        if self.price_counter <= 0 {
            self.price_counter = PRICE_REFRESH;
            self.update_distance_prices();
        }
        for ps in 0..=POS_STATE_MASK {
            if self.match_len_prices.counters[ps] <= 0 {
                self.match_len_prices.refresh(&self.base.model.match_len, ps);
            }
            if self.rep_len_prices.counters[ps] <= 0 {
                self.rep_len_prices.refresh(&self.base.model.rep_len, ps);
            }
        }
    }

    fn price_shortrep(&self, st: usize, ps: usize) -> u32 {
        price0(self.base.model.bm_rep0[st]) + price0(self.base.model.bm_len[st][ps])
    }

    /// Price of the rep-index selection bits plus the rep0-long bit.
    fn price_rep(&self, idx: usize, st: usize, ps: usize) -> u32 {
        let model = &self.base.model;
        if idx == 0 {
            price0(model.bm_rep0[st]) + price1(model.bm_len[st][ps])
        } else {
            let mut price = price1(model.bm_rep0[st]);
            if idx == 1 {
                price += price0(model.bm_rep1[st]);
            } else {
                price += price1(model.bm_rep1[st]);
                price += price_bit(model.bm_rep2[st], (idx - 2) as u32);
            }
            price
        }
    }

    fn price_pair(&self, dis: u32, len: usize, ps: usize) -> u32 {
        let ls = len_state(len);
        let dis_price = if (dis as usize) < MODELED_DISTANCES {
            self.dis_prices[ls][dis as usize]
        } else {
            self.dis_slot_prices[ls][dis_slot(dis) as usize]
                + self.align_prices[(dis & (DIS_ALIGN_SIZE as u32 - 1)) as usize]
        };
        self.match_len_prices.price(len, ps) + dis_price
    }

    fn price_literal(&self, state: State, prev: u8, byte: u8, match_byte: u8) -> u32 {
        let probs = &self.base.model.bm_literal[literal_state(prev)];
        if state.is_literal() {
            price_symbol(probs, byte as u32, 8)
        } else {
            price_matched(probs, byte, match_byte)
        }
    }

    /// State and rep tuple entering cell `cur`, derived from its
    /// predecessor and the op recorded on the cell.
    fn resolve_trial(&self, cur: usize) -> (State, [u32; 4]) {
        let t = &self.trials[cur];
        let prev = &self.trials[t.prev_index as usize];
        let mut state = prev.state;
        if t.prev_index2 == DUAL_STEP {
            state.update_literal();
            state.update_rep();
            return (state, prev.reps);
        }
        if t.dis == -1 {
            state.update_literal();
            return (state, prev.reps);
        }
        if t.dis < 4 {
            let idx = t.dis as usize;
            if idx == 0 && cur - t.prev_index as usize == 1 {
                state.update_short_rep();
            } else {
                state.update_rep();
            }
            let mut reps = prev.reps;
            let distance = reps[idx];
            for j in (1..=idx).rev() {
                reps[j] = reps[j - 1];
            }
            reps[0] = distance;
            return (state, reps);
        }
        state.update_match();
        (
            state,
            [t.dis as u32 - 4, prev.reps[0], prev.reps[1], prev.reps[2]],
        )
    }

    /// Reconstruct the cheapest emission sequence ending at `cur`.
    fn backward(&mut self, mut cur: usize) {
        self.ops.clear();
        while cur > 0 {
            let t = self.trials[cur];
            let prev = t.prev_index as usize;
            if t.prev_index2 == DUAL_STEP {
                self.ops.push((0, (cur - prev - 1) as u32));
                self.ops.push((-1, 1));
            } else {
                self.ops.push((t.dis, (cur - prev) as u32));
            }
            cur = prev;
        }
        self.ops.reverse();
    }

    /// Run the trellis at the current position and fill `self.ops` with
    /// the chosen emission sequence. Returns the number of input
    /// positions the ops cover; the window ends up exactly past them.
    fn sequence_optimizer(&mut self, reps: [u32; 4], state: State) -> Result<usize> {
        let match_len_limit = self.finder.match_len_limit();
        let num_pairs = if self.pending_num_pairs > 0 {
            let n = self.pending_num_pairs;
            self.pending_num_pairs = 0;
            n
        } else {
            self.read_match_distances()?
        };
        let main_len = if num_pairs > 0 {
            self.pairs[num_pairs - 1].len as usize
        } else {
            0
        };

        let mut replens = [0usize; 4];
        for (i, replen) in replens.iter_mut().enumerate() {
            *replen = self
                .finder
                .true_match_len(0, reps[i] as usize + 1, MAX_MATCH_LEN);
        }
        let mut rep_index = 0;
        for i in 1..replens.len() {
            if replens[i] > replens[rep_index] {
                rep_index = i;
            }
        }
        if replens[rep_index] >= match_len_limit {
            let len = replens[rep_index];
            self.ops.clear();
            self.ops.push((rep_index as i32, len as u32));
            self.move_and_update(len)?;
            return Ok(len);
        }
        if main_len >= match_len_limit {
            let len = main_len;
            let dis = self.pairs[num_pairs - 1].dis;
            self.ops.clear();
            self.ops.push((dis as i32 + 4, len as u32));
            self.move_and_update(len)?;
            return Ok(len);
        }

        let pos_state = (self.finder.data_position() as usize) & POS_STATE_MASK;
        let st = state.value();
        let cur_byte = self.finder.byte_back(0);
        let prev_byte = self.finder.byte_back(1);
        let match_byte = self.finder.byte_back(reps[0] as usize + 1);

        self.trials[0] = Trial {
            price: 0,
            dis: 0,
            prev_index: 0,
            prev_index2: SINGLE_STEP,
            state,
            reps,
        };
        let lit_price = price0(self.base.model.bm_match[st][pos_state])
            + self.price_literal(state, prev_byte, cur_byte, match_byte);
        self.trials[1] = Trial {
            price: lit_price,
            dis: -1,
            prev_index: 0,
            prev_index2: SINGLE_STEP,
            state,
            reps,
        };
        let match_price = price1(self.base.model.bm_match[st][pos_state]);
        let rep_match_price = match_price + price1(self.base.model.bm_rep[st]);
        if match_byte == cur_byte {
            let shortrep_price = rep_match_price + self.price_shortrep(st, pos_state);
            if shortrep_price < self.trials[1].price {
                self.trials[1].price = shortrep_price;
                self.trials[1].dis = 0;
            }
        }

        let mut num_trials = main_len.max(replens[rep_index]);
        if num_trials < MIN_MATCH_LEN {
            self.ops.clear();
            self.ops.push((self.trials[1].dis, 1));
            self.move_and_update(1)?;
            return Ok(1);
        }

        for cell in &mut self.trials[MIN_MATCH_LEN..=num_trials] {
            cell.price = INFINITE_PRICE;
        }

        for (i, &replen) in replens.iter().enumerate() {
            if replen < MIN_MATCH_LEN {
                continue;
            }
            let price_base = rep_match_price + self.price_rep(i, st, pos_state);
            for len in MIN_MATCH_LEN..=replen {
                let price = price_base + self.rep_len_prices.price(len, pos_state);
                if price < self.trials[len].price {
                    self.trials[len] = Trial {
                        price,
                        dis: i as i32,
                        prev_index: 0,
                        prev_index2: SINGLE_STEP,
                        state,
                        reps,
                    };
                }
            }
        }

        if main_len >= MIN_MATCH_LEN {
            let normal_match_price = match_price + price0(self.base.model.bm_rep[st]);
            let mut i = 0;
            for len in MIN_MATCH_LEN..=main_len {
                while (self.pairs[i].len as usize) < len {
                    i += 1;
                }
                let dis = self.pairs[i].dis;
                let price = normal_match_price + self.price_pair(dis, len, pos_state);
                if price < self.trials[len].price {
                    self.trials[len] = Trial {
                        price,
                        dis: dis as i32 + 4,
                        prev_index: 0,
                        prev_index2: SINGLE_STEP,
                        state,
                        reps,
                    };
                }
            }
        }

        let mut cur = 0usize;
        loop {
            self.finder.move_pos()?;
            cur += 1;
            if cur >= num_trials {
                self.backward(cur);
                return Ok(cur);
            }
            let num_pairs = self.read_match_distances()?;
            let newlen = if num_pairs > 0 {
                self.pairs[num_pairs - 1].len as usize
            } else {
                0
            };
            if newlen >= match_len_limit {
                self.pending_num_pairs = num_pairs;
                self.backward(cur);
                return Ok(cur);
            }

            let (cur_state, cur_reps) = self.resolve_trial(cur);
            self.trials[cur].state = cur_state;
            self.trials[cur].reps = cur_reps;

            let pos_state = (self.finder.data_position() as usize) & POS_STATE_MASK;
            let st = cur_state.value();
            let cur_price = self.trials[cur].price;
            let cur_byte = self.finder.byte_back(0);
            let prev_byte = self.finder.byte_back(1);
            let match_byte = self.finder.byte_back(cur_reps[0] as usize + 1);

            let lit_price = cur_price
                + price0(self.base.model.bm_match[st][pos_state])
                + self.price_literal(cur_state, prev_byte, cur_byte, match_byte);
            if lit_price < self.trials[cur + 1].price {
                self.trials[cur + 1] = Trial {
                    price: lit_price,
                    dis: -1,
                    prev_index: cur as i32,
                    prev_index2: SINGLE_STEP,
                    state: cur_state,
                    reps: cur_reps,
                };
            }

            let match_price = cur_price + price1(self.base.model.bm_match[st][pos_state]);
            let rep_match_price = match_price + price1(self.base.model.bm_rep[st]);
            if match_byte == cur_byte {
                let price = rep_match_price + self.price_shortrep(st, pos_state);
                if price < self.trials[cur + 1].price {
                    self.trials[cur + 1] = Trial {
                        price,
                        dis: 0,
                        prev_index: cur as i32,
                        prev_index2: SINGLE_STEP,
                        state: cur_state,
                        reps: cur_reps,
                    };
                }
            }

            let available = self
                .finder
                .available_bytes()
                .min(NUM_TRIALS - 1 - cur)
                .min(MAX_MATCH_LEN);
            if available < MIN_MATCH_LEN {
                continue;
            }

            // Two-stage extension: literal here, then rep0 where the
            // match byte realigns.
            if match_byte != cur_byte && available > MIN_MATCH_LEN {
                let len2 = self.finder.true_match_len_fwd(
                    1,
                    cur_reps[0] as usize + 1,
                    (available - 1).min(match_len_limit),
                );
                if len2 >= MIN_MATCH_LEN {
                    let mut state2 = cur_state;
                    state2.update_literal();
                    let st2 = state2.value();
                    let pos_state2 = (pos_state + 1) & POS_STATE_MASK;
                    let price = lit_price
                        + price1(self.base.model.bm_match[st2][pos_state2])
                        + price1(self.base.model.bm_rep[st2])
                        + self.price_rep(0, st2, pos_state2)
                        + self.rep_len_prices.price(len2, pos_state2);
                    let target = cur + 1 + len2;
                    while num_trials < target {
                        num_trials += 1;
                        self.trials[num_trials].price = INFINITE_PRICE;
                    }
                    if price < self.trials[target].price {
                        self.trials[target] = Trial {
                            price,
                            dis: 0,
                            prev_index: cur as i32,
                            prev_index2: DUAL_STEP,
                            state: cur_state,
                            reps: cur_reps,
                        };
                    }
                }
            }

            let mut start_len = MIN_MATCH_LEN;
            for (i, &rep_dis) in cur_reps.iter().enumerate() {
                let len = self
                    .finder
                    .true_match_len(0, rep_dis as usize + 1, available);
                if len < MIN_MATCH_LEN {
                    continue;
                }
                let price_base = rep_match_price + self.price_rep(i, st, pos_state);
                while num_trials < cur + len {
                    num_trials += 1;
                    self.trials[num_trials].price = INFINITE_PRICE;
                }
                for l in MIN_MATCH_LEN..=len {
                    let price = price_base + self.rep_len_prices.price(l, pos_state);
                    if price < self.trials[cur + l].price {
                        self.trials[cur + l] = Trial {
                            price,
                            dis: i as i32,
                            prev_index: cur as i32,
                            prev_index2: SINGLE_STEP,
                            state: cur_state,
                            reps: cur_reps,
                        };
                    }
                }
                if i == 0 {
                    start_len = len + 1;
                }
            }

            let newlen = newlen.min(available);
            if newlen >= start_len.max(MIN_MATCH_LEN) {
                let normal_match_price = match_price + price0(self.base.model.bm_rep[st]);
                while num_trials < cur + newlen {
                    num_trials += 1;
                    self.trials[num_trials].price = INFINITE_PRICE;
                }
                let mut i = 0;
                let start = start_len.max(MIN_MATCH_LEN);
                while (self.pairs[i].len as usize) < start {
                    i += 1;
                }
                for l in start..=newlen {
                    while (self.pairs[i].len as usize) < l {
                        i += 1;
                    }
                    let dis = self.pairs[i].dis;
                    let price = normal_match_price + self.price_pair(dis, l, pos_state);
                    if price < self.trials[cur + l].price {
                        self.trials[cur + l] = Trial {
                            price,
                            dis: dis as i32 + 4,
                            prev_index: cur as i32,
                            prev_index2: SINGLE_STEP,
                            state: cur_state,
                            reps: cur_reps,
                        };
                    }
                }
            }
        }
    }

    /// Encode input until end of data or until the member position
    /// reaches `size_limit`, then emit the end-of-stream marker and
    /// flush the coder. The framing layer writes header and trailer.
    pub fn encode_member(&mut self, size_limit: u64) -> Result<()> {
        if self.finder.data_position() == 0 && !self.finder.data_finished() {
            // The first byte has no context and no possible match.
            let byte = self.finder.byte_back(0);
            self.base.crc.update_byte(byte);
            self.base.emit_literal(0, byte, 0, 0)?;
            self.finder.get_match_pairs(None);
            self.finder.move_pos()?;
        }
        while !self.finder.data_finished() {
            self.refresh_prices();
            let reps = self.base.rep;
            let state = self.base.state;
            let ahead = self.sequence_optimizer(reps, state)?;
            debug_assert!(ahead > 0);

            self.base
                .crc
                .update(&self.finder.suffix(ahead)[..ahead]);
            let ops = std::mem::take(&mut self.ops);
            let mut remaining = ahead;
            for &(dis, len) in &ops {
                let len = len as usize;
                let ps =
                    ((self.finder.data_position() - remaining as u64) as usize) & POS_STATE_MASK;
                if dis == -1 {
                    let byte = self.finder.byte_back(remaining);
                    let prev = self.finder.byte_back(remaining + 1);
                    let mb = self
                        .finder
                        .byte_back(remaining + 1 + self.base.rep[0] as usize);
                    self.base.emit_literal(prev, byte, mb, ps)?;
                } else if dis < 4 {
                    if dis == 0 && len == 1 {
                        self.base.emit_short_rep(ps)?;
                    } else {
                        self.base.emit_rep(dis as usize, len, ps)?;
                        self.rep_len_prices.decrement(ps);
                    }
                } else {
                    self.base.emit_match(dis as u32 - 4, len, ps)?;
                    self.match_len_prices.decrement(ps);
                }
                remaining -= len;
            }
            debug_assert_eq!(remaining, 0);
            self.ops = ops;
            self.price_counter -= ahead as i32;

            if self.base.renc.member_position() >= size_limit {
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

    fn roundtrip(data: &[u8], dict_size: u32, match_len_limit: usize) {
        let mut enc = LzEncoder::new(
            Cursor::new(data.to_vec()),
            Vec::new(),
            dict_size,
            match_len_limit,
        )
        .unwrap();
        enc.encode_member(u64::MAX).unwrap();
        assert!(enc.data_finished());
        assert_eq!(enc.data_position(), data.len() as u64);
        let crc = enc.base().crc();
        enc.base_mut().flush_data().unwrap();
        let payload = enc.base_mut().swap_sink(Vec::new());

        let mut rdec = RangeDecoder::new(Cursor::new(payload));
        let mut dec = LzDecoder::new(Vec::new(), dict_size.max(crate::MIN_DICT_SIZE)).unwrap();
        dec.decode_member(&mut rdec).unwrap();
        assert_eq!(dec.data_position(), data.len() as u64);
        assert_eq!(dec.crc(), crc);
        assert_eq!(dec.into_sink(), data);
    }

    fn lcg_bytes(len: usize, mut seed: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            out.push((seed >> 24) as u8);
        }
        out
    }

    #[test]
    fn test_roundtrip_empty() {
        roundtrip(b"", 1 << 16, 36);
    }

    #[test]
    fn test_roundtrip_single_byte() {
        roundtrip(b"A", 1 << 16, 36);
    }

    #[test]
    fn test_roundtrip_short_text() {
        roundtrip(b"Hello, World! Hello, World! Hello.", 1 << 16, 36);
    }

    #[test]
    fn test_roundtrip_run() {
        roundtrip(&vec![b'A'; 10_000], 1 << 16, 36);
        roundtrip(&vec![0u8; 5_000], 1 << 16, 273);
    }

    #[test]
    fn test_roundtrip_repetitive_text() {
        let mut data = Vec::new();
        for i in 0..400 {
            data.extend_from_slice(b"the quick brown fox jumps over the lazy dog ");
            data.extend_from_slice(format!("{i} ").as_bytes());
        }
        roundtrip(&data, 1 << 16, 36);
        roundtrip(&data, 1 << 20, 273);
    }

    #[test]
    fn test_roundtrip_pseudorandom() {
        roundtrip(&lcg_bytes(20_000, 0xC0FFEE), 1 << 16, 36);
    }

    #[test]
    fn test_roundtrip_mixed_periods() {
        // Short periods exercise reps; the tail exercises literals.
        let mut data = b"abcabcabcabcabc".repeat(50);
        data.extend(lcg_bytes(3000, 42));
        data.extend(b"abcabcabc".repeat(100));
        roundtrip(&data, 1 << 16, 16);
        roundtrip(&data, 1 << 16, 273);
    }

    #[test]
    fn test_roundtrip_small_match_len_limit() {
        let data = b"aaaaabbbbbaaaaabbbbbaaaaabbbbb".repeat(20);
        roundtrip(&data, 1 << 16, crate::MIN_MATCH_LEN_LIMIT);
    }

    #[test]
    fn test_compresses_redundancy() {
        let data = vec![b'x'; 100_000];
        let mut enc =
            LzEncoder::new(Cursor::new(data), Vec::new(), 1 << 16, 273).unwrap();
        enc.encode_member(u64::MAX).unwrap();
        let out_len = enc.base().member_position();
        assert!(out_len < 2_000, "compressed to {out_len} bytes");
    }
}
