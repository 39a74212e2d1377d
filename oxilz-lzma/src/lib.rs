//! # oxilz LZMA
//!
//! The LZMA codec used by the lzip stream format.
//!
//! Lzip wraps a simplified LZMA: the literal/position parameters are fixed
//! (lc=3, lp=0, pb=2), there is no properties byte, and every member ends
//! with an explicit end-of-stream marker. This crate implements the codec
//! core:
//!
//! - [`range_coder`]: renormalizing binary arithmetic coder
//! - [`model`]: the adaptive probability contexts
//! - [`match_finder`]: sliding window with BT4 tree and hash-chain search
//! - [`encoder`]: dynamic-programming optimal encoder
//! - [`fast_encoder`]: greedy hash-chain encoder for level 0
//! - [`decoder`]: streaming dictionary-backed decoder
//!
//! The lzip container (header, trailer, member loop) lives in
//! `oxilz-stream`; this crate only produces and consumes the range-coded
//! payload between them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod encoder;
pub mod fast_encoder;
pub mod match_finder;
pub mod model;
pub mod range_coder;

// Re-exports
pub use decoder::LzDecoder;
pub use encoder::{EncoderBase, LzEncoder};
pub use fast_encoder::FastEncoder;
pub use match_finder::MatchFinder;
pub use model::{CoderModel, LengthModel, State};
pub use range_coder::{RangeDecoder, RangeEncoder};

/// Number of bits in a probability value.
pub const BIT_MODEL_TOTAL_BITS: u32 = 11;
/// Probability denominator (2048).
pub const BIT_MODEL_TOTAL: u32 = 1 << BIT_MODEL_TOTAL_BITS;
/// Shift used by the adaptive probability update.
pub const MOVE_BITS: u32 = 5;
/// Initial probability (equal odds).
pub const PROB_INIT: u16 = (BIT_MODEL_TOTAL / 2) as u16;

/// Number of states in the LZMA state machine.
pub const NUM_STATES: usize = 12;
/// Maximum number of position states the context arrays are sized for.
pub const POS_STATES_MAX: usize = 16;
/// Lzip fixes two position bits, so only the low four position states are
/// ever indexed.
pub const POS_STATE_MASK: usize = 3;
/// High bits of the previous byte select the literal context (lc = 3).
pub const LITERAL_CONTEXT_BITS: u32 = 3;
/// Number of literal contexts.
pub const LITERAL_STATES: usize = 1 << LITERAL_CONTEXT_BITS;

/// Minimum match length.
pub const MIN_MATCH_LEN: usize = 2;
/// Maximum match length.
pub const MAX_MATCH_LEN: usize = 273;
/// Smallest selectable match length limit.
pub const MIN_MATCH_LEN_LIMIT: usize = 5;
/// Number of look-ahead cells in the optimal encoder's trellis.
pub const NUM_TRIALS: usize = MAX_MATCH_LEN + 1;

/// Bits of the low length tier.
pub const LEN_LOW_BITS: u32 = 3;
/// Bits of the mid length tier.
pub const LEN_MID_BITS: u32 = 3;
/// Bits of the high length tier.
pub const LEN_HIGH_BITS: u32 = 8;
/// Symbols in the low length tier.
pub const LEN_LOW_SYMBOLS: usize = 1 << LEN_LOW_BITS;
/// Symbols in the mid length tier.
pub const LEN_MID_SYMBOLS: usize = 1 << LEN_MID_BITS;
/// Symbols in the high length tier.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;
/// Total number of length symbols.
pub const MAX_LEN_SYMBOLS: usize = LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + LEN_HIGH_SYMBOLS;

/// Number of length states used to sub-index distance contexts.
pub const LEN_STATES: usize = 4;
/// Bits of a distance slot code.
pub const DIS_SLOT_BITS: u32 = 6;
/// Number of distance slots.
pub const DIS_SLOTS: usize = 1 << DIS_SLOT_BITS;
/// First slot whose low bits are coded at all.
pub const START_DIS_MODEL: usize = 4;
/// First slot whose low bits are coded as direct bits plus align bits.
pub const END_DIS_MODEL: usize = 14;
/// Distances below this are fully covered by adaptive predictors.
pub const MODELED_DISTANCES: usize = 1 << (END_DIS_MODEL / 2);
/// Bits of the align reverse tree.
pub const DIS_ALIGN_BITS: u32 = 4;
/// Size of the align reverse tree.
pub const DIS_ALIGN_SIZE: usize = 1 << DIS_ALIGN_BITS;

/// Smallest valid dictionary size (4 KiB).
pub const MIN_DICT_SIZE: u32 = 1 << MIN_DICT_BITS;
/// Largest valid dictionary size (512 MiB).
pub const MAX_DICT_SIZE: u32 = 1 << MAX_DICT_BITS;
/// Smallest dictionary size exponent.
pub const MIN_DICT_BITS: u32 = 12;
/// Largest dictionary size exponent.
pub const MAX_DICT_BITS: u32 = 29;

/// Bit prices are fixed point with this many fractional bits, so one
/// whole bit costs 64 price units.
pub const PRICE_SHIFT_BITS: u32 = 6;
const PRICE_STEP_BITS: u32 = 2;

/// Length state used to sub-index distance-slot contexts.
#[inline(always)]
pub fn len_state(len: usize) -> usize {
    (len - MIN_MATCH_LEN).min(LEN_STATES - 1)
}

const fn slot_of(dis: u32) -> u8 {
    if dis < START_DIS_MODEL as u32 {
        dis as u8
    } else {
        let bits = 31 - dis.leading_zeros();
        ((bits << 1) | ((dis >> (bits - 1)) & 1)) as u8
    }
}

/// Slot codes for all distances below 1024, computed at build time.
const DIS_SLOT_TABLE: [u8; 1 << 10] = {
    let mut table = [0u8; 1 << 10];
    let mut dis = 0u32;
    while dis < 1 << 10 {
        table[dis as usize] = slot_of(dis);
        dis += 1;
    }
    table
};

/// Map a distance (0-based) to its slot code (0..63).
#[inline(always)]
pub fn dis_slot(dis: u32) -> u8 {
    if dis < 1 << 10 {
        DIS_SLOT_TABLE[dis as usize]
    } else {
        slot_of(dis)
    }
}

/// Bit prices indexed by quantized probability, computed at build time.
/// Entry k holds round(-log2(p / 2048) << PRICE_SHIFT_BITS) for
/// p = 4k + 2, via the usual squaring log computation.
const PROB_PRICES: [u32; (BIT_MODEL_TOTAL >> PRICE_STEP_BITS) as usize] = {
    let mut prices = [0u32; (BIT_MODEL_TOTAL >> PRICE_STEP_BITS) as usize];
    let mut i = 0usize;
    while i < prices.len() {
        let mut w = ((i as u64) << PRICE_STEP_BITS) + (1 << (PRICE_STEP_BITS - 1));
        let mut bit_count = 0u32;
        let mut j = 0;
        while j < PRICE_SHIFT_BITS {
            w = w * w;
            bit_count <<= 1;
            while w >= 1 << 16 {
                w >>= 1;
                bit_count += 1;
            }
            j += 1;
        }
        prices[i] = (BIT_MODEL_TOTAL_BITS << PRICE_SHIFT_BITS) - 15 - bit_count;
        i += 1;
    }
    prices
};

/// Price of coding `bit` under probability `prob`.
#[inline(always)]
pub fn price_bit(prob: u16, bit: u32) -> u32 {
    let p = if bit == 0 {
        prob as u32
    } else {
        BIT_MODEL_TOTAL - prob as u32
    };
    PROB_PRICES[(p >> PRICE_STEP_BITS) as usize]
}

/// Price of coding a zero bit under probability `prob`.
#[inline(always)]
pub fn price0(prob: u16) -> u32 {
    PROB_PRICES[(prob as usize) >> PRICE_STEP_BITS as usize]
}

/// Price of coding a one bit under probability `prob`.
#[inline(always)]
pub fn price1(prob: u16) -> u32 {
    PROB_PRICES[((BIT_MODEL_TOTAL - prob as u32) >> PRICE_STEP_BITS) as usize]
}

/// Price of `count` equiprobable direct bits.
#[inline(always)]
pub fn price_direct_bits(count: u32) -> u32 {
    count << PRICE_SHIFT_BITS
}

/// Price of a bit-tree symbol.
pub fn price_symbol(probs: &[u16], symbol: u32, num_bits: u32) -> u32 {
    let mut price = 0u32;
    let mut model = 1usize;
    for i in (0..num_bits).rev() {
        let bit = (symbol >> i) & 1;
        price += price_bit(probs[model], bit);
        model = (model << 1) | bit as usize;
    }
    price
}

/// Price of a reverse bit-tree symbol.
pub fn price_symbol_reversed(probs: &[u16], mut symbol: u32, num_bits: u32) -> u32 {
    let mut price = 0u32;
    let mut model = 1usize;
    for _ in 0..num_bits {
        let bit = symbol & 1;
        symbol >>= 1;
        price += price_bit(probs[model], bit);
        model = (model << 1) | bit as usize;
    }
    price
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dis_slot_small() {
        assert_eq!(dis_slot(0), 0);
        assert_eq!(dis_slot(1), 1);
        assert_eq!(dis_slot(2), 2);
        assert_eq!(dis_slot(3), 3);
        assert_eq!(dis_slot(4), 4);
        assert_eq!(dis_slot(5), 4);
        assert_eq!(dis_slot(6), 5);
        assert_eq!(dis_slot(7), 5);
        assert_eq!(dis_slot(8), 6);
    }

    #[test]
    fn test_dis_slot_large() {
        // Slot n (n >= 4) covers [(2 | n&1) << (n/2 - 1), ...) distances
        assert_eq!(dis_slot(127), 13);
        assert_eq!(dis_slot(128), 14);
        assert_eq!(dis_slot(0xFFFFFFFF), 63);
        // Table and formula agree at the table boundary
        assert_eq!(dis_slot(1023), slot_of(1023));
        assert_eq!(dis_slot(1024), slot_of(1024));
    }

    #[test]
    fn test_slot_base_roundtrip() {
        // Reconstructing the base distance from the slot must not exceed
        // the distance itself.
        for dis in [4u32, 100, 1000, 100_000, 1 << 28] {
            let slot = dis_slot(dis) as u32;
            let direct_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << direct_bits;
            assert!(base <= dis);
            assert!(dis - base < (1 << direct_bits));
        }
    }

    #[test]
    fn test_price_of_even_odds() {
        // Coding one bit at probability 1/2 costs about one bit.
        let price = price_bit(PROB_INIT, 0);
        assert!((60..=68).contains(&price), "price = {price}");
        assert_eq!(price_bit(PROB_INIT, 0), price_bit(PROB_INIT, 1));
    }

    #[test]
    fn test_price_monotonic() {
        // A likelier bit must never cost more.
        let mut last = u32::MAX;
        for p in (64u16..2048).step_by(64) {
            let price = price_bit(p, 0);
            assert!(price <= last);
            last = price;
        }
    }

    #[test]
    fn test_direct_bits_price() {
        assert_eq!(price_direct_bits(8), 8 << PRICE_SHIFT_BITS);
    }

    #[test]
    fn test_len_state() {
        assert_eq!(len_state(2), 0);
        assert_eq!(len_state(3), 1);
        assert_eq!(len_state(4), 2);
        assert_eq!(len_state(5), 3);
        assert_eq!(len_state(273), 3);
    }
}
