//! Adaptive probability contexts for the lzip flavour of LZMA.
//!
//! Every coding decision is a binary choice under an 11-bit probability,
//! stored as a plain `u16` and updated by the range coder on each coded
//! bit. Lzip fixes the literal/position parameters (lc=3, lp=0, pb=2), so
//! all context arrays have compile-time shapes.

use crate::{
    DIS_ALIGN_SIZE, DIS_SLOTS, END_DIS_MODEL, LEN_HIGH_SYMBOLS, LEN_LOW_SYMBOLS, LEN_MID_SYMBOLS,
    LEN_STATES, LITERAL_STATES, MODELED_DISTANCES, NUM_STATES, POS_STATES_MAX, PROB_INIT,
};

/// Predictors for the mid-range distance reverse trees, shared between
/// slots 4..13.
pub const DIS_MODEL_SIZE: usize = MODELED_DISTANCES - END_DIS_MODEL;

/// LZMA state machine value (0..11), tracking the classes of the last few
/// coded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get the state value for context indexing.
    #[inline(always)]
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// True when the last event was a literal (states 0..6); literals in
    /// these states are coded without the match byte.
    #[inline(always)]
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// Update after a literal.
    pub fn update_literal(&mut self) {
        self.0 = match self.0 {
            0..=3 => 0,
            4..=9 => self.0 - 3,
            _ => self.0 - 6,
        };
    }

    /// Update after a match.
    pub fn update_match(&mut self) {
        self.0 = if self.0 < 7 { 7 } else { 10 };
    }

    /// Update after a rep match of length >= 2.
    pub fn update_rep(&mut self) {
        self.0 = if self.0 < 7 { 8 } else { 11 };
    }

    /// Update after a short rep (rep0 of length 1).
    pub fn update_short_rep(&mut self) {
        self.0 = if self.0 < 7 { 9 } else { 11 };
    }
}

/// Three-tier length model: a two-bit selector plus per-position-state
/// low/mid trees and a shared high tree.
#[derive(Debug, Clone)]
pub struct LengthModel {
    /// Selector: low tier vs mid+high.
    pub choice1: u16,
    /// Selector: mid tier vs high.
    pub choice2: u16,
    /// 3-bit trees for lengths 2..9, per position state.
    pub low: [[u16; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
    /// 3-bit trees for lengths 10..17, per position state.
    pub mid: [[u16; LEN_MID_SYMBOLS]; POS_STATES_MAX],
    /// 8-bit tree for lengths 18..273, shared across position states.
    pub high: [u16; LEN_HIGH_SYMBOLS],
}

impl LengthModel {
    /// Create a fresh length model.
    pub fn new() -> Self {
        Self {
            choice1: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
            mid: [[PROB_INIT; LEN_MID_SYMBOLS]; POS_STATES_MAX],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
        }
    }

    /// Reset all probabilities.
    pub fn reset(&mut self) {
        self.choice1 = PROB_INIT;
        self.choice2 = PROB_INIT;
        for tree in &mut self.low {
            tree.fill(PROB_INIT);
        }
        for tree in &mut self.mid {
            tree.fill(PROB_INIT);
        }
        self.high.fill(PROB_INIT);
    }
}

impl Default for LengthModel {
    fn default() -> Self {
        Self::new()
    }
}

/// The full set of probability contexts for one member.
#[derive(Debug, Clone)]
pub struct CoderModel {
    /// Literal-vs-match decision, per state and position state.
    pub bm_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Match-vs-rep decision, per state.
    pub bm_rep: [u16; NUM_STATES],
    /// Rep0 vs other reps.
    pub bm_rep0: [u16; NUM_STATES],
    /// Rep1 vs rep2/rep3.
    pub bm_rep1: [u16; NUM_STATES],
    /// Rep2 vs rep3.
    pub bm_rep2: [u16; NUM_STATES],
    /// Short-rep vs long rep0, per state and position state.
    pub bm_len: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Distance slot trees, per length state.
    pub bm_dis_slot: [[u16; DIS_SLOTS]; LEN_STATES],
    /// Shared reverse-tree predictors for mid-range distances.
    pub bm_dis: [u16; DIS_MODEL_SIZE],
    /// Reverse tree for the low 4 bits of large distances.
    pub bm_align: [u16; DIS_ALIGN_SIZE],
    /// Literal trees, selected by the high bits of the previous byte.
    pub bm_literal: [[u16; 0x300]; LITERAL_STATES],
    /// Length model for matches.
    pub match_len: LengthModel,
    /// Length model for rep matches.
    pub rep_len: LengthModel,
}

impl CoderModel {
    /// Create a fresh model with all predictors at equal odds.
    pub fn new() -> Self {
        Self {
            bm_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            bm_rep: [PROB_INIT; NUM_STATES],
            bm_rep0: [PROB_INIT; NUM_STATES],
            bm_rep1: [PROB_INIT; NUM_STATES],
            bm_rep2: [PROB_INIT; NUM_STATES],
            bm_len: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            bm_dis_slot: [[PROB_INIT; DIS_SLOTS]; LEN_STATES],
            bm_dis: [PROB_INIT; DIS_MODEL_SIZE],
            bm_align: [PROB_INIT; DIS_ALIGN_SIZE],
            bm_literal: [[PROB_INIT; 0x300]; LITERAL_STATES],
            match_len: LengthModel::new(),
            rep_len: LengthModel::new(),
        }
    }

    /// Reset every predictor to its initial value.
    pub fn reset(&mut self) {
        for row in &mut self.bm_match {
            row.fill(PROB_INIT);
        }
        self.bm_rep.fill(PROB_INIT);
        self.bm_rep0.fill(PROB_INIT);
        self.bm_rep1.fill(PROB_INIT);
        self.bm_rep2.fill(PROB_INIT);
        for row in &mut self.bm_len {
            row.fill(PROB_INIT);
        }
        for tree in &mut self.bm_dis_slot {
            tree.fill(PROB_INIT);
        }
        self.bm_dis.fill(PROB_INIT);
        self.bm_align.fill(PROB_INIT);
        for tree in &mut self.bm_literal {
            tree.fill(PROB_INIT);
        }
        self.match_len.reset();
        self.rep_len.reset();
    }
}

impl Default for CoderModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Literal context index for the byte preceding the current position.
#[inline(always)]
pub fn literal_state(prev_byte: u8) -> usize {
    (prev_byte >> (8 - crate::LITERAL_CONTEXT_BITS)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = State::new();
        assert!(state.is_literal());

        state.update_match();
        assert_eq!(state.value(), 7);
        assert!(!state.is_literal());

        state.update_literal();
        assert_eq!(state.value(), 4);
        state.update_literal();
        assert_eq!(state.value(), 1);
        state.update_literal();
        assert_eq!(state.value(), 0);
    }

    #[test]
    fn test_state_rep_transitions() {
        let mut state = State::new();
        state.update_rep();
        assert_eq!(state.value(), 8);
        state.update_short_rep();
        assert_eq!(state.value(), 11);
        state.update_literal();
        assert_eq!(state.value(), 5);

        let mut state = State::new();
        state.update_short_rep();
        assert_eq!(state.value(), 9);
        state.update_literal();
        assert_eq!(state.value(), 6);
    }

    #[test]
    fn test_literal_state() {
        assert_eq!(literal_state(0x00), 0);
        assert_eq!(literal_state(0x1F), 0);
        assert_eq!(literal_state(0x20), 1);
        assert_eq!(literal_state(0xFF), 7);
    }

    #[test]
    fn test_dis_model_size() {
        // Slots 4..13 contribute (1 << (slot/2 - 1)) - 1 predictors each.
        let mut total = 0usize;
        for slot in 4..END_DIS_MODEL {
            total += (1 << (slot / 2 - 1)) - 1;
        }
        assert_eq!(total, DIS_MODEL_SIZE);
    }

    #[test]
    fn test_model_reset() {
        let mut model = CoderModel::new();
        model.bm_match[3][1] = 7;
        model.match_len.high[100] = 9;
        model.reset();
        assert_eq!(model.bm_match[3][1], PROB_INIT);
        assert_eq!(model.match_len.high[100], PROB_INIT);
    }
}
