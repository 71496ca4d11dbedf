/*!
Boyer-Moore style lookahead for unanchored searches.

For the first few positions of a potential match this collects, per
position, the set of code units (folded into 128 buckets) that could occur
there, plus summary bits for membership in `\s`, `\w`, `\d` and the
surrogate range. From that it derives either a single-character search loop
or a boolean skip table: if the character a few positions ahead cannot
occur there in any match, no match starts in the skipped range and the scan
strides forward by several code units at once.

The choice of interval to key the skip on weighs expected skip distance
against the probability of actually skipping, estimated from a character
frequency sample of the subject.
*/

use std::rc::Rc;

use crate::codegen::{MacroAssembler, TABLE_MASK, TABLE_SIZE};
use crate::compiler::Compiler;
use crate::nodes::{Action, AssertionNodeKind, ChoiceKind, NodeId, NodeVariant, TextElem};
use crate::ranges::{
    case_independent_letters, BoolTable, CharacterRange, DIGIT_RANGES, SPACE_RANGES,
    SURROGATE_RANGES, WORD_RANGES,
};
use crate::{MAX_ONE_BYTE_CHAR, MAX_UTF16_CODE_UNIT};

/// Character frequencies sampled from the subject, per 128-bucket.
pub(crate) struct FrequencyCollator {
    frequencies: [u32; TABLE_SIZE],
    total_samples: u32,
}

impl FrequencyCollator {
    pub fn new() -> Self {
        Self { frequencies: [0; TABLE_SIZE], total_samples: 0 }
    }

    pub fn count_character(&mut self, c: u32) {
        self.frequencies[(c & TABLE_MASK) as usize] += 1;
        self.total_samples += 1;
    }

    /// Measured per-128 rather than in percent, to match the table size.
    pub fn frequency(&self, bucket: usize) -> i32 {
        if self.total_samples < 1 {
            return 1;
        }
        ((self.frequencies[bucket] * 128) / self.total_samples) as i32
    }
}

/// Containment of a position's character set in a predicate set, as a
/// small lattice: the bottom is "no characters seen yet", the top is
/// "some in, some out".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lattice(u8);

impl Lattice {
    pub const NOT_YET: Lattice = Lattice(0);
    pub const IN: Lattice = Lattice(1);
    pub const OUT: Lattice = Lattice(2);
    pub const UNKNOWN: Lattice = Lattice(3);

    fn combine(self, other: Lattice) -> Lattice {
        Lattice(self.0 | other.0)
    }

    /// Folds `interval` into the containment value for `set`.
    fn add_range(self, set: &[CharacterRange], interval: (u32, u32)) -> Lattice {
        if self == Lattice::UNKNOWN {
            return self;
        }
        let (from, to) = interval;
        for range in set {
            if range.from <= from && to <= range.to {
                return self.combine(Lattice::IN);
            }
            if to < range.from {
                break;
            }
            if from <= range.to {
                // Overlaps the boundary.
                return Lattice::UNKNOWN;
            }
        }
        self.combine(Lattice::OUT)
    }
}

/// The possible characters at one lookahead position.
pub(crate) struct PositionInfo {
    map: BoolTable,
    map_count: usize,
    w: Lattice,
    s: Lattice,
    d: Lattice,
    surrogate: Lattice,
}

impl PositionInfo {
    fn new() -> Self {
        Self {
            map: BoolTable::ZERO,
            map_count: 0,
            w: Lattice::NOT_YET,
            s: Lattice::NOT_YET,
            d: Lattice::NOT_YET,
            surrogate: Lattice::NOT_YET,
        }
    }

    pub fn at(&self, bucket: usize) -> bool {
        self.map[bucket]
    }

    pub fn map_count(&self) -> usize {
        self.map_count
    }

    pub fn is_word(&self) -> bool {
        self.w == Lattice::IN
    }

    pub fn is_non_word(&self) -> bool {
        self.w == Lattice::OUT
    }

    pub fn is_surrogate(&self) -> bool {
        self.surrogate == Lattice::IN
    }

    fn set_interval(&mut self, from: u32, to: u32) {
        self.s = self.s.add_range(SPACE_RANGES, (from, to));
        self.w = self.w.add_range(WORD_RANGES, (from, to));
        self.d = self.d.add_range(DIGIT_RANGES, (from, to));
        self.surrogate = self.surrogate.add_range(SURROGATE_RANGES, (from, to));
        if to - from >= TABLE_SIZE as u32 - 1 {
            if self.map_count != TABLE_SIZE {
                self.map_count = TABLE_SIZE;
                self.map.fill(true);
            }
            return;
        }
        for c in from..=to {
            let bucket = (c & TABLE_MASK) as usize;
            if !self.map[bucket] {
                self.map_count += 1;
                self.map.set(bucket, true);
            }
            if self.map_count == TABLE_SIZE {
                return;
            }
        }
    }

    fn set_all(&mut self) {
        self.s = Lattice::UNKNOWN;
        self.w = Lattice::UNKNOWN;
        self.d = Lattice::UNKNOWN;
        if self.map_count != TABLE_SIZE {
            self.map_count = TABLE_SIZE;
            self.map.fill(true);
        }
    }
}

pub(crate) struct BoyerMooreLookahead {
    length: usize,
    max_char: u32,
    bitmaps: Vec<PositionInfo>,
}

impl BoyerMooreLookahead {
    pub fn new(length: usize, one_byte: bool) -> Self {
        let max_char = if one_byte { MAX_ONE_BYTE_CHAR } else { MAX_UTF16_CODE_UNIT };
        Self {
            length,
            max_char,
            bitmaps: (0..length).map(|_| PositionInfo::new()).collect(),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_char(&self) -> u32 {
        self.max_char
    }

    pub fn at(&self, offset: usize) -> &PositionInfo {
        &self.bitmaps[offset]
    }

    fn count(&self, offset: usize) -> usize {
        self.bitmaps[offset].map_count()
    }

    pub fn set(&mut self, offset: usize, character: u32) {
        self.bitmaps[offset].set_interval(character, character);
    }

    pub fn set_interval(&mut self, offset: usize, from: u32, to: u32) {
        self.bitmaps[offset].set_interval(from, to);
    }

    pub fn set_all(&mut self, offset: usize) {
        self.bitmaps[offset].set_all();
    }

    /// Gives up on all positions from `from` on.
    pub fn set_rest(&mut self, from: usize) {
        for offset in from..self.length {
            self.set_all(offset);
        }
    }

    /// Finds the lookahead interval with the best product of width and
    /// skip probability. Since two parameters are optimized at once this
    /// is a tradeoff.
    fn find_worthwhile_interval(&self, collator: &FrequencyCollator) -> Option<(usize, usize)> {
        let mut best = None;
        let mut biggest_points = 0;
        // If more than 32 characters out of 128 can occur it is unlikely
        // that stepping forwards will pay off much of the time.
        const MAX_MAX: usize = 32;
        let mut max_number_of_chars = 4;
        while max_number_of_chars < MAX_MAX {
            biggest_points =
                self.find_best_interval(max_number_of_chars, biggest_points, collator, &mut best);
            max_number_of_chars *= 2;
        }
        best
    }

    /// Finds the highest-points interval in which no position admits more
    /// than `max_number_of_chars` characters. Points are the product of
    /// interval width and an estimate of the probability of skipping,
    /// computed from the sampled character frequencies.
    fn find_best_interval(
        &self,
        max_number_of_chars: usize,
        old_biggest_points: i32,
        collator: &FrequencyCollator,
        best: &mut Option<(usize, usize)>,
    ) -> i32 {
        let mut biggest_points = old_biggest_points;
        let mut i = 0;
        while i < self.length {
            while i < self.length && self.count(i) > max_number_of_chars {
                i += 1;
            }
            if i == self.length {
                break;
            }
            let remembered_from = i;
            let mut union_map = BoolTable::ZERO;
            while i < self.length && self.count(i) <= max_number_of_chars {
                for (dst, src) in
                    union_map.data.iter_mut().zip(self.bitmaps[i].map.data.iter())
                {
                    *dst |= *src;
                }
                i += 1;
            }
            let mut frequency = 0;
            for j in union_map.iter_ones() {
                // Add 1 to give a small per-character boost for the cases
                // where the sampling is not good enough and many characters
                // have a frequency of zero.
                frequency += collator.frequency(j) + 1;
            }
            // Skipping is judged by probability times distance, with a
            // cut-off: inside the quick-check window the mask-and-compare
            // is likely to do better, so the bar is twice as high there.
            let in_quickcheck_range = (i - remembered_from < 4)
                || (if self.max_char <= MAX_ONE_BYTE_CHAR {
                    remembered_from <= 4
                } else {
                    remembered_from <= 2
                });
            // Called a probability but only a rough estimate, and it can
            // land outside the 0-128 range.
            let probability =
                (if in_quickcheck_range { TABLE_SIZE as i32 / 2 } else { TABLE_SIZE as i32 })
                    - frequency;
            let points = (i - remembered_from) as i32 * probability;
            if points > biggest_points {
                *best = Some((remembered_from, i - 1));
                biggest_points = points;
            }
        }
        biggest_points
    }

    /// Collects the characters that do not rule out a match anywhere in
    /// `[min_lookahead, max_lookahead]`. If the character at the
    /// max-lookahead offset is not one of them, it is safe to skip forward
    /// by the width of the interval.
    fn skip_table(&self, min_lookahead: usize, max_lookahead: usize) -> (BoolTable, usize) {
        let mut table = BoolTable::ZERO;
        let skip = max_lookahead + 1 - min_lookahead;
        for i in (min_lookahead..=max_lookahead).rev() {
            for (dst, src) in table.data.iter_mut().zip(self.bitmaps[i].map.data.iter()) {
                *dst |= *src;
            }
        }
        (table, skip)
    }

    /// Emits the skip loop, if a worthwhile one exists.
    pub fn emit_skip_instructions(
        &self,
        masm: &mut dyn MacroAssembler,
        collator: &FrequencyCollator,
    ) {
        let Some((min_lookahead, max_lookahead)) = self.find_worthwhile_interval(collator)
        else {
            return;
        };

        // Check whether the whole interval admits just one character.
        let mut found_single_character = false;
        let mut single_character = 0;
        for i in (min_lookahead..=max_lookahead).rev() {
            let map = &self.bitmaps[i];
            if map.map_count() > 1 || (found_single_character && map.map_count() != 0) {
                found_single_character = false;
                break;
            }
            if let Some(j) = map.map.first_one() {
                found_single_character = true;
                single_character = j;
            }
        }

        let lookahead_width = max_lookahead + 1 - min_lookahead;

        if found_single_character && lookahead_width == 1 && max_lookahead < 3 {
            // The mask-compare can probably handle this better.
            return;
        }

        if found_single_character {
            log::trace!(
                "boyer-moore: single-character scan for bucket {single_character}, \
                 stride {lookahead_width}"
            );
            let cont = masm.create_label();
            let again = masm.create_label();
            masm.bind(again);
            masm.load_current_character(max_lookahead as i32, Some(cont), true, 1);
            if self.max_char > TABLE_SIZE as u32 {
                masm.check_character_after_and(
                    single_character as u32,
                    TABLE_MASK,
                    Some(cont),
                );
            } else {
                masm.check_character(single_character as u32, Some(cont));
            }
            masm.advance_current_position(lookahead_width as i32);
            masm.go_to(Some(again));
            masm.bind(cont);
            return;
        }

        let (table, skip_distance) = self.skip_table(min_lookahead, max_lookahead);
        debug_assert_ne!(skip_distance, 0);
        log::trace!("boyer-moore: skip table with stride {skip_distance}");

        let cont = masm.create_label();
        let again = masm.create_label();
        masm.bind(again);
        masm.load_current_character(max_lookahead as i32, Some(cont), true, 1);
        masm.check_bit_in_table(&table, Some(cont));
        masm.advance_current_position(skip_distance as i32);
        masm.go_to(Some(again));
        masm.bind(cont);
    }
}

/// Fills `bm` with the possible characters at each offset reachable from
/// `node`. Nodes reached at offset zero are recorded in `save` so the
/// caller can cache the finished lookahead on them.
pub(crate) fn fill_in_bm_info(
    c: &mut Compiler,
    node: NodeId,
    offset: usize,
    budget: i32,
    bm: &mut BoyerMooreLookahead,
    not_at_start: bool,
    save: &mut Vec<NodeId>,
) {
    let save_this = |save: &mut Vec<NodeId>| {
        if offset == 0 {
            save.push(node);
        }
    };
    match &c.arena.get(node).variant {
        NodeVariant::End(_) => {
            // EatsAtLeast returns 0 for end nodes, which keeps lookahead
            // construction away from them.
            bm.set_rest(offset);
        }
        NodeVariant::Action(a) => {
            let on_success = a.on_success;
            let positive_submatch =
                matches!(a.action, Action::PositiveSubmatchSuccess { .. });
            if !positive_submatch {
                fill_in_bm_info(c, on_success, offset, budget - 1, bm, not_at_start, save);
            }
            save_this(save);
        }
        NodeVariant::Assertion(a) => {
            // Matches the behaviour of EatsAtLeast on this node.
            if a.kind == AssertionNodeKind::AtStart && not_at_start {
                return;
            }
            let on_success = a.on_success;
            fill_in_bm_info(c, on_success, offset, budget - 1, bm, not_at_start, save);
            save_this(save);
        }
        NodeVariant::BackReference(_) => {
            // Working out what a back reference can match is too hard, so
            // anything goes from here on.
            bm.set_rest(offset);
            save_this(save);
        }
        NodeVariant::Choice(choice) => {
            let zero_length_loop = match &choice.kind {
                ChoiceKind::Loop(data) => data.body_can_be_zero_length,
                _ => false,
            };
            let is_loop = matches!(choice.kind, ChoiceKind::Loop(_));
            if zero_length_loop || (is_loop && budget <= 0) {
                bm.set_rest(offset);
                save_this(save);
                return;
            }
            let budget = if is_loop { budget - 1 } else { budget };
            let alternatives: Vec<_> =
                choice.alternatives.iter().map(|a| (a.node, !a.guards.is_empty())).collect();
            let budget = (budget - 1) / alternatives.len() as i32;
            for (alt, guarded) in alternatives {
                if guarded {
                    // Give up trying to fill in info.
                    bm.set_rest(offset);
                    save_this(save);
                    return;
                }
                fill_in_bm_info(c, alt, offset, budget, bm, not_at_start, save);
            }
            save_this(save);
        }
        NodeVariant::Text(_) => fill_in_bm_info_text(c, node, offset, budget, bm, not_at_start, save),
    }
}

fn fill_in_bm_info_text(
    c: &mut Compiler,
    node: NodeId,
    initial_offset: usize,
    budget: i32,
    bm: &mut BoyerMooreLookahead,
    not_at_start: bool,
    save: &mut Vec<NodeId>,
) {
    let _ = not_at_start;
    if initial_offset >= bm.length() {
        return;
    }
    let save_this = |save: &mut Vec<NodeId>| {
        if initial_offset == 0 {
            save.push(node);
        }
    };
    let ignore_case = c.flags.ignore_case();
    let one_byte_chars = bm.max_char() == MAX_ONE_BYTE_CHAR;
    let max_char = bm.max_char();

    let (elements, on_success) = match &c.arena.get(node).variant {
        NodeVariant::Text(t) => (&t.elements, t.on_success),
        _ => unreachable!(),
    };

    let mut offset = initial_offset;
    for element in elements {
        if offset >= bm.length() {
            save_this(save);
            return;
        }
        match &element.elem {
            TextElem::Atom { chars } => {
                for &ch in chars {
                    if offset >= bm.length() {
                        save_this(save);
                        return;
                    }
                    if ignore_case {
                        let letters = case_independent_letters(
                            c.case_folder.as_ref(),
                            ch as u32,
                            one_byte_chars,
                        );
                        for &letter in letters.iter() {
                            bm.set(offset, letter);
                        }
                    } else if (ch as u32) <= max_char {
                        bm.set(offset, ch as u32);
                    }
                    offset += 1;
                }
            }
            TextElem::Class(class) => {
                if class.negated {
                    bm.set_all(offset);
                } else {
                    for range in &class.ranges {
                        if range.from > max_char {
                            continue;
                        }
                        bm.set_interval(offset, range.from, range.to.min(max_char));
                    }
                }
                offset += 1;
            }
        }
    }
    if offset >= bm.length() {
        save_this(save);
        return;
    }
    // Not at start after a text node.
    fill_in_bm_info(c, on_success, offset, budget - 1, bm, true, save);
    save_this(save);
}

/// Caches a finished lookahead on the nodes recorded during filling.
pub(crate) fn save_bm_info(
    c: &mut Compiler,
    bm: Rc<BoyerMooreLookahead>,
    not_at_start: bool,
    nodes: &[NodeId],
) {
    for &node in nodes {
        c.arena.get_mut(node).bm_info[not_at_start as usize] = Some(Rc::clone(&bm));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lattice_classifies_intervals() {
        let w = Lattice::NOT_YET.add_range(WORD_RANGES, (b'a' as u32, b'f' as u32));
        assert_eq!(w, Lattice::IN);
        let w = Lattice::NOT_YET.add_range(WORD_RANGES, (b' ' as u32, b' ' as u32));
        assert_eq!(w, Lattice::OUT);
        // Straddles the boundary of the word set.
        let w = Lattice::NOT_YET.add_range(WORD_RANGES, (b'!' as u32, b'5' as u32));
        assert_eq!(w, Lattice::UNKNOWN);
        // In then out collapses to unknown.
        let w = Lattice::IN.combine(Lattice::OUT);
        assert_eq!(w, Lattice::UNKNOWN);
    }

    #[test]
    fn position_info_tracks_word_membership() {
        let mut info = PositionInfo::new();
        info.set_interval(b'a' as u32, b'z' as u32);
        assert!(info.is_word());
        assert!(!info.is_non_word());
        info.set_interval(b' ' as u32, b' ' as u32);
        assert!(!info.is_word());
        assert!(!info.is_non_word());

        let mut info = PositionInfo::new();
        info.set_interval(0xD800, 0xDBFF);
        assert!(info.is_surrogate());
    }

    #[test]
    fn skip_table_unions_the_interval() {
        let mut bm = BoyerMooreLookahead::new(4, true);
        bm.set(2, b'a' as u32);
        bm.set(3, b'b' as u32);
        let (table, skip) = bm.skip_table(2, 3);
        assert_eq!(skip, 2);
        assert!(table[b'a' as usize]);
        assert!(table[b'b' as usize]);
        assert_eq!(table.count_ones(), 2);
    }

    #[test]
    fn wide_interval_saturates_the_map() {
        let mut bm = BoyerMooreLookahead::new(1, true);
        bm.set_interval(0, 0, 0xFF);
        assert_eq!(bm.at(0).map_count(), TABLE_SIZE);
    }
}
