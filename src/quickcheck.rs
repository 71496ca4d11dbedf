/*!
Mask-and-compare quick checks over preloaded characters.

Before committing to the full code for an alternative, the emitter loads up
to four code units ahead and compares them, packed into one machine word,
against a mask and value synthesized from everything the alternative could
possibly match. A failed quick check rejects the alternative outright; a
passed one means only that a match is possible, so the full check still
runs, skipping the positions the quick check already determined perfectly.
*/

use crate::codegen::{Label, MacroAssembler};
use crate::compiler::Compiler;
use crate::nodes::{AssertionNodeKind, ChoiceKind, NodeId, NodeVariant, TextElem};
use crate::ranges::case_independent_letters;
use crate::trace::{TriBool, Trace};
use crate::{MAX_ONE_BYTE_CHAR, MAX_UTF16_CODE_UNIT};

/// What is known about one lookahead position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Position {
    pub mask: u32,
    pub value: u32,
    /// True if `char & mask == value` does not just reject impossible
    /// characters but accepts exactly the possible ones.
    pub determines_perfectly: bool,
}

/// Per-position masks and values for up to four characters of lookahead,
/// plus the combined word compare once rationalized.
#[derive(Debug, Clone)]
pub(crate) struct QuickCheckDetails {
    characters: usize,
    positions: [Position; 4],
    mask: u32,
    value: u32,
    cannot_match: bool,
}

impl QuickCheckDetails {
    pub fn new(characters: usize) -> Self {
        Self {
            characters,
            positions: [Position::default(); 4],
            mask: 0,
            value: 0,
            cannot_match: false,
        }
    }

    pub fn characters(&self) -> usize {
        self.characters
    }

    pub fn set_characters(&mut self, characters: usize) {
        self.characters = characters;
    }

    pub fn position(&self, index: usize) -> &Position {
        &self.positions[index]
    }

    pub fn position_mut(&mut self, index: usize) -> &mut Position {
        &mut self.positions[index]
    }

    pub fn set_cannot_match(&mut self) {
        self.cannot_match = true;
    }

    pub fn cannot_match(&self) -> bool {
        self.cannot_match
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn clear(&mut self) {
        for pos in self.positions.iter_mut() {
            *pos = Position::default();
        }
        self.characters = 0;
    }

    /// Shifts the window after the position advanced by `by` code units.
    pub fn advance(&mut self, by: i32) {
        if by < 0 || by as usize >= self.characters {
            self.clear();
            return;
        }
        let by = by as usize;
        for i in 0..self.characters - by {
            self.positions[i] = self.positions[by + i];
        }
        for i in self.characters - by..self.characters {
            self.positions[i] = Position::default();
        }
        self.characters -= by;
        // The combined mask and value are not worth updating; they were
        // already used in a check and will not be used again.
    }

    /// Intersects with the details of another alternative, weakening the
    /// check so it accepts whatever either alternative accepts.
    pub fn merge(&mut self, other: &mut QuickCheckDetails, from_index: usize) {
        debug_assert_eq!(self.characters, other.characters);
        if other.cannot_match {
            return;
        }
        if self.cannot_match {
            *self = other.clone();
            return;
        }
        for i in from_index..self.characters {
            let pos = &mut self.positions[i];
            let other_pos = &mut other.positions[i];
            if pos.mask != other_pos.mask
                || pos.value != other_pos.value
                || !other_pos.determines_perfectly
            {
                // The mask-compare becomes approximate unless both sides
                // perform the exact same test.
                pos.determines_perfectly = false;
            }
            pos.mask &= other_pos.mask;
            pos.value &= pos.mask;
            other_pos.value &= pos.mask;
            let differing_bits = pos.value ^ other_pos.value;
            pos.mask &= !differing_bits;
            pos.value &= pos.mask;
        }
    }

    /// Combines the per-position tests into one word-sized mask and value.
    /// Returns false when the combined test cannot reject anything.
    pub fn rationalize(&mut self, one_byte: bool) -> bool {
        let char_mask = if one_byte { MAX_ONE_BYTE_CHAR } else { MAX_UTF16_CODE_UNIT };
        let mut found_useful_op = false;
        self.mask = 0;
        self.value = 0;
        let mut char_shift = 0;
        for i in 0..self.characters {
            let pos = &self.positions[i];
            if pos.mask & MAX_ONE_BYTE_CHAR != 0 {
                found_useful_op = true;
            }
            self.mask |= (pos.mask & char_mask) << char_shift;
            self.value |= (pos.value & char_mask) << char_shift;
            char_shift += if one_byte { 8 } else { 16 };
        }
        found_useful_op
    }
}

/// Takes the left-most 1-bit and smears it out, setting all bits to its
/// right.
fn smear_bits_right(mut v: u32) -> u32 {
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v
}

/// Computes what the first characters matched by `node` must look like,
/// filling `details` from index `filled_in` on.
pub(crate) fn get_quick_check_details(
    c: &mut Compiler,
    node: NodeId,
    details: &mut QuickCheckDetails,
    filled_in: usize,
    not_at_start: bool,
) {
    match &c.arena.get(node).variant {
        NodeVariant::End(_) => {}
        NodeVariant::Action(a) => {
            let on_success = a.on_success;
            get_quick_check_details(c, on_success, details, filled_in, not_at_start);
        }
        NodeVariant::BackReference(_) => {
            // The referenced text is unknown until run time; leave the
            // remaining positions accepting anything.
        }
        NodeVariant::Assertion(a) => {
            if a.kind == AssertionNodeKind::AtStart && not_at_start {
                details.set_cannot_match();
                return;
            }
            let on_success = a.on_success;
            get_quick_check_details(c, on_success, details, filled_in, not_at_start);
        }
        NodeVariant::Text(_) => {
            text_quick_check_details(c, node, details, filled_in, not_at_start)
        }
        NodeVariant::Choice(choice) => match &choice.kind {
            ChoiceKind::NegativeLookaround => {
                // Alternative 0 is the negative lookaround body,
                // alternative 1 what comes afterwards.
                let next = choice.alternatives[1].node;
                get_quick_check_details(c, next, details, filled_in, not_at_start);
            }
            ChoiceKind::Loop(data) => {
                if data.body_can_be_zero_length || c.arena.get(node).info.visited {
                    return;
                }
                c.arena.get_mut(node).info.visited = true;
                choice_quick_check_details(c, node, details, filled_in, not_at_start);
                c.arena.get_mut(node).info.visited = false;
            }
            ChoiceKind::Plain => {
                choice_quick_check_details(c, node, details, filled_in, not_at_start)
            }
        },
    }
}

fn choice_quick_check_details(
    c: &mut Compiler,
    node: NodeId,
    details: &mut QuickCheckDetails,
    filled_in: usize,
    not_at_start: bool,
) {
    let (alternatives, not_at_start) = match &c.arena.get(node).variant {
        NodeVariant::Choice(choice) => (
            choice.alternatives.iter().map(|a| a.node).collect::<Vec<_>>(),
            not_at_start || choice.not_at_start,
        ),
        _ => unreachable!(),
    };
    debug_assert!(!alternatives.is_empty());
    get_quick_check_details(c, alternatives[0], details, filled_in, not_at_start);
    for &alt in &alternatives[1..] {
        let mut new_details = QuickCheckDetails::new(details.characters());
        get_quick_check_details(c, alt, &mut new_details, filled_in, not_at_start);
        details.merge(&mut new_details, filled_in);
    }
}

// The meat of the quick check synthesis. Walks the text elements building
// for each character a mask and value that can at least reject some
// non-matching characters, and ideally determines matches exactly.
fn text_quick_check_details(
    c: &mut Compiler,
    node: NodeId,
    details: &mut QuickCheckDetails,
    mut characters_filled_in: usize,
    not_at_start: bool,
) {
    let _ = not_at_start;
    let char_mask = if c.one_byte { MAX_ONE_BYTE_CHAR } else { MAX_UTF16_CODE_UNIT };
    let ignore_case = c.flags.ignore_case();
    let one_byte = c.one_byte;

    let (elements, read_backward, on_success) = match &c.arena.get(node).variant {
        NodeVariant::Text(t) => (&t.elements, t.read_backward, t.on_success),
        _ => unreachable!(),
    };
    // A backward-reading node consumes in the opposite direction from the
    // quick-check window; nothing useful can be collected.
    if read_backward {
        return;
    }
    debug_assert!(characters_filled_in < details.characters());
    let characters = details.characters();

    for element in elements {
        match &element.elem {
            TextElem::Atom { chars } => {
                for i in 0..characters.min(chars.len()) {
                    let pos = details.position_mut(characters_filled_in);
                    let ch = chars[i] as u32;
                    if ignore_case {
                        let letters =
                            case_independent_letters(c.case_folder.as_ref(), ch, one_byte);
                        if letters.is_empty() {
                            // All case variants are outside Latin-1 but the
                            // subject is known to be one-byte.
                            details.set_cannot_match();
                            return;
                        }
                        if letters.len() == 1 {
                            // No case equivalents; the mask-compare decides
                            // this position exactly.
                            pos.mask = char_mask;
                            pos.value = ch;
                            pos.determines_perfectly = true;
                        } else {
                            let mut common_bits = char_mask;
                            let mut bits = letters[0];
                            for &letter in &letters[1..] {
                                let differing_bits = (letter & common_bits) ^ bits;
                                common_bits ^= differing_bits;
                                bits &= common_bits;
                            }
                            // With two variants and a single zero in the
                            // common bits the compare is still exact.
                            let one_zero = common_bits | !char_mask;
                            pos.determines_perfectly =
                                letters.len() == 2 && (!one_zero) & ((!one_zero).wrapping_sub(1)) == 0;
                            pos.mask = common_bits;
                            pos.value = bits;
                        }
                    } else {
                        if ch > char_mask {
                            details.set_cannot_match();
                            return;
                        }
                        pos.mask = char_mask;
                        pos.value = ch;
                        pos.determines_perfectly = true;
                    }
                    characters_filled_in += 1;
                    debug_assert!(characters_filled_in <= details.characters());
                    if characters_filled_in == details.characters() {
                        return;
                    }
                }
            }
            TextElem::Class(class) => {
                let pos = details.position_mut(characters_filled_in);
                if class.negated || class.ranges.is_empty() {
                    // There is no useful way to fold a negated class into a
                    // mask and compare, so make one that always passes.
                    pos.mask = 0;
                    pos.value = 0;
                } else {
                    let ranges = &class.ranges;
                    let mut first_range = 0;
                    while ranges[first_range].from > char_mask {
                        first_range += 1;
                        if first_range == ranges.len() {
                            details.set_cannot_match();
                            return;
                        }
                    }
                    let from = ranges[first_range].from;
                    let to = ranges[first_range].to.min(char_mask);
                    let differing_bits = from ^ to;
                    // A mask and compare is only perfect if the differing
                    // bits form one block of trailing 1s.
                    if differing_bits & (differing_bits + 1) == 0
                        && from + differing_bits == to
                    {
                        pos.determines_perfectly = true;
                    }
                    let mut common_bits = !smear_bits_right(differing_bits);
                    let mut bits = from & common_bits;
                    for range in &ranges[first_range + 1..] {
                        if range.from > char_mask {
                            continue;
                        }
                        let from = range.from;
                        let to = range.to.min(char_mask);
                        // Every extra range makes the mask sparser and
                        // false positives likelier; assume the compare is
                        // no longer exact.
                        pos.determines_perfectly = false;
                        let new_common_bits = !smear_bits_right(from ^ to);
                        common_bits &= new_common_bits;
                        bits &= new_common_bits;
                        let differing_bits = (from & common_bits) ^ bits;
                        common_bits ^= differing_bits;
                        bits &= common_bits;
                    }
                    pos.mask = common_bits;
                    pos.value = bits;
                }
                characters_filled_in += 1;
                debug_assert!(characters_filled_in <= details.characters());
                if characters_filled_in == details.characters() {
                    return;
                }
            }
        }
    }
    debug_assert_ne!(characters_filled_in, details.characters());
    if !details.cannot_match() {
        // Not at start after a text node.
        get_quick_check_details(c, on_success, details, characters_filled_in, true);
    }
}

/// Emits a quick check for `node` if a useful one exists. Returns whether
/// code was emitted. With `fall_through_on_failure` the check jumps to
/// `on_possible_success` and falls through on failure; otherwise it jumps
/// to the trace's backtrack target on failure and falls through on
/// possible success.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_quick_check(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    bounds_check_trace: &Trace,
    trace: &Trace,
    preload_has_checked_bounds: bool,
    on_possible_success: Label,
    details: &mut QuickCheckDetails,
    fall_through_on_failure: bool,
) -> bool {
    if details.characters() == 0 {
        return false;
    }
    get_quick_check_details(c, node, details, 0, trace.at_start() == TriBool::False);
    if details.cannot_match() {
        return false;
    }
    if !details.rationalize(c.one_byte) {
        return false;
    }
    debug_assert!(details.characters() == 1 || masm.can_read_unaligned());
    let mut mask = details.mask();
    let value = details.value();

    if trace.characters_preloaded() != details.characters() {
        debug_assert_eq!(trace.cp_offset(), bounds_check_trace.cp_offset());
        // The load covers the minimum any alternative eats, so a failed
        // bounds check can backtrack immediately instead of trying the
        // next alternative.
        masm.load_current_character(
            trace.cp_offset(),
            bounds_check_trace.backtrack(),
            !preload_has_checked_bounds,
            details.characters(),
        );
    }

    let mut need_mask = true;
    if details.characters() == 1 {
        // A one-character load is already masked down by the load itself.
        let char_mask = if c.one_byte { MAX_ONE_BYTE_CHAR } else { MAX_UTF16_CODE_UNIT };
        if mask & char_mask == char_mask {
            need_mask = false;
        }
        mask &= char_mask;
    } else {
        // Two-character loads in one-byte mode zero-extend into 16 bits,
        // four-character loads fill the word.
        const TWO_BYTE_MASK: u32 = 0xFFFF;
        if details.characters() == 2 && c.one_byte {
            if mask & TWO_BYTE_MASK == TWO_BYTE_MASK {
                need_mask = false;
            }
        } else if mask == u32::MAX {
            need_mask = false;
        }
    }

    if fall_through_on_failure {
        if need_mask {
            masm.check_character_after_and(value, mask, Some(on_possible_success));
        } else {
            masm.check_character(value, Some(on_possible_success));
        }
    } else if need_mask {
        masm.check_not_character_after_and(value, mask, trace.backtrack());
    } else {
        masm.check_not_character(value, trace.backtrack());
    }
    true
}

/// True if the quick check carried in a trace already proved the character
/// at `offset` matches exactly.
pub(crate) fn determined_already(quick_check: &QuickCheckDetails, offset: i32) -> bool {
    if offset < 0 || offset as usize >= quick_check.characters() {
        return false;
    }
    quick_check.position(offset as usize).determines_perfectly
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn advance_shifts_the_window() {
        let mut details = QuickCheckDetails::new(3);
        *details.position_mut(0) =
            Position { mask: 0xFF, value: b'a' as u32, determines_perfectly: true };
        *details.position_mut(1) =
            Position { mask: 0xFF, value: b'b' as u32, determines_perfectly: true };
        *details.position_mut(2) =
            Position { mask: 0xFF, value: b'c' as u32, determines_perfectly: true };
        details.advance(1);
        assert_eq!(details.characters(), 2);
        assert_eq!(details.position(0).value, b'b' as u32);
        assert_eq!(details.position(1).value, b'c' as u32);
    }

    #[test]
    fn merge_weakens_to_common_bits() {
        let mut a = QuickCheckDetails::new(1);
        *a.position_mut(0) =
            Position { mask: 0xFF, value: b'a' as u32, determines_perfectly: true };
        let mut b = QuickCheckDetails::new(1);
        *b.position_mut(0) =
            Position { mask: 0xFF, value: b'b' as u32, determines_perfectly: true };
        a.merge(&mut b, 0);
        // 'a' is 0x61 and 'b' is 0x62; the merged test can only pin down
        // the bits they share.
        assert!(!a.position(0).determines_perfectly);
        assert_eq!(a.position(0).value & 0x60, 0x60);
        assert_eq!(a.position(0).mask & 0x03, 0);
        // Both characters still pass the weakened test.
        for ch in [b'a' as u32, b'b' as u32] {
            assert_eq!(ch & a.position(0).mask, a.position(0).value);
        }
    }

    #[test]
    fn rationalize_packs_positions() {
        let mut details = QuickCheckDetails::new(2);
        *details.position_mut(0) =
            Position { mask: 0xFF, value: b'a' as u32, determines_perfectly: true };
        *details.position_mut(1) =
            Position { mask: 0xFF, value: b'b' as u32, determines_perfectly: true };
        assert!(details.rationalize(true));
        assert_eq!(details.mask(), 0xFFFF);
        assert_eq!(details.value(), (b'b' as u32) << 8 | b'a' as u32);
    }
}
