/*!
Code emission for the node graph.

Every node kind knows how to emit itself under a [`Trace`]. Entry goes
through [`limit_versions`]: under a trivial trace a node emits (and labels)
its one generic version, or jumps to it if it already exists; under a
non-trivial trace it emits a version specialized to that trace, up to a
per-node cap, after which the trace is flushed and the generic version is
used.

Text nodes emit their checks right-to-left in several passes of increasing
cost, so one bounds check covers the whole node and the cheap failures
happen first. Choice nodes try to reject each alternative with a quick
check before committing to its full code, and loop choices with a
fixed-length body get the greedy-loop optimization: only the loop entry
position is pushed, and backtracking steps backwards through the input
instead of popping saved positions.
*/

use std::rc::Rc;

use crate::boyer_moore::{fill_in_bm_info, save_bm_info, BoyerMooreLookahead};
use crate::codegen::{Label, MacroAssembler, MAX_CP_OFFSET, TABLE_SIZE, TABLE_SIZE_BITS};
use crate::compiler::{
    Compiler, MAX_COPIES_CODE_GENERATED, MAX_LOOKAHEAD_FOR_BOYER_MOORE, RECURSION_BUDGET,
};
use crate::nodes::{
    Action, AssertionNodeKind, ChoiceKind, ClassData, EndData, Guard, GuardOp,
    GuardedAlternative, NodeId, NodeVariant, TextElem, TextElement, GREEDY_LOOP_TOO_COMPLEX,
};
use crate::quickcheck::{determined_already, emit_quick_check, QuickCheckDetails};
use crate::ranges::{case_independent_letters, try_convert_to_latin1, BoolTable};
use crate::trace::{DeferredAction, TriBool, Trace};
use crate::{MAX_ONE_BYTE_CHAR, MAX_UTF16_CODE_UNIT};

fn max_char(one_byte: bool) -> u32 {
    if one_byte {
        MAX_ONE_BYTE_CHAR
    } else {
        MAX_UTF16_CODE_UNIT
    }
}

/// Emits code for `node` as entered with `trace`.
pub(crate) fn emit(c: &mut Compiler, masm: &mut dyn MacroAssembler, node: NodeId, trace: &Trace) {
    match &c.arena.get(node).variant {
        NodeVariant::Text(_) => emit_text(c, masm, node, trace),
        NodeVariant::Choice(choice) => match choice.kind {
            ChoiceKind::Loop(_) => emit_loop_choice(c, masm, node, trace),
            _ => emit_choice(c, masm, node, trace),
        },
        NodeVariant::Action(_) => emit_action(c, masm, node, trace),
        NodeVariant::Assertion(_) => emit_assertion(c, masm, node, trace),
        NodeVariant::BackReference(_) => emit_back_reference(c, masm, node, trace),
        NodeVariant::End(_) => emit_end(c, masm, node, trace),
    }
}

#[derive(PartialEq)]
enum LimitResult {
    Done,
    Continue,
}

/// Decides between reusing a node's generic code, emitting a specialized
/// version, and flushing the trace to fall back to the generic version.
fn limit_versions(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
) -> LimitResult {
    // While generating a greedy loop body, code must neither stop nor be
    // reused; the loop tail depends on every copy being inline.
    if trace.stop_node().is_some() {
        return LimitResult::Continue;
    }

    if trace.is_trivial() {
        let label = c.node_label(masm, node);
        if masm.is_bound(label) || c.arena.get(node).on_work_list || !c.keep_recursing() {
            // Generic code exists or is scheduled; a jump is all we need.
            masm.go_to(Some(label));
            c.add_work(node);
            return LimitResult::Done;
        }
        // Generate the generic version here and label it for reuse.
        masm.bind(label);
        return LimitResult::Continue;
    }

    // A non-generic version is being asked for. Keep track of how many we
    // generate so as not to overdo it.
    let n = c.arena.get_mut(node);
    n.trace_count += 1;
    let trace_count = n.trace_count;
    if c.keep_recursing() && c.optimize && trace_count < MAX_COPIES_CODE_GENERATED {
        return LimitResult::Continue;
    }

    // Code has been generated for this node too many times or recursion is
    // too deep. The generic version can handle both, so switch to it.
    let was_limiting = c.limiting_recursion;
    c.limiting_recursion = true;
    trace.flush(c, masm, node);
    c.limiting_recursion = was_limiting;
    LimitResult::Done
}

// ---------------------------------------------------------------------
// Text nodes.

#[derive(Clone, Copy, PartialEq)]
enum TextEmitPass {
    NonLatin1Match,
    SimpleCharacterMatch,
    NonLetterCharacterMatch,
    CaseCharacterMatch,
    CharacterClassMatch,
}

const REAL_PASSES: [TextEmitPass; 4] = [
    TextEmitPass::SimpleCharacterMatch,
    TextEmitPass::NonLetterCharacterMatch,
    TextEmitPass::CaseCharacterMatch,
    TextEmitPass::CharacterClassMatch,
];

fn skip_pass(pass: TextEmitPass, ignore_case: bool) -> bool {
    if ignore_case {
        pass == TextEmitPass::SimpleCharacterMatch
    } else {
        pass == TextEmitPass::NonLetterCharacterMatch
            || pass == TextEmitPass::CaseCharacterMatch
    }
}

// Generates the code to match a text node. For efficiency this is not one
// left-to-right pass: the node is traversed several times, emitting some
// character positions each time, in increasing order of difficulty, in the
// hope that a cheap early pass fails before the expensive ones have to
// run. Positions are emitted right-to-left within a pass so that one
// bounds check at the rightmost position covers all of them.
fn emit_text(c: &mut Compiler, masm: &mut dyn MacroAssembler, node: NodeId, trace: &Trace) {
    if limit_versions(c, masm, node, trace) == LimitResult::Done {
        return;
    }

    let (length, read_backward, on_success) = match &c.arena.get(node).variant {
        NodeVariant::Text(t) => (t.length(), t.read_backward, t.on_success),
        _ => unreachable!(),
    };

    if trace.cp_offset() + length > MAX_CP_OFFSET {
        c.set_reg_exp_too_big();
        return;
    }

    if c.one_byte {
        let mut dummy = 0;
        text_emit_pass(c, masm, node, TextEmitPass::NonLatin1Match, false, trace, false, &mut dummy);
    }

    let mut first_elt_done = false;
    let mut bound_checked_to = trace.cp_offset() - 1 + trace.bound_checked_up_to();

    // If a character is preloaded into the current character register then
    // check it first, to save reloading it.
    if trace.characters_preloaded() == 1 {
        for pass in REAL_PASSES {
            text_emit_pass(c, masm, node, pass, true, trace, false, &mut bound_checked_to);
        }
        first_elt_done = true;
    }

    for pass in REAL_PASSES {
        text_emit_pass(c, masm, node, pass, false, trace, first_elt_done, &mut bound_checked_to);
    }

    let mut successor_trace = trace.clone();
    successor_trace
        .advance_current_position(if read_backward { -length } else { length }, c);
    // Advancing backward may land back on the start of input.
    successor_trace.set_at_start(if read_backward { TriBool::Unknown } else { TriBool::False });
    c.recursion_depth += 1;
    emit(c, masm, on_success, &successor_trace);
    c.recursion_depth -= 1;
}

fn update_bounds_check(index: i32, checked_up_to: &mut i32) {
    if index > *checked_up_to {
        *checked_up_to = index;
    }
}

#[allow(clippy::too_many_arguments)]
fn text_emit_pass(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    pass: TextEmitPass,
    preloaded: bool,
    trace: &Trace,
    first_element_checked: bool,
    checked_up_to: &mut i32,
) {
    let (elements, read_backward, length): (Vec<TextElement>, bool, i32) =
        match &c.arena.get(node).variant {
            NodeVariant::Text(t) => (
                t.elements
                    .iter()
                    .map(|e| TextElement {
                        cp_offset: e.cp_offset,
                        elem: match &e.elem {
                            TextElem::Atom { chars } => {
                                TextElem::Atom { chars: chars.clone() }
                            }
                            TextElem::Class(class) => TextElem::Class(ClassData {
                                ranges: class.ranges.clone(),
                                negated: class.negated,
                            }),
                        },
                    })
                    .collect(),
                t.read_backward,
                t.length(),
            ),
            _ => unreachable!(),
        };
    let ignore_case = c.flags.ignore_case();
    let one_byte = c.one_byte;
    let backtrack = trace.backtrack();
    let quick_check = trace.quick_check_performed().clone();
    let backward_offset = if read_backward { -length } else { 0 };

    let element_range = if preloaded { 0..1 } else { 0..elements.len() };
    for i in element_range.rev() {
        let elm = &elements[i];
        let cp_offset = trace.cp_offset() + elm.cp_offset + backward_offset;
        match &elm.elem {
            TextElem::Atom { chars } => {
                if skip_pass(pass, ignore_case) {
                    continue;
                }
                let char_range = if preloaded { 0..1 } else { 0..chars.len() };
                for j in char_range.rev() {
                    if first_element_checked && i == 0 && j == 0 {
                        continue;
                    }
                    if determined_already(&quick_check, elm.cp_offset + j as i32) {
                        continue;
                    }
                    let mut quark = chars[j];
                    if ignore_case {
                        // Everywhere else a non-Latin-1 character is assumed
                        // not to match a Latin-1 one; dodge the exceptions by
                        // using the Latin-1 equivalent.
                        quark = try_convert_to_latin1(quark);
                    }
                    match pass {
                        TextEmitPass::NonLatin1Match => {
                            debug_assert!(one_byte);
                            if quark as u32 > MAX_ONE_BYTE_CHAR {
                                masm.go_to(backtrack);
                                return;
                            }
                        }
                        TextEmitPass::NonLetterCharacterMatch
                        | TextEmitPass::SimpleCharacterMatch
                        | TextEmitPass::CaseCharacterMatch => {
                            let bounds_check =
                                *checked_up_to < cp_offset + j as i32 || read_backward;
                            let emit_fn = match pass {
                                TextEmitPass::NonLetterCharacterMatch => emit_atom_non_letter,
                                TextEmitPass::SimpleCharacterMatch => emit_simple_character,
                                TextEmitPass::CaseCharacterMatch => emit_atom_letter,
                                _ => unreachable!(),
                            };
                            let bound_checked = emit_fn(
                                c,
                                masm,
                                quark,
                                backtrack,
                                cp_offset + j as i32,
                                bounds_check,
                                preloaded,
                            );
                            if bound_checked {
                                update_bounds_check(cp_offset + j as i32, checked_up_to);
                            }
                        }
                        TextEmitPass::CharacterClassMatch => {}
                    }
                }
            }
            TextElem::Class(class) => {
                if pass == TextEmitPass::CharacterClassMatch {
                    if first_element_checked && i == 0 {
                        continue;
                    }
                    if determined_already(&quick_check, elm.cp_offset) {
                        continue;
                    }
                    let bounds_check = *checked_up_to < cp_offset || read_backward;
                    emit_char_class(
                        masm,
                        class,
                        one_byte,
                        backtrack,
                        cp_offset,
                        bounds_check,
                        preloaded,
                    );
                    update_bounds_check(cp_offset, checked_up_to);
                }
            }
        }
    }
}

fn emit_simple_character(
    _c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    ch: u16,
    on_failure: Option<Label>,
    cp_offset: i32,
    check: bool,
    preloaded: bool,
) -> bool {
    let mut bound_checked = false;
    if !preloaded {
        masm.load_current_character(cp_offset, on_failure, check, 1);
        bound_checked = true;
    }
    masm.check_not_character(ch as u32, on_failure);
    bound_checked
}

/// Only emits non-letters (things that have no case). Used for
/// case-independent matches.
fn emit_atom_non_letter(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    ch: u16,
    on_failure: Option<Label>,
    cp_offset: i32,
    check: bool,
    preloaded: bool,
) -> bool {
    let one_byte = c.one_byte;
    let letters = case_independent_letters(c.case_folder.as_ref(), ch as u32, one_byte);
    if letters.is_empty() {
        // A one-byte subject and a non-one-byte character: cannot match,
        // and the one-byte pass already dealt with it.
        return false;
    }
    let mut checked = false;
    // The multi-letter case is handled in a later pass.
    if letters.len() == 1 {
        if one_byte && ch as u32 > MAX_ONE_BYTE_CHAR {
            // Can't match, as above.
            return false;
        }
        if !preloaded {
            masm.load_current_character(cp_offset, on_failure, check, 1);
            checked = check;
        }
        masm.check_not_character(ch as u32, on_failure);
    }
    checked
}

/// Only emits letters (things that have case). Used for case-independent
/// matches.
fn emit_atom_letter(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    ch: u16,
    on_failure: Option<Label>,
    cp_offset: i32,
    check: bool,
    preloaded: bool,
) -> bool {
    let one_byte = c.one_byte;
    let letters = case_independent_letters(c.case_folder.as_ref(), ch as u32, one_byte);
    if letters.len() <= 1 {
        return false;
    }
    if !preloaded {
        masm.load_current_character(cp_offset, on_failure, check, 1);
    }
    let ok = masm.create_label();
    match letters.len() {
        2 => {
            if !short_cut_emit_character_pair(
                masm,
                one_byte,
                letters[0] as u16,
                letters[1] as u16,
                on_failure,
            ) {
                masm.check_character(letters[0], Some(ok));
                masm.check_not_character(letters[1], on_failure);
                masm.bind(ok);
            }
        }
        3 => {
            masm.check_character(letters[0], Some(ok));
            masm.check_character(letters[1], Some(ok));
            masm.check_not_character(letters[2], on_failure);
            masm.bind(ok);
        }
        4 => {
            masm.check_character(letters[3], Some(ok));
            masm.check_character(letters[0], Some(ok));
            masm.check_character(letters[1], Some(ok));
            masm.check_not_character(letters[2], on_failure);
            masm.bind(ok);
        }
        _ => unreachable!(),
    }
    true
}

fn short_cut_emit_character_pair(
    masm: &mut dyn MacroAssembler,
    one_byte: bool,
    c1: u16,
    c2: u16,
    on_failure: Option<Label>,
) -> bool {
    let char_mask = max_char(one_byte) as u16;
    let exor = c1 ^ c2;
    // c1 and c2 differ only by one bit.
    if exor & exor.wrapping_sub(1) == 0 {
        debug_assert!(c2 > c1);
        let mask = char_mask ^ exor;
        masm.check_not_character_after_and(c1 as u32, mask as u32, on_failure);
        return true;
    }
    debug_assert!(c2 > c1);
    let diff = c2 - c1;
    if diff & diff.wrapping_sub(1) == 0 && c1 >= diff {
        // The characters differ by 2^n but not by one bit: subtract the
        // difference and mask the distinguishing bit away. Negative values
        // are avoided to keep the generated code simple.
        let mask = char_mask ^ diff;
        masm.check_not_character_after_minus_and(c1 - diff, diff, mask, on_failure);
        return true;
    }
    false
}

// ---------------------------------------------------------------------
// Character classes.

fn emit_boundary_test(
    masm: &mut dyn MacroAssembler,
    border: u32,
    fall_through: Label,
    above_or_equal: Option<Label>,
    below: Option<Label>,
) {
    if below != Some(fall_through) {
        masm.check_character_lt(border as u16, below);
        if above_or_equal != Some(fall_through) {
            masm.go_to(above_or_equal);
        }
    } else {
        masm.check_character_gt((border - 1) as u16, above_or_equal);
    }
}

fn emit_double_boundary_test(
    masm: &mut dyn MacroAssembler,
    first: u32,
    last: u32,
    fall_through: Label,
    in_range: Option<Label>,
    out_of_range: Option<Label>,
) {
    if in_range == Some(fall_through) {
        if first == last {
            masm.check_not_character(first, out_of_range);
        } else {
            masm.check_character_not_in_range(first as u16, last as u16, out_of_range);
        }
    } else {
        if first == last {
            masm.check_character(first, in_range);
        } else {
            masm.check_character_in_range(first as u16, last as u16, in_range);
        }
        if out_of_range != Some(fall_through) {
            masm.go_to(out_of_range);
        }
    }
}

/// `even_label` is for `ranges[i]` to `ranges[i + 1]` where `i -
/// start_index` is even, `odd_label` for the odd gaps. Everything must be
/// on one 128-entry table page.
#[allow(clippy::too_many_arguments)]
fn emit_use_lookup_table(
    masm: &mut dyn MacroAssembler,
    ranges: &[u32],
    start_index: usize,
    end_index: usize,
    min_char: u32,
    fall_through: Label,
    even_label: Option<Label>,
    odd_label: Option<Label>,
) {
    const MASK: u32 = TABLE_SIZE as u32 - 1;
    let base = min_char & !MASK;
    // Assert that everything is on one table page.
    for i in start_index..=end_index {
        debug_assert_eq!(ranges[i] & !MASK, base);
    }
    debug_assert!(start_index == 0 || (ranges[start_index - 1] & !MASK) <= base);

    let (on_bit_set, on_bit_clear, mut bit) = if even_label == Some(fall_through) {
        (odd_label, even_label, true)
    } else {
        (even_label, odd_label, false)
    };

    let mut templ = [false; TABLE_SIZE];
    for entry in templ.iter_mut().take(((ranges[start_index] & MASK) as usize).min(TABLE_SIZE))
    {
        *entry = bit;
    }
    let mut j = 0;
    bit = !bit;
    for i in start_index..end_index {
        j = (ranges[i] & MASK) as usize;
        while j < (ranges[i + 1] & MASK) as usize {
            templ[j] = bit;
            j += 1;
        }
        bit = !bit;
    }
    for entry in templ.iter_mut().skip(j) {
        *entry = bit;
    }

    let mut table = BoolTable::ZERO;
    for (i, &set) in templ.iter().enumerate() {
        table.set(i, set);
    }
    masm.check_bit_in_table(&table, on_bit_set);
    if on_bit_clear != Some(fall_through) {
        masm.go_to(on_bit_clear);
    }
}

/// Tests a single range and removes it from the boundary list, merging the
/// gaps on either side of it while preserving the odd/even meaning of the
/// remaining boundaries.
fn cut_out_range(
    masm: &mut dyn MacroAssembler,
    ranges: &mut [u32],
    start_index: usize,
    end_index: usize,
    cut_index: usize,
    even_label: Option<Label>,
    odd_label: Option<Label>,
) {
    let odd = (cut_index - start_index) & 1 == 1;
    let in_range_label = if odd { odd_label } else { even_label };
    let dummy = masm.create_label();
    emit_double_boundary_test(
        masm,
        ranges[cut_index],
        ranges[cut_index + 1] - 1,
        dummy,
        in_range_label,
        Some(dummy),
    );
    debug_assert!(!masm.is_linked(dummy));
    for j in (start_index + 1..=cut_index).rev() {
        ranges[j] = ranges[j - 1];
    }
    for j in cut_index + 1..end_index {
        ranges[j] = ranges[j + 1];
    }
}

/// Splits the search space into 128-entry pages handled with recursion.
fn split_search_space(
    ranges: &[u32],
    start_index: usize,
    end_index: usize,
) -> (usize, usize, u32) {
    const MASK: u32 = TABLE_SIZE as u32 - 1;
    let first = ranges[start_index];
    let last = ranges[end_index] - 1;

    let mut new_start_index = start_index;
    let mut border = (first & !MASK) + TABLE_SIZE as u32;
    while new_start_index < end_index {
        if ranges[new_start_index] > border {
            break;
        }
        new_start_index += 1;
    }
    // new_start_index is the index of the first edge beyond the current
    // page.

    // For very large search spaces a binary chop of the non-Latin-1 space
    // beats walking page by page. Any 128-character page can be tested
    // with one table lookup, so the chop never goes finer than that. The
    // first condition makes sure the Latin-1 range is reached with a
    // single not-taken branch, since even non-Latin-1 text is full of
    // spaces and punctuation.
    let binary_chop_index = (end_index + start_index) / 2;
    if border - 1 > MAX_ONE_BYTE_CHAR
        && end_index - start_index > (new_start_index - start_index) * 2
        && last - first > TABLE_SIZE as u32 * 2
        && binary_chop_index > new_start_index
        && ranges[binary_chop_index] >= first + 2 * TABLE_SIZE as u32
    {
        let mut scan_forward_for_section_border = binary_chop_index;
        let new_border = (ranges[binary_chop_index] | MASK) + 1;
        while scan_forward_for_section_border < end_index {
            if ranges[scan_forward_for_section_border] > new_border {
                new_start_index = scan_forward_for_section_border;
                border = new_border;
                break;
            }
            scan_forward_for_section_border += 1;
        }
    }

    debug_assert!(new_start_index > start_index);
    let mut new_end_index = new_start_index - 1;
    if ranges[new_end_index] == border {
        new_end_index -= 1;
    }
    if border >= ranges[end_index] {
        border = ranges[end_index];
        new_start_index = end_index;
        new_end_index = end_index - 1;
    }
    (new_start_index, new_end_index, border)
}

/// Generates a series of checks against the segment boundaries of a
/// character class. A character between an even and an odd boundary
/// (counting from `start_index`) goes to `even_label`, otherwise to
/// `odd_label`. `None` labels mean backtrack; either label may equal
/// `fall_through`.
#[allow(clippy::too_many_arguments)]
fn generate_branches(
    masm: &mut dyn MacroAssembler,
    ranges: &mut Vec<u32>,
    start_index: usize,
    end_index: usize,
    min_char: u32,
    max_char: u32,
    fall_through: Label,
    even_label: Option<Label>,
    odd_label: Option<Label>,
) {
    debug_assert!(min_char < ranges[start_index]);
    let first = ranges[start_index];
    let last = ranges[end_index] - 1;

    // Just one boundary: test before/after a single character.
    if start_index == end_index {
        emit_boundary_test(masm, first, fall_through, even_label, odd_label);
        return;
    }

    // One interval in the middle that differs from the end intervals.
    if start_index + 1 == end_index {
        emit_double_boundary_test(masm, first, last, fall_through, even_label, odd_label);
        return;
    }

    // Table lookup does not pay off for very few intervals. Single
    // characters are tested first, arbitrary ranges in the second round.
    if end_index - start_index <= 6 {
        let mut cut = None;
        for i in start_index..end_index {
            if ranges[i] == ranges[i + 1] - 1 {
                cut = Some(i);
                break;
            }
        }
        let cut = cut.unwrap_or(start_index);
        cut_out_range(masm, ranges, start_index, end_index, cut, even_label, odd_label);
        debug_assert!(end_index - start_index >= 2);
        generate_branches(
            masm,
            ranges,
            start_index + 1,
            end_index - 1,
            min_char,
            max_char,
            fall_through,
            even_label,
            odd_label,
        );
        return;
    }

    // With many intervals, tables decide whether the character is inside
    // or outside the class.
    if (max_char >> TABLE_SIZE_BITS) == (min_char >> TABLE_SIZE_BITS) {
        emit_use_lookup_table(
            masm,
            ranges,
            start_index,
            end_index,
            min_char,
            fall_through,
            even_label,
            odd_label,
        );
        return;
    }

    if (min_char >> TABLE_SIZE_BITS) != (first >> TABLE_SIZE_BITS) {
        masm.check_character_lt(first as u16, odd_label);
        generate_branches(
            masm,
            ranges,
            start_index + 1,
            end_index,
            first,
            max_char,
            fall_through,
            odd_label,
            even_label,
        );
        return;
    }

    let (new_start_index, new_end_index, border) =
        split_search_space(ranges, start_index, end_index);

    let handle_rest = masm.create_label();
    let mut above = Some(handle_rest);
    if border == last + 1 {
        // No section starts after the limit, so everything above the
        // border goes to one of the terminal labels.
        above = if (end_index & 1) != (start_index & 1) { odd_label } else { even_label };
        debug_assert_eq!(new_end_index, end_index - 1);
    }

    debug_assert!(start_index <= new_end_index);
    debug_assert!(new_start_index <= end_index);
    debug_assert!(start_index < new_start_index);
    debug_assert!(new_end_index < end_index);
    debug_assert!(min_char < border - 1);
    debug_assert!(border < max_char);
    debug_assert!(ranges[new_end_index] < border);

    masm.check_character_gt((border - 1) as u16, above);
    let dummy = masm.create_label();
    generate_branches(
        masm,
        ranges,
        start_index,
        new_end_index,
        min_char,
        border - 1,
        dummy,
        even_label,
        odd_label,
    );
    if masm.is_linked(handle_rest) {
        masm.bind(handle_rest);
        let flip = (new_start_index & 1) != (start_index & 1);
        generate_branches(
            masm,
            ranges,
            new_start_index,
            end_index,
            border,
            max_char,
            dummy,
            if flip { odd_label } else { even_label },
            if flip { even_label } else { odd_label },
        );
    }
}

fn emit_char_class(
    masm: &mut dyn MacroAssembler,
    class: &ClassData,
    one_byte: bool,
    on_failure: Option<Label>,
    cp_offset: i32,
    check_offset: bool,
    preloaded: bool,
) {
    let mut ranges = class.ranges.clone();
    crate::ranges::canonicalize(&mut ranges);
    let max_char = max_char(one_byte);

    let mut last_valid_range: isize = ranges.len() as isize - 1;
    while last_valid_range >= 0 {
        if ranges[last_valid_range as usize].from <= max_char {
            break;
        }
        last_valid_range -= 1;
    }

    if last_valid_range < 0 {
        if !class.negated {
            masm.go_to(on_failure);
        }
        if check_offset {
            masm.check_position(cp_offset, on_failure);
        }
        return;
    }
    let last_valid_range = last_valid_range as usize;

    if last_valid_range == 0 && ranges[0].is_everything(max_char) {
        if class.negated {
            masm.go_to(on_failure);
        } else {
            // A common case hit by non-anchored expressions.
            if check_offset {
                masm.check_position(cp_offset, on_failure);
            }
        }
        return;
    }

    if !preloaded {
        masm.load_current_character(cp_offset, on_failure, check_offset, 1);
    }

    // A new list with ascending entries. Each entry is a code unit where
    // there is a boundary between code units that are part of the class
    // and code units that are not. Normally an entry at zero goes to the
    // failure label, but if there already is one there, that entry means
    // success. Subsequent entries alternate in meaning.
    let mut range_boundaries: Vec<u32> = Vec::with_capacity(last_valid_range * 2 + 2);
    let mut zeroth_entry_is_failure = !class.negated;
    for range in ranges.iter().take(last_valid_range + 1) {
        if range.from == 0 {
            zeroth_entry_is_failure = !zeroth_entry_is_failure;
        } else {
            range_boundaries.push(range.from);
        }
        range_boundaries.push(range.to + 1);
    }
    let mut end_index = range_boundaries.len() - 1;
    if range_boundaries[end_index] > max_char {
        end_index -= 1;
    }

    let fall_through = masm.create_label();
    let (even_label, odd_label) = if zeroth_entry_is_failure {
        (Some(fall_through), on_failure)
    } else {
        (on_failure, Some(fall_through))
    };
    generate_branches(
        masm,
        &mut range_boundaries,
        0,
        end_index,
        0,
        max_char,
        fall_through,
        even_label,
        odd_label,
    );
    masm.bind(fall_through);
}

// ---------------------------------------------------------------------
// Choice nodes.

struct AlternativeGeneration {
    possible_success: Label,
    expects_preload: bool,
    after: Label,
    quick_check_details: QuickCheckDetails,
}

const EATS_AT_LEAST_NOT_YET_INITIALIZED: i32 = -1;

struct PreloadState {
    preload_characters: usize,
    preload_is_current: bool,
    preload_has_checked_bounds: bool,
    eats_at_least: i32,
}

impl PreloadState {
    fn new() -> Self {
        Self {
            preload_characters: 0,
            preload_is_current: false,
            preload_has_checked_bounds: false,
            eats_at_least: EATS_AT_LEAST_NOT_YET_INITIALIZED,
        }
    }
}

fn calculate_preload_characters(masm: &dyn MacroAssembler, one_byte: bool, eats_at_least: i32) -> usize {
    let mut preload_characters = eats_at_least.clamp(0, 4) as usize;
    if masm.can_read_unaligned() {
        if one_byte {
            // There is no 3-character load, and a 4-character load could
            // read beyond the end of the subject.
            if preload_characters == 3 {
                preload_characters = 2;
            }
        } else if preload_characters > 2 {
            preload_characters = 2;
        }
    } else if preload_characters > 1 {
        preload_characters = 1;
    }
    preload_characters
}

fn choice_alternatives(c: &Compiler, node: NodeId) -> Vec<GuardedAlternative> {
    match &c.arena.get(node).variant {
        NodeVariant::Choice(choice) => choice.alternatives.clone(),
        _ => unreachable!(),
    }
}

fn choice_not_at_start(c: &Compiler, node: NodeId) -> bool {
    match &c.arena.get(node).variant {
        NodeVariant::Choice(choice) => choice.not_at_start,
        _ => unreachable!(),
    }
}

fn is_negative_lookaround(c: &Compiler, node: NodeId) -> bool {
    matches!(
        &c.arena.get(node).variant,
        NodeVariant::Choice(choice) if matches!(choice.kind, ChoiceKind::NegativeLookaround)
    )
}

fn emit_loop_choice(c: &mut Compiler, masm: &mut dyn MacroAssembler, node: NodeId, trace: &Trace) {
    if trace.stop_node() == Some(node) {
        // Back edge of the greedy-loop-optimized graph: the whole loop
        // body advanced the position by a known fixed amount.
        let alternatives = choice_alternatives(c, node);
        let text_length = c.arena.greedy_loop_text_length(node, alternatives[0].node);
        debug_assert_ne!(text_length, GREEDY_LOOP_TOO_COMPLEX);
        debug_assert_eq!(trace.cp_offset(), text_length);
        masm.advance_current_position(text_length);
        masm.go_to(trace.loop_label());
        return;
    }
    debug_assert!(trace.stop_node().is_none());
    if !trace.is_trivial() {
        trace.flush(c, masm, node);
        return;
    }
    emit_choice(c, masm, node, trace);
}

fn emit_choice(c: &mut Compiler, masm: &mut dyn MacroAssembler, node: NodeId, trace: &Trace) {
    let alternatives = choice_alternatives(c, node);
    let choice_count = alternatives.len();

    if choice_count == 1 && alternatives[0].guards.is_empty() {
        emit(c, masm, alternatives[0].node, trace);
        return;
    }

    // Guarded registers must not have deferred state in the trace.
    #[cfg(debug_assertions)]
    for alternative in alternatives.iter().take(choice_count - 1) {
        for guard in &alternative.guards {
            debug_assert!(!trace.mentions_reg(guard.reg));
        }
    }

    if limit_versions(c, masm, node, trace) == LimitResult::Done {
        return;
    }

    // Loop nodes were already flushed (see emit_loop_choice); other choice
    // nodes flush only when out of budget.
    if trace.flush_budget() == 0 && !trace.actions_is_empty() {
        trace.flush(c, masm, node);
        return;
    }

    c.recursion_depth += 1;

    let not_at_start = choice_not_at_start(c, node);
    let mut preload = PreloadState::new();
    // State for the greedy-loop fallback: backtracking into the loop
    // unwinds one iteration at a time through this label.
    let greedy_loop_label = masm.create_label();
    let mut counter_backtrack_trace = Trace::new();
    counter_backtrack_trace.set_backtrack(greedy_loop_label);
    if not_at_start {
        counter_backtrack_trace.set_at_start(TriBool::False);
    }

    let text_length = c.arena.greedy_loop_text_length(node, alternatives[0].node);
    let mut alt_gens: Vec<AlternativeGeneration> = (0..choice_count)
        .map(|_| AlternativeGeneration {
            possible_success: masm.create_label(),
            expects_preload: false,
            after: masm.create_label(),
            quick_check_details: QuickCheckDetails::new(0),
        })
        .collect();

    let emitted_greedy_loop = choice_count > 1 && text_length != GREEDY_LOOP_TOO_COMPLEX;
    let trace_for_continuation: Trace;
    if emitted_greedy_loop {
        emit_greedy_loop(
            c,
            masm,
            node,
            trace,
            &mut alt_gens,
            &mut preload,
            greedy_loop_label,
            &counter_backtrack_trace,
            text_length,
        );
        trace_for_continuation = counter_backtrack_trace;
    } else {
        preload.eats_at_least = emit_optimized_unanchored_search(c, masm, node, trace);
        emit_choices(c, masm, node, &mut alt_gens, 0, trace, &mut preload);
        trace_for_continuation = trace.clone();
    }

    // Now generate the slow checks for the alternatives where the quick
    // check was inlined, recognizable by their linked label.
    let new_flush_budget = trace_for_continuation.flush_budget() / choice_count as i32;
    for i in 0..choice_count {
        let mut new_trace = trace_for_continuation.clone();
        // If there are actions to be flushed, limit how many times they
        // are flushed by sharing the parent's budget fairly.
        if !new_trace.actions_is_empty() {
            new_trace.set_flush_budget(new_flush_budget);
        }
        let next_expects_preload =
            if i == choice_count - 1 { false } else { alt_gens[i + 1].expects_preload };
        emit_out_of_line_continuation(
            c,
            masm,
            node,
            &new_trace,
            &alternatives[i],
            &mut alt_gens[i],
            preload.preload_characters,
            next_expects_preload,
        );
    }

    c.recursion_depth -= 1;
}

/// Greedy loops over a fixed-length body push the loop entry position once
/// and step the position instead of pushing per-iteration backtrack
/// records. Backtracking decrements the position and checks it against the
/// pushed value.
#[allow(clippy::too_many_arguments)]
fn emit_greedy_loop(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
    alt_gens: &mut [AlternativeGeneration],
    preload: &mut PreloadState,
    greedy_loop_label: Label,
    counter_backtrack_trace: &Trace,
    text_length: i32,
) {
    debug_assert!(trace.stop_node().is_none());
    let alternatives = choice_alternatives(c, node);
    masm.push_current_position();
    let greedy_match_failed = masm.create_label();
    let mut greedy_match_trace = Trace::new();
    if choice_not_at_start(c, node) {
        greedy_match_trace.set_at_start(TriBool::False);
    }
    greedy_match_trace.set_backtrack(greedy_match_failed);
    let loop_label = masm.create_label();
    masm.bind(loop_label);
    greedy_match_trace.set_stop_node(node);
    greedy_match_trace.set_loop_label(loop_label);
    emit(c, masm, alternatives[0].node, &greedy_match_trace);
    masm.bind(greedy_match_failed);

    let second_choice = masm.create_label();
    masm.bind(second_choice);

    emit_choices(c, masm, node, alt_gens, 1, counter_backtrack_trace, preload);

    masm.bind(greedy_loop_label);
    // Unwound all the way down: backtrack out of the loop.
    masm.check_greedy_loop(trace.backtrack());
    // Otherwise try the lower-priority alternatives one step earlier.
    masm.advance_current_position(-text_length);
    masm.go_to(Some(second_choice));
}

/// The `.*?` loop prepended to unanchored patterns eats one arbitrary
/// character per iteration. When what follows pins down the first few
/// characters, a Boyer-Moore skip loop can stride over positions where no
/// match can start.
fn emit_optimized_unanchored_search(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
) -> i32 {
    let eats_at_least = EATS_AT_LEAST_NOT_YET_INITIALIZED;
    let alternatives = choice_alternatives(c, node);
    if alternatives.len() != 2 {
        return eats_at_least;
    }
    if !alternatives[1].guards.is_empty() {
        return eats_at_least;
    }
    let eats_anything_node = alternatives[1].node;
    if c.arena.successor_of_omnivorous_text_node(eats_anything_node, max_char(c.one_byte))
        != Some(node)
    {
        return eats_at_least;
    }

    // This is entered with a trivial trace (it is the entry of a loop), so
    // the generated code cannot backtrack and no preloaded characters can
    // be clobbered by the load instructions emitted here.
    debug_assert!(trace.is_trivial());
    let _ = trace;

    let cached = c.arena.get(node).bm_info[0].clone();
    let bm = match cached {
        Some(bm) => Some(bm),
        None => {
            let eats = MAX_LOOKAHEAD_FOR_BOYER_MOORE.min(c.arena.eats_at_least(
                node,
                MAX_LOOKAHEAD_FOR_BOYER_MOORE,
                RECURSION_BUDGET,
                false,
            ));
            if eats >= 1 {
                let mut bm = BoyerMooreLookahead::new(eats as usize, c.one_byte);
                let mut save = Vec::new();
                fill_in_bm_info(
                    c,
                    alternatives[0].node,
                    0,
                    RECURSION_BUDGET,
                    &mut bm,
                    false,
                    &mut save,
                );
                let bm = Rc::new(bm);
                save_bm_info(c, Rc::clone(&bm), false, &save);
                Some(bm)
            } else {
                None
            }
        }
    };
    if let Some(bm) = bm {
        bm.emit_skip_instructions(masm, &c.frequency_collator);
    }
    eats_at_least
}

fn set_up_preload(
    c: &mut Compiler,
    masm: &dyn MacroAssembler,
    node: NodeId,
    current_trace: &Trace,
    state: &mut PreloadState,
) {
    if state.eats_at_least == EATS_AT_LEAST_NOT_YET_INITIALIZED {
        // Save some time by looking at most one machine word ahead.
        state.eats_at_least = c.arena.eats_at_least(
            node,
            if c.one_byte { 4 } else { 2 },
            RECURSION_BUDGET,
            current_trace.at_start() == TriBool::False,
        );
    }
    state.preload_characters =
        calculate_preload_characters(masm, c.one_byte, state.eats_at_least);
    state.preload_is_current =
        current_trace.characters_preloaded() == state.preload_characters;
    state.preload_has_checked_bounds = state.preload_is_current;
}

fn generate_guard(masm: &mut dyn MacroAssembler, guard: &Guard, trace: &Trace) {
    match guard.op {
        GuardOp::Lt => masm.if_register_ge(guard.reg, guard.value, trace.backtrack()),
        GuardOp::Geq => masm.if_register_lt(guard.reg, guard.value, trace.backtrack()),
    }
}

fn emit_choices(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    alt_gens: &mut [AlternativeGeneration],
    first_choice: usize,
    trace: &Trace,
    preload: &mut PreloadState,
) {
    set_up_preload(c, masm, node, trace, preload);
    let alternatives = choice_alternatives(c, node);
    let not_at_start = choice_not_at_start(c, node);
    let negative_lookaround = is_negative_lookaround(c, node);
    let choice_count = alternatives.len();

    let new_flush_budget = trace.flush_budget() / choice_count as i32;

    for i in first_choice..choice_count {
        let is_last = i == choice_count - 1;
        let fall_through_on_failure = !is_last;
        let alternative = &alternatives[i];
        let alt_gen = &mut alt_gens[i];
        alt_gen.quick_check_details.set_characters(preload.preload_characters);
        let mut new_trace = trace.clone();
        new_trace.set_characters_preloaded(if preload.preload_is_current {
            preload.preload_characters
        } else {
            0
        });
        if preload.preload_has_checked_bounds {
            new_trace.set_bound_checked_up_to(preload.preload_characters as i32);
        }
        new_trace.clear_quick_check_performed();
        if not_at_start {
            new_trace.set_at_start(TriBool::False);
        }
        if !is_last {
            new_trace.set_backtrack(alt_gen.after);
        }
        alt_gen.expects_preload = preload.preload_is_current;
        let mut generate_full_check_inline = false;
        // The body of a negative lookaround gets no quick check; a failed
        // quick check there would have to mean overall success.
        let try_quick_check = !(negative_lookaround && i == 0);
        if c.optimize
            && try_quick_check
            && emit_quick_check(
                c,
                masm,
                alternative.node,
                trace,
                &new_trace,
                preload.preload_has_checked_bounds,
                alt_gen.possible_success,
                &mut alt_gen.quick_check_details,
                fall_through_on_failure,
            )
        {
            // A quick check was generated for this choice.
            preload.preload_is_current = true;
            preload.preload_has_checked_bounds = true;
            // On the last alternative the quick check backtracks on
            // failure, so the full check goes inline right here.
            if !fall_through_on_failure {
                masm.bind(alt_gen.possible_success);
                new_trace.set_quick_check_performed(&alt_gen.quick_check_details);
                new_trace.set_characters_preloaded(preload.preload_characters);
                new_trace.set_bound_checked_up_to(preload.preload_characters as i32);
                generate_full_check_inline = true;
            }
        } else if alt_gen.quick_check_details.cannot_match() {
            if !fall_through_on_failure {
                masm.go_to(trace.backtrack());
            }
            continue;
        } else {
            // No quick check. Emit the full code here. Slow checks from
            // previous alternatives land here on failure, and there is no
            // reason to insist that they preload characters the full code
            // below probably cannot use.
            if i != first_choice {
                alt_gen.expects_preload = false;
                new_trace.invalidate_current_character();
            }
            generate_full_check_inline = true;
        }
        if generate_full_check_inline {
            if !new_trace.actions_is_empty() {
                new_trace.set_flush_budget(new_flush_budget);
            }
            for guard in &alternative.guards {
                generate_guard(masm, guard, &new_trace);
            }
            emit(c, masm, alternative.node, &new_trace);
            preload.preload_is_current = false;
        }
        masm.bind(alt_gens[i].after);
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_out_of_line_continuation(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
    alternative: &GuardedAlternative,
    alt_gen: &mut AlternativeGeneration,
    preload_characters: usize,
    next_expects_preload: bool,
) {
    if !masm.is_linked(alt_gen.possible_success) {
        return;
    }

    masm.bind(alt_gen.possible_success);
    let mut out_of_line_trace = trace.clone();
    out_of_line_trace.set_characters_preloaded(preload_characters);
    out_of_line_trace.set_quick_check_performed(&alt_gen.quick_check_details);
    if choice_not_at_start(c, node) {
        out_of_line_trace.set_at_start(TriBool::False);
    }

    if next_expects_preload {
        let reload_current_char = masm.create_label();
        out_of_line_trace.set_backtrack(reload_current_char);
        for guard in &alternative.guards {
            generate_guard(masm, guard, &out_of_line_trace);
        }
        emit(c, masm, alternative.node, &out_of_line_trace);
        masm.bind(reload_current_char);
        // Reload the current character, since the next quick check expects
        // it. No bounds check is needed: this code is only reached through
        // a quick check that did a checked load.
        masm.load_current_character(trace.cp_offset(), None, false, preload_characters);
        masm.go_to(Some(alt_gen.after));
    } else {
        out_of_line_trace.set_backtrack(alt_gen.after);
        for guard in &alternative.guards {
            generate_guard(masm, guard, &out_of_line_trace);
        }
        emit(c, masm, alternative.node, &out_of_line_trace);
    }
}

// ---------------------------------------------------------------------
// Actions.

fn emit_action(c: &mut Compiler, masm: &mut dyn MacroAssembler, node: NodeId, trace: &Trace) {
    if limit_versions(c, masm, node, trace) == LimitResult::Done {
        return;
    }
    let (action, on_success) = match &c.arena.get(node).variant {
        NodeVariant::Action(a) => (a.action, a.on_success),
        _ => unreachable!(),
    };
    c.recursion_depth += 1;
    emit_action_inner(c, masm, node, trace, action, on_success);
    c.recursion_depth -= 1;
}

fn emit_action_inner(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
    action: Action,
    on_success: NodeId,
) {
    match action {
        Action::StorePosition { reg, is_capture } => {
            let mut new_trace = trace.clone();
            new_trace.add_action(DeferredAction::StorePosition {
                reg,
                is_capture,
                cp_offset: trace.cp_offset(),
            });
            emit(c, masm, on_success, &new_trace);
        }
        Action::IncrementRegister { reg } => {
            let mut new_trace = trace.clone();
            new_trace.add_action(DeferredAction::IncrementRegister { reg });
            emit(c, masm, on_success, &new_trace);
        }
        Action::SetRegister { reg, value } => {
            let mut new_trace = trace.clone();
            new_trace.add_action(DeferredAction::SetRegister { reg, value });
            emit(c, masm, on_success, &new_trace);
        }
        Action::ClearCaptures { from, to } => {
            let mut new_trace = trace.clone();
            new_trace.add_action(DeferredAction::ClearCaptures { from, to });
            emit(c, masm, on_success, &new_trace);
        }
        Action::BeginSubmatch { stack_reg, position_reg } => {
            if !trace.is_trivial() {
                trace.flush(c, masm, node);
            } else {
                masm.write_current_position_to_register(position_reg, 0);
                masm.write_stack_pointer_to_register(stack_reg);
                emit(c, masm, on_success, trace);
            }
        }
        Action::EmptyMatchCheck { start_reg, repetition_reg, repetition_limit } => {
            let know_dist = trace.stored_position(start_reg);
            let has_minimum = repetition_reg.is_some();
            match know_dist {
                Some(stored_pos) if !has_minimum && stored_pos == trace.cp_offset() => {
                    // Known not to have advanced, and no minimum: backtrack
                    // right away.
                    masm.go_to(trace.backtrack());
                }
                Some(stored_pos) if stored_pos < trace.cp_offset() => {
                    // Known to have advanced; the continuation follows
                    // unconditionally.
                    emit(c, masm, on_success, trace);
                }
                _ if !trace.is_trivial() => {
                    trace.flush(c, masm, node);
                }
                _ => {
                    let skip_empty_check = masm.create_label();
                    // Below the minimum repetition count, empty matches
                    // are still allowed.
                    if let Some(rep_reg) = repetition_reg {
                        masm.if_register_lt(
                            rep_reg,
                            repetition_limit as i32,
                            Some(skip_empty_check),
                        );
                    }
                    // If the match is empty, bail out; otherwise fall
                    // through to the continuation.
                    masm.if_register_eq_position(start_reg, trace.backtrack());
                    masm.bind(skip_empty_check);
                    emit(c, masm, on_success, trace);
                }
            }
        }
        Action::PositiveSubmatchSuccess {
            stack_reg,
            position_reg,
            clear_register_count,
            clear_register_from,
        } => {
            if !trace.is_trivial() {
                trace.flush(c, masm, node);
                return;
            }
            masm.read_current_position_from_register(position_reg);
            masm.read_stack_pointer_from_register(stack_reg);
            if clear_register_count == 0 {
                emit(c, masm, on_success, trace);
                return;
            }
            // Backtracking past the success must also clear the captures
            // made inside the lookaround body.
            let clear_registers_backtrack = masm.create_label();
            let mut new_trace = trace.clone();
            new_trace.set_backtrack(clear_registers_backtrack);
            emit(c, masm, on_success, &new_trace);

            masm.bind(clear_registers_backtrack);
            let clear_registers_to = clear_register_from + clear_register_count - 1;
            masm.clear_registers(clear_register_from, clear_registers_to);
            debug_assert!(trace.backtrack().is_none());
            masm.backtrack();
        }
    }
}

// ---------------------------------------------------------------------
// Assertions.

// Checks for [0-9A-Z_a-z].
fn emit_word_check(
    masm: &mut dyn MacroAssembler,
    word: Option<Label>,
    non_word: Option<Label>,
    fall_through_on_word: bool,
) {
    if masm.check_special_character_class(
        if fall_through_on_word { 'w' } else { 'W' },
        if fall_through_on_word { non_word } else { word },
    ) {
        // Optimized implementation available.
        return;
    }
    masm.check_character_gt(b'z' as u16, non_word);
    masm.check_character_lt(b'0' as u16, non_word);
    masm.check_character_gt(b'a' as u16 - 1, word);
    masm.check_character_lt(b'9' as u16 + 1, word);
    masm.check_character_lt(b'A' as u16, non_word);
    masm.check_character_lt(b'Z' as u16 + 1, word);
    if fall_through_on_word {
        masm.check_not_character(b'_' as u32, non_word);
    } else {
        masm.check_character(b'_' as u32, word);
    }
}

// Emits the code to check for a ^ in multiline mode: a one-character
// lookbehind that matches a newline or the start of input.
fn emit_hat(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    on_success: NodeId,
    trace: &Trace,
) {
    // The previous character is about to be loaded into the current
    // character register.
    let mut new_trace = trace.clone();
    new_trace.invalidate_current_character();

    let ok = masm.create_label();
    if new_trace.cp_offset() == 0 {
        // The start of input counts as a newline in this context.
        masm.check_at_start(Some(ok));
    }
    // We have established that we are not at the start of input, so it
    // must be safe to load the previous character.
    masm.load_current_character(new_trace.cp_offset() - 1, new_trace.backtrack(), false, 1);
    if !masm.check_special_character_class('n', new_trace.backtrack()) {
        // Newline means \n, \r, or one of 0x2028 and 0x2029.
        if !c.one_byte {
            masm.check_character_after_and(0x2028, 0xFFFE, Some(ok));
        }
        masm.check_character(b'\n' as u32, Some(ok));
        masm.check_not_character(b'\r' as u32, new_trace.backtrack());
    }
    masm.bind(ok);
    emit(c, masm, on_success, &new_trace);
}

#[derive(Clone, Copy, PartialEq)]
enum IfPrevious {
    IsWord,
    IsNonWord,
}

// Emits the code to handle \b and \B.
fn emit_boundary_check(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
) {
    let (kind, _) = match &c.arena.get(node).variant {
        NodeVariant::Assertion(a) => (a.kind, a.on_success),
        _ => unreachable!(),
    };
    let not_at_start = trace.at_start() == TriBool::False;
    // Decide what the character after the boundary looks like, if the
    // lookahead tables pin it down; that halves the runtime checks.
    let mut next_is_word_character = TriBool::Unknown;
    let cached = c.arena.get(node).bm_info[not_at_start as usize].clone();
    let lookahead = match cached {
        Some(bm) => Some(bm),
        None => {
            let eats_at_least = MAX_LOOKAHEAD_FOR_BOYER_MOORE.min(c.arena.eats_at_least(
                node,
                MAX_LOOKAHEAD_FOR_BOYER_MOORE,
                RECURSION_BUDGET,
                not_at_start,
            ));
            if eats_at_least >= 1 {
                let mut bm = BoyerMooreLookahead::new(eats_at_least as usize, c.one_byte);
                let mut save = Vec::new();
                fill_in_bm_info(c, node, 0, RECURSION_BUDGET, &mut bm, not_at_start, &mut save);
                let bm = Rc::new(bm);
                save_bm_info(c, Rc::clone(&bm), not_at_start, &save);
                Some(bm)
            } else {
                None
            }
        }
    };
    if let Some(bm) = &lookahead {
        if bm.at(0).is_non_word() {
            next_is_word_character = TriBool::False;
        }
        if bm.at(0).is_word() {
            next_is_word_character = TriBool::True;
        }
    }
    let at_boundary = kind == AssertionNodeKind::AtBoundary;
    if next_is_word_character == TriBool::Unknown {
        let before_non_word = masm.create_label();
        let before_word = masm.create_label();
        if trace.characters_preloaded() != 1 {
            masm.load_current_character(trace.cp_offset(), Some(before_non_word), true, 1);
        }
        // Fall through on word.
        emit_word_check(masm, Some(before_word), Some(before_non_word), false);
        // Next character is not a word character.
        masm.bind(before_non_word);
        let ok = masm.create_label();
        backtrack_if_previous(
            c,
            masm,
            node,
            trace,
            if at_boundary { IfPrevious::IsNonWord } else { IfPrevious::IsWord },
        );
        masm.go_to(Some(ok));

        masm.bind(before_word);
        backtrack_if_previous(
            c,
            masm,
            node,
            trace,
            if at_boundary { IfPrevious::IsWord } else { IfPrevious::IsNonWord },
        );
        masm.bind(ok);
    } else if next_is_word_character == TriBool::True {
        backtrack_if_previous(
            c,
            masm,
            node,
            trace,
            if at_boundary { IfPrevious::IsWord } else { IfPrevious::IsNonWord },
        );
    } else {
        backtrack_if_previous(
            c,
            masm,
            node,
            trace,
            if at_boundary { IfPrevious::IsNonWord } else { IfPrevious::IsWord },
        );
    }
}

fn backtrack_if_previous(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
    backtrack_if_previous: IfPrevious,
) {
    let on_success = c.arena.on_success(node).unwrap();
    let mut new_trace = trace.clone();
    new_trace.invalidate_current_character();

    let fall_through = masm.create_label();
    let dummy = masm.create_label();

    let (word, non_word) = if backtrack_if_previous == IfPrevious::IsNonWord {
        (Some(fall_through), new_trace.backtrack())
    } else {
        (new_trace.backtrack(), Some(fall_through))
    };

    if new_trace.cp_offset() == 0 {
        // The start of input counts as a non-word character, which decides
        // the question if we are at the start.
        masm.check_at_start(non_word);
    }
    // We have established that we are not at the start of input, so it
    // must be safe to load the previous character.
    masm.load_current_character(new_trace.cp_offset() - 1, Some(dummy), false, 1);
    emit_word_check(masm, word, non_word, backtrack_if_previous == IfPrevious::IsNonWord);

    masm.bind(fall_through);
    emit(c, masm, on_success, &new_trace);
}

fn emit_assertion(c: &mut Compiler, masm: &mut dyn MacroAssembler, node: NodeId, trace: &Trace) {
    let (kind, on_success) = match &c.arena.get(node).variant {
        NodeVariant::Assertion(a) => (a.kind, a.on_success),
        _ => unreachable!(),
    };
    match kind {
        AssertionNodeKind::AtEnd => {
            let ok = masm.create_label();
            masm.check_position(trace.cp_offset(), Some(ok));
            masm.go_to(trace.backtrack());
            masm.bind(ok);
        }
        AssertionNodeKind::AtStart => {
            if trace.at_start() == TriBool::False {
                masm.go_to(trace.backtrack());
                return;
            }
            if trace.at_start() == TriBool::Unknown {
                masm.check_not_at_start(trace.cp_offset(), trace.backtrack());
                let mut at_start_trace = trace.clone();
                at_start_trace.set_at_start(TriBool::True);
                emit(c, masm, on_success, &at_start_trace);
                return;
            }
        }
        AssertionNodeKind::AfterNewline => {
            emit_hat(c, masm, on_success, trace);
            return;
        }
        AssertionNodeKind::AtBoundary | AssertionNodeKind::AtNonBoundary => {
            emit_boundary_check(c, masm, node, trace);
            return;
        }
    }
    emit(c, masm, on_success, trace);
}

// ---------------------------------------------------------------------
// Back references and end nodes.

fn emit_back_reference(
    c: &mut Compiler,
    masm: &mut dyn MacroAssembler,
    node: NodeId,
    trace: &Trace,
) {
    if !trace.is_trivial() {
        trace.flush(c, masm, node);
        return;
    }

    if limit_versions(c, masm, node, trace) == LimitResult::Done {
        return;
    }

    let (start_reg, end_reg, read_backward, on_success) =
        match &c.arena.get(node).variant {
            NodeVariant::BackReference(b) => {
                (b.start_reg, b.end_reg, b.read_backward, b.on_success)
            }
            _ => unreachable!(),
        };
    debug_assert_eq!(start_reg + 1, end_reg);

    c.recursion_depth += 1;
    if c.flags.ignore_case() {
        masm.check_not_back_reference_ignore_case(
            start_reg,
            read_backward,
            c.flags.unicode(),
            trace.backtrack(),
        );
    } else {
        masm.check_not_back_reference(start_reg, read_backward, trace.backtrack());
    }
    let mut new_trace = trace.clone();
    // Advancing backward may land back on the start of input.
    if read_backward {
        new_trace.set_at_start(TriBool::Unknown);
    }
    // A back reference must not end in the middle of a surrogate pair.
    if c.flags.unicode() && !c.one_byte {
        masm.check_not_in_surrogate_pair(new_trace.cp_offset(), new_trace.backtrack());
    }
    emit(c, masm, on_success, &new_trace);
    c.recursion_depth -= 1;
}

fn emit_end(c: &mut Compiler, masm: &mut dyn MacroAssembler, node: NodeId, trace: &Trace) {
    let negative_submatch =
        matches!(&c.arena.get(node).variant, NodeVariant::End(EndData::NegativeSubmatchSuccess { .. }));

    if negative_submatch {
        // The trace is not flushed: the whole virtual frame is about to be
        // discarded anyway.
        let label = c.node_label(masm, node);
        if !masm.is_bound(label) {
            // This code ignores the trace entirely, so it doubles as the
            // generic version.
            masm.bind(label);
        }
        let NodeVariant::End(EndData::NegativeSubmatchSuccess {
            stack_reg,
            position_reg,
            clear_register_count,
            clear_register_from,
        }) = &c.arena.get(node).variant
        else {
            unreachable!();
        };
        let (stack_reg, position_reg) = (*stack_reg, *position_reg);
        let (clear_count, clear_from) = (*clear_register_count, *clear_register_from);
        // Throw away everything on the backtrack stack since the start of
        // the submatch and restore the position.
        masm.read_current_position_from_register(position_reg);
        masm.read_stack_pointer_from_register(stack_reg);
        if clear_count > 0 {
            // Clear any captures performed during the successful body of
            // the lookaround.
            masm.clear_registers(clear_from, clear_from + clear_count - 1);
        }
        // The unwound stack has, at its top, the backtrack target saved by
        // the submatch entry.
        masm.backtrack();
        return;
    }

    if !trace.is_trivial() {
        trace.flush(c, masm, node);
        return;
    }
    let label = c.node_label(masm, node);
    if !masm.is_bound(label) {
        masm.bind(label);
    }
    match &c.arena.get(node).variant {
        NodeVariant::End(EndData::Accept) => masm.succeed(),
        NodeVariant::End(EndData::Backtrack) => masm.go_to(trace.backtrack()),
        _ => unreachable!(),
    }
}
