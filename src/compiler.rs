/*!
The compiler: lowers a syntax tree into the node graph, runs the
optimization passes and drives code emission.

Lowering is a straightforward syntax-directed walk. Each construct is given
its continuation (`on_success`) and returns the entry node of its own code:
captures become position-store actions around their body, quantifiers
become a loop choice with a counter and guards, lookarounds become
submatches. The whole pattern is wrapped in capture 0, and unanchored
patterns get a non-greedy `.*?` loop prepended so the compiled code finds
the match start itself.

Emission walks the graph recursively. Recursion depth is bounded; when the
bound is hit, a jump to the node's label is emitted instead and the node
goes on a work list to have its generic code emitted later. The work list
is drained last-in-first-out, so the deepest nodes are finalized first.
*/

use std::sync::Arc;

use log::{debug, trace};

use crate::analysis::Analysis;
use crate::ast::{AssertionKind, ClassSet, CompileData, TextPart, Tree, MAX_MATCHES};
use crate::boyer_moore::FrequencyCollator;
use crate::codegen::bytecode::{BytecodeAssembler, Program};
use crate::codegen::{GlobalMode, Label, MacroAssembler, Mode};
use crate::emit;
use crate::exec::Subject;
use crate::filter::filter_one_byte;
use crate::nodes::{
    Action, ActionData, AssertionData, AssertionNodeKind, BackRefData, ChoiceData,
    ChoiceKind, ClassData, EndData, Guard, GuardOp, GuardedAlternative, LoopData,
    NodeArena, NodeId, NodeVariant, TextData, TextElem, TextElement,
};
use crate::ranges::{CaseFolder, CharacterRange, NEWLINE_RANGES};
use crate::trace::Trace;
use crate::{Error, Flags, LEAD_SURROGATE_END, LEAD_SURROGATE_START, TRAIL_SURROGATE_END,
    TRAIL_SURROGATE_START};

/// Deepest the emitter may recurse before deferring a node to the work
/// list.
pub(crate) const MAX_RECURSION: i32 = 100;

/// Budget for the graph walks that estimate properties like eats-at-least.
pub(crate) const RECURSION_BUDGET: i32 = 200;

/// Most specialized copies of one node's code before forcing the generic
/// version.
pub(crate) const MAX_COPIES_CODE_GENERATED: u32 = 10;

/// How many characters of lookahead the Boyer-Moore tables cover at most.
pub(crate) const MAX_LOOKAHEAD_FOR_BOYER_MOORE: i32 = 8;

/// In a pattern this short stepping forward cannot pay for the extra
/// logic.
pub(crate) const PATTERN_TOO_SHORT_FOR_BOYER_MOORE: usize = 2;

/// End-anchored patterns with a maximum match length below this start
/// their scan from the subject end.
pub(crate) const MAX_BACKSEARCH_LIMIT: u32 = 1024;

/// Patterns longer than this are not worth aggressive optimization.
const REGEXP_TOO_LARGE_TO_OPTIMIZE: usize = 20 * 1024;

/// Code units sampled from the subject for the frequency collator.
const SAMPLE_SIZE: usize = 128;

pub(crate) struct Compiler {
    pub arena: NodeArena,
    pub next_register: usize,
    max_register: usize,
    unicode_lookaround_stack_register: Option<usize>,
    unicode_lookaround_position_register: Option<usize>,
    pub work_list: Vec<NodeId>,
    pub recursion_depth: i32,
    pub one_byte: bool,
    reg_exp_too_big: bool,
    pub limiting_recursion: bool,
    pub optimize: bool,
    pub read_backward: bool,
    pub frequency_collator: FrequencyCollator,
    pub flags: Flags,
    pub case_folder: Arc<dyn CaseFolder>,
    pub accept: NodeId,
}

impl Compiler {
    fn new(
        capture_count: usize,
        one_byte: bool,
        flags: Flags,
        case_folder: Arc<dyn CaseFolder>,
        max_register: usize,
    ) -> Self {
        let mut arena = NodeArena::new();
        let accept = arena.add(NodeVariant::End(EndData::Accept));
        Self {
            arena,
            next_register: 2 * (capture_count + 1),
            max_register,
            unicode_lookaround_stack_register: None,
            unicode_lookaround_position_register: None,
            work_list: Vec::new(),
            recursion_depth: 0,
            one_byte,
            reg_exp_too_big: false,
            limiting_recursion: false,
            optimize: true,
            read_backward: false,
            frequency_collator: FrequencyCollator::new(),
            flags,
            case_folder,
            accept,
        }
    }

    pub fn allocate_register(&mut self) -> usize {
        if self.next_register >= self.max_register {
            self.reg_exp_too_big = true;
            return self.next_register;
        }
        let reg = self.next_register;
        self.next_register += 1;
        reg
    }

    pub fn set_reg_exp_too_big(&mut self) {
        self.reg_exp_too_big = true;
    }

    pub fn keep_recursing(&self) -> bool {
        !self.limiting_recursion && self.recursion_depth <= MAX_RECURSION
    }

    /// Queues `node` for generic code generation, once.
    pub fn add_work(&mut self, node: NodeId) {
        let n = self.arena.get_mut(node);
        if !n.on_work_list {
            n.on_work_list = true;
            self.work_list.push(node);
        }
    }

    /// The label of a node's generic code, created on first use.
    pub fn node_label(&mut self, masm: &mut dyn MacroAssembler, node: NodeId) -> Label {
        if let Some(label) = self.arena.get(node).label {
            return label;
        }
        let label = masm.create_label();
        self.arena.get_mut(node).label = Some(label);
        label
    }

    fn unicode_lookaround_stack_register(&mut self) -> usize {
        if self.unicode_lookaround_stack_register.is_none() {
            self.unicode_lookaround_stack_register = Some(self.allocate_register());
        }
        self.unicode_lookaround_stack_register.unwrap()
    }

    fn unicode_lookaround_position_register(&mut self) -> usize {
        if self.unicode_lookaround_position_register.is_none() {
            self.unicode_lookaround_position_register = Some(self.allocate_register());
        }
        self.unicode_lookaround_position_register.unwrap()
    }
}

/// Result of compiling a pattern for one subject width.
pub(crate) struct CompilationResult {
    pub program: Program,
    pub num_registers: usize,
}

/// Compiles `data` into a program for subjects of the given width.
pub(crate) fn compile(
    data: &CompileData,
    flags: Flags,
    pattern: &str,
    sample_subject: &Subject,
    is_one_byte: bool,
    case_folder: Arc<dyn CaseFolder>,
) -> Result<CompilationResult, Error> {
    let mut masm =
        BytecodeAssembler::new(if is_one_byte { Mode::OneByte } else { Mode::TwoByte });
    if (data.capture_count + 1) * 2 - 1 > masm.max_register() {
        return Err(Error::TooBig);
    }
    let max_register = masm.max_register();
    let mut c = Compiler::new(
        data.capture_count,
        is_one_byte,
        flags,
        case_folder,
        max_register,
    );
    c.optimize = pattern.len() <= REGEXP_TOO_LARGE_TO_OPTIMIZE;

    // Sample some characters from the middle of the subject.
    let subject_len = sample_subject.len();
    let half_way = subject_len.saturating_sub(SAMPLE_SIZE) / 2;
    for i in half_way..subject_len.min(half_way + SAMPLE_SIZE) {
        c.frequency_collator.count_character(sample_subject.get(i));
    }

    // Wrap the body of the regexp in capture #0.
    let accept = c.accept;
    let captured_body = capture_to_node(&mut c, &data.tree, 0, accept);
    let mut node = captured_body;
    let is_end_anchored = data.tree.is_anchored_at_end();
    let is_start_anchored = data.tree.is_anchored_at_start();
    let max_length = data.tree.max_match();

    if !is_start_anchored && !flags.sticky() {
        // Add a .*? at the beginning, outside the body capture, so the
        // compiled code finds the start of the match by itself.
        let star = Tree::Class(ClassSet {
            ranges: vec![CharacterRange::everything()],
            negated: false,
        });
        let loop_node = quantifier_to_node(
            &mut c,
            0,
            MAX_MATCHES,
            false,
            &star,
            captured_body,
            data.contains_anchor,
        );
        if data.contains_anchor {
            // Unroll the loop once, to take care of the case where the
            // match might start at the start of input.
            let step = text_node_for_ranges(
                &mut c,
                vec![CharacterRange::everything()],
                false,
                loop_node,
            );
            let first_step_node = c.arena.add(NodeVariant::Choice(ChoiceData {
                alternatives: vec![
                    GuardedAlternative::new(captured_body),
                    GuardedAlternative::new(step),
                ],
                kind: ChoiceKind::Plain,
                not_at_start: false,
            }));
            node = first_step_node;
        } else {
            node = loop_node;
        }
    }

    if is_one_byte {
        let filtered = filter_one_byte(&mut c, node, MAX_RECURSION);
        // Do it again to propagate the new nodes to places where they were
        // not put because they had not been calculated yet.
        let filtered = match filtered {
            Some(n) => filter_one_byte(&mut c, n, MAX_RECURSION),
            None => None,
        };
        node = match filtered {
            Some(n) => n,
            None => c.arena.add(NodeVariant::End(EndData::Backtrack)),
        };
    } else if flags.unicode() && (flags.global() || flags.sticky()) {
        node = optionally_step_back_to_lead_surrogate(&mut c, node);
    }

    let mut analysis = Analysis::new(is_one_byte);
    analysis.ensure_analyzed(&mut c, node);
    analysis.into_result()?;

    // This depends on information in the syntax tree that is not
    // replicated in the node graph, which is why it happens here rather
    // than during assembly.
    if is_end_anchored
        && !is_start_anchored
        && !flags.sticky()
        && max_length < MAX_BACKSEARCH_LIMIT
    {
        masm.set_current_position_from_end(max_length);
    }

    if flags.global() {
        let mode = if data.tree.min_match() > 0 {
            GlobalMode::GlobalNoZeroLengthCheck
        } else if flags.unicode() {
            GlobalMode::GlobalUnicode
        } else {
            GlobalMode::Global
        };
        masm.set_global_mode(mode);
    }

    assemble(&mut c, &mut masm, node)?;
    debug!(
        "compiled /{pattern}/ for {} subjects, {} registers",
        if is_one_byte { "one-byte" } else { "two-byte" },
        c.next_register
    );
    Ok(CompilationResult { program: masm.get_code(), num_registers: c.next_register })
}

fn assemble(
    c: &mut Compiler,
    masm: &mut BytecodeAssembler,
    start: NodeId,
) -> Result<(), Error> {
    let fail = masm.create_label();
    masm.push_backtrack(fail);
    emit::emit(c, masm, start, &Trace::new());
    masm.bind(fail);
    masm.fail();
    while let Some(node) = c.work_list.pop() {
        c.arena.get_mut(node).on_work_list = false;
        let label = c.node_label(masm, node);
        if !masm.is_bound(label) {
            emit::emit(c, masm, node, &Trace::new());
        }
    }
    if c.reg_exp_too_big {
        masm.abort_code_generation();
        trace!("aborting code generation, regexp too big");
        return Err(Error::TooBig);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Lowering from the syntax tree to the node graph.

pub(crate) fn to_node(c: &mut Compiler, tree: &Tree, on_success: NodeId) -> NodeId {
    match tree {
        Tree::Empty => on_success,
        Tree::Atom(data) => {
            let read_backward = c.read_backward;
            c.arena.add(NodeVariant::Text(TextData {
                elements: vec![TextElement::new(TextElem::Atom { chars: data.clone() })],
                read_backward,
                on_success,
            }))
        }
        Tree::Class(class) => {
            let read_backward = c.read_backward;
            c.arena.add(NodeVariant::Text(TextData {
                elements: vec![TextElement::new(class_elem(class))],
                read_backward,
                on_success,
            }))
        }
        Tree::Text(parts) => {
            let elements = parts
                .iter()
                .map(|part| match part {
                    TextPart::Atom(chars) => {
                        TextElement::new(TextElem::Atom { chars: chars.clone() })
                    }
                    TextPart::Class(class) => TextElement::new(class_elem(class)),
                })
                .collect();
            let read_backward = c.read_backward;
            c.arena.add(NodeVariant::Text(TextData {
                elements,
                read_backward,
                on_success,
            }))
        }
        Tree::Alternation(alternatives) => {
            let nodes: Vec<GuardedAlternative> = alternatives
                .iter()
                .map(|alt| GuardedAlternative::new(to_node(c, alt, on_success)))
                .collect();
            c.arena.add(NodeVariant::Choice(ChoiceData {
                alternatives: nodes,
                kind: ChoiceKind::Plain,
                not_at_start: false,
            }))
        }
        Tree::Sequence(children) => {
            let mut current = on_success;
            if c.read_backward {
                for child in children.iter() {
                    current = to_node(c, child, current);
                }
            } else {
                for child in children.iter().rev() {
                    current = to_node(c, child, current);
                }
            }
            current
        }
        Tree::Quantifier { min, max, greedy, body } => {
            quantifier_to_node(c, *min, *max, *greedy, body, on_success, false)
        }
        Tree::Capture { index, body } => capture_to_node(c, body, *index, on_success),
        Tree::Assertion(kind) => assertion_to_node(c, *kind, on_success),
        Tree::BackReference(index) => {
            let read_backward = c.read_backward;
            c.arena.add(NodeVariant::BackReference(BackRefData {
                start_reg: 2 * index,
                end_reg: 2 * index + 1,
                read_backward,
                on_success,
            }))
        }
        Tree::Lookaround { positive, behind, body } => {
            lookaround_to_node(c, *positive, *behind, body, on_success)
        }
    }
}

fn class_elem(class: &ClassSet) -> TextElem {
    TextElem::Class(ClassData { ranges: class.ranges.clone(), negated: class.negated })
}

fn text_node_for_ranges(
    c: &mut Compiler,
    ranges: Vec<CharacterRange>,
    read_backward: bool,
    on_success: NodeId,
) -> NodeId {
    c.arena.add(NodeVariant::Text(TextData {
        elements: vec![TextElement::new(TextElem::Class(ClassData {
            ranges,
            negated: false,
        }))],
        read_backward,
        on_success,
    }))
}

fn capture_to_node(
    c: &mut Compiler,
    body: &Tree,
    index: usize,
    on_success: NodeId,
) -> NodeId {
    let mut start_reg = 2 * index;
    let mut end_reg = 2 * index + 1;
    if c.read_backward {
        std::mem::swap(&mut start_reg, &mut end_reg);
    }
    let store_end = c.arena.add(NodeVariant::Action(ActionData {
        action: Action::StorePosition { reg: end_reg, is_capture: true },
        on_success,
    }));
    let body_node = to_node(c, body, store_end);
    c.arena.add(NodeVariant::Action(ActionData {
        action: Action::StorePosition { reg: start_reg, is_capture: true },
        on_success: body_node,
    }))
}

// A quantifier x{f, t} becomes this:
//
//   (r++)<-.
//   |      `
//   |      (x)
//   v      ^
//   (r=0)-->(?)---/ [if r < t]
//   |
//   [if r >= f]
//
fn quantifier_to_node(
    c: &mut Compiler,
    min: u32,
    max: u32,
    greedy: bool,
    body: &Tree,
    on_success: NodeId,
    not_at_start: bool,
) -> NodeId {
    if max == 0 {
        return on_success;
    }
    let body_can_be_empty = body.min_match() == 0;
    let capture_registers = body.capture_registers();
    let needs_capture_clearing = capture_registers.is_some();
    let body_start_reg =
        if body_can_be_empty { Some(c.allocate_register()) } else { None };
    let has_min = min > 0;
    let has_max = max < MAX_MATCHES;
    let needs_counter = has_min || has_max;
    let reg_ctr = if needs_counter { Some(c.allocate_register()) } else { None };

    let read_backward = c.read_backward;
    let center = c.arena.add(NodeVariant::Choice(ChoiceData {
        alternatives: Vec::new(),
        kind: ChoiceKind::Loop(LoopData {
            loop_node: None,
            continue_node: None,
            body_can_be_zero_length: body_can_be_empty,
            read_backward,
        }),
        not_at_start,
    }));

    let mut loop_return = match reg_ctr {
        Some(reg) => c.arena.add(NodeVariant::Action(ActionData {
            action: Action::IncrementRegister { reg },
            on_success: center,
        })),
        None => center,
    };
    if let Some(start_reg) = body_start_reg {
        // If the body can be empty we need to check if it was and then
        // backtrack.
        loop_return = c.arena.add(NodeVariant::Action(ActionData {
            action: Action::EmptyMatchCheck {
                start_reg,
                repetition_reg: reg_ctr,
                repetition_limit: min,
            },
            on_success: loop_return,
        }));
    }
    let mut body_node = to_node(c, body, loop_return);
    if let Some(start_reg) = body_start_reg {
        // Store the start position so empty matches can be outlawed as
        // described above.
        body_node = c.arena.add(NodeVariant::Action(ActionData {
            action: Action::StorePosition { reg: start_reg, is_capture: false },
            on_success: body_node,
        }));
    }
    if needs_capture_clearing {
        // Captures from the previous iteration must not leak into the
        // next one.
        let (from, to) = capture_registers.unwrap();
        body_node = c.arena.add(NodeVariant::Action(ActionData {
            action: Action::ClearCaptures { from, to },
            on_success: body_node,
        }));
    }
    let mut body_alt = GuardedAlternative::new(body_node);
    if has_max {
        body_alt.add_guard(Guard { reg: reg_ctr.unwrap(), op: GuardOp::Lt, value: max as i32 });
    }
    let mut rest_alt = GuardedAlternative::new(on_success);
    if has_min {
        rest_alt.add_guard(Guard { reg: reg_ctr.unwrap(), op: GuardOp::Geq, value: min as i32 });
    }
    {
        let NodeVariant::Choice(choice) = &mut c.arena.get_mut(center).variant else {
            unreachable!();
        };
        let ChoiceKind::Loop(data) = &mut choice.kind else { unreachable!() };
        if greedy {
            data.loop_node = Some(body_alt.node);
            data.continue_node = Some(rest_alt.node);
            choice.alternatives.push(body_alt);
            choice.alternatives.push(rest_alt);
        } else {
            data.continue_node = Some(rest_alt.node);
            data.loop_node = Some(body_alt.node);
            choice.alternatives.push(rest_alt);
            choice.alternatives.push(body_alt);
        }
    }
    match reg_ctr {
        Some(reg) => c.arena.add(NodeVariant::Action(ActionData {
            action: Action::SetRegister { reg, value: 0 },
            on_success: center,
        })),
        None => center,
    }
}

fn assertion_to_node(
    c: &mut Compiler,
    kind: AssertionKind,
    on_success: NodeId,
) -> NodeId {
    match kind {
        AssertionKind::StartOfInput => {
            let node = c.arena.add(NodeVariant::Assertion(AssertionData {
                kind: AssertionNodeKind::AtStart,
                on_success,
            }));
            c.arena.get_mut(node).info.follows_start_interest = true;
            node
        }
        AssertionKind::StartOfLine => {
            let node = c.arena.add(NodeVariant::Assertion(AssertionData {
                kind: AssertionNodeKind::AfterNewline,
                on_success,
            }));
            c.arena.get_mut(node).info.follows_newline_interest = true;
            node
        }
        AssertionKind::EndOfInput => c.arena.add(NodeVariant::Assertion(AssertionData {
            kind: AssertionNodeKind::AtEnd,
            on_success,
        })),
        AssertionKind::Boundary | AssertionKind::NonBoundary => {
            let node_kind = if kind == AssertionKind::Boundary {
                AssertionNodeKind::AtBoundary
            } else {
                AssertionNodeKind::AtNonBoundary
            };
            let node = c.arena.add(NodeVariant::Assertion(AssertionData {
                kind: node_kind,
                on_success,
            }));
            c.arena.get_mut(node).info.follows_word_interest = true;
            node
        }
        AssertionKind::EndOfLine => {
            // A multiline $ is an alternation between a positive lookahead
            // for a newline and an end-of-input check. The lookahead needs
            // two registers.
            let stack_pointer_register = c.allocate_register();
            let position_register = c.allocate_register();
            let submatch_success = c.arena.add(NodeVariant::Action(ActionData {
                action: Action::PositiveSubmatchSuccess {
                    stack_reg: stack_pointer_register,
                    position_reg: position_register,
                    clear_register_count: 0,
                    clear_register_from: 0,
                },
                on_success,
            }));
            let newline_matcher =
                text_node_for_ranges(c, NEWLINE_RANGES.to_vec(), false, submatch_success);
            let end_of_line = c.arena.add(NodeVariant::Action(ActionData {
                action: Action::BeginSubmatch {
                    stack_reg: stack_pointer_register,
                    position_reg: position_register,
                },
                on_success: newline_matcher,
            }));
            let at_end = c.arena.add(NodeVariant::Assertion(AssertionData {
                kind: AssertionNodeKind::AtEnd,
                on_success,
            }));
            c.arena.add(NodeVariant::Choice(ChoiceData {
                alternatives: vec![
                    GuardedAlternative::new(end_of_line),
                    GuardedAlternative::new(at_end),
                ],
                kind: ChoiceKind::Plain,
                not_at_start: false,
            }))
        }
    }
}

fn lookaround_to_node(
    c: &mut Compiler,
    positive: bool,
    behind: bool,
    body: &Tree,
    on_success: NodeId,
) -> NodeId {
    let stack_pointer_register = c.allocate_register();
    let position_register = c.allocate_register();
    let (clear_register_from, clear_register_count) = match body.capture_registers() {
        Some((from, to)) => (from, to - from + 1),
        None => (0, 0),
    };
    let was_reading_backward = c.read_backward;
    c.read_backward = behind;
    let result = if positive {
        let success = c.arena.add(NodeVariant::Action(ActionData {
            action: Action::PositiveSubmatchSuccess {
                stack_reg: stack_pointer_register,
                position_reg: position_register,
                clear_register_count,
                clear_register_from,
            },
            on_success,
        }));
        let body_node = to_node(c, body, success);
        c.arena.add(NodeVariant::Action(ActionData {
            action: Action::BeginSubmatch {
                stack_reg: stack_pointer_register,
                position_reg: position_register,
            },
            on_success: body_node,
        }))
    } else {
        // A choice node has most of what a negative lookaround needs: the
        // body as the first alternative and the continuation as the
        // second. When the body matches, the negative-submatch-success end
        // unwinds everything the choice set up and backtracks, and when it
        // fails the second alternative is tried, which is exactly the
        // desired behaviour.
        let success = c.arena.add(NodeVariant::End(EndData::NegativeSubmatchSuccess {
            stack_reg: stack_pointer_register,
            position_reg: position_register,
            clear_register_count,
            clear_register_from,
        }));
        let body_node = to_node(c, body, success);
        let choice = c.arena.add(NodeVariant::Choice(ChoiceData {
            alternatives: vec![
                GuardedAlternative::new(body_node),
                GuardedAlternative::new(on_success),
            ],
            kind: ChoiceKind::NegativeLookaround,
            not_at_start: false,
        }));
        c.arena.add(NodeVariant::Action(ActionData {
            action: Action::BeginSubmatch {
                stack_reg: stack_pointer_register,
                position_reg: position_register,
            },
            on_success: choice,
        }))
    };
    c.read_backward = was_reading_backward;
    result
}

/// When matching can start in the middle of a surrogate pair, steps back
/// to the lead surrogate first: a lookahead matches the trail surrogate at
/// the current position, and on its success a backward-reading text node
/// consumes the lead surrogate.
fn optionally_step_back_to_lead_surrogate(c: &mut Compiler, on_success: NodeId) -> NodeId {
    debug_assert!(!c.read_backward);
    let lead_surrogates =
        vec![CharacterRange::new(LEAD_SURROGATE_START, LEAD_SURROGATE_END)];
    let trail_surrogates =
        vec![CharacterRange::new(TRAIL_SURROGATE_START, TRAIL_SURROGATE_END)];

    let stack_register = c.unicode_lookaround_stack_register();
    let position_register = c.unicode_lookaround_position_register();

    let step_back = text_node_for_ranges(c, lead_surrogates, true, on_success);
    let match_success = c.arena.add(NodeVariant::Action(ActionData {
        action: Action::PositiveSubmatchSuccess {
            stack_reg: stack_register,
            position_reg: position_register,
            clear_register_count: 0,
            clear_register_from: 0,
        },
        on_success: step_back,
    }));
    let match_trail = text_node_for_ranges(c, trail_surrogates, false, match_success);
    let for_match = c.arena.add(NodeVariant::Action(ActionData {
        action: Action::BeginSubmatch {
            stack_reg: stack_register,
            position_reg: position_register,
        },
        on_success: match_trail,
    }));

    c.arena.add(NodeVariant::Choice(ChoiceData {
        alternatives: vec![
            GuardedAlternative::new(for_match),
            GuardedAlternative::new(on_success),
        ],
        kind: ChoiceKind::Plain,
        not_at_start: false,
    }))
}
