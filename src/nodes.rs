/*!
The node graph the compiler lowers a syntax tree into.

Nodes represent states of a match in progress: text to consume, a choice
between alternatives, a register action, an assertion, a back reference, or
an end state. The graph is a DAG; a node can be the successor of many
others. All nodes live in a [`NodeArena`] owned by the compile in progress
and are referenced by [`NodeId`], so sharing needs no reference counting and
the whole graph is dropped at once when the compile finishes.

Each node carries, besides its variant, the bookkeeping the passes need: a
deferred code location, transient analysis bits, the work-list flag, a
counter capping how many specialized copies of its code may be emitted, and
the replacement slot used by the one-byte filter.
*/

use std::fmt::Write as _;
use std::rc::Rc;

use crate::boyer_moore::BoyerMooreLookahead;
use crate::codegen::Label;
use crate::ranges::CharacterRange;

/// Handle to a node in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub u32);

/// Analysis bits. `visited`, `being_analyzed` and `been_analyzed` guard the
/// graph traversals against cycles; `replacement_calculated` memoizes the
/// one-byte filter; the interest bits record that some node downstream
/// cares about what precedes it.
#[derive(Debug, Default, Clone)]
pub(crate) struct NodeInfo {
    pub being_analyzed: bool,
    pub been_analyzed: bool,
    pub visited: bool,
    pub replacement_calculated: bool,
    pub follows_newline_interest: bool,
    pub follows_word_interest: bool,
    pub follows_start_interest: bool,
}

impl NodeInfo {
    /// Propagates the interest bits of a successor into this node.
    pub fn add_from_following(&mut self, that: &NodeInfo) {
        self.follows_newline_interest |= that.follows_newline_interest;
        self.follows_word_interest |= that.follows_word_interest;
        self.follows_start_interest |= that.follows_start_interest;
    }
}

pub(crate) struct Node {
    pub variant: NodeVariant,
    pub info: NodeInfo,
    /// The location of this node's generic code, once emitted.
    pub label: Option<Label>,
    pub on_work_list: bool,
    /// How many specialized versions have been emitted so far.
    pub trace_count: u32,
    /// One-byte filter result: outer `None` means not calculated yet, inner
    /// `None` means the node cannot match a one-byte subject.
    pub replacement: Option<Option<NodeId>>,
    /// Cached lookahead info, indexed by `not_at_start`.
    pub bm_info: [Option<Rc<BoyerMooreLookahead>>; 2],
}

pub(crate) enum NodeVariant {
    Text(TextData),
    Choice(ChoiceData),
    Action(ActionData),
    Assertion(AssertionData),
    BackReference(BackRefData),
    End(EndData),
}

pub(crate) struct TextData {
    pub elements: Vec<TextElement>,
    pub read_backward: bool,
    pub on_success: NodeId,
}

impl TextData {
    /// Code units this node consumes. Fixed, since text elements are all
    /// fixed-width.
    pub fn length(&self) -> i32 {
        self.elements.iter().map(TextElement::length).sum()
    }
}

pub(crate) struct TextElement {
    /// Offset of this element from the start of the node, in code units.
    /// Calculated by the analysis pass.
    pub cp_offset: i32,
    pub elem: TextElem,
}

impl TextElement {
    pub fn new(elem: TextElem) -> Self {
        Self { cp_offset: -1, elem }
    }

    pub fn length(&self) -> i32 {
        match &self.elem {
            TextElem::Atom { chars } => chars.len() as i32,
            TextElem::Class(_) => 1,
        }
    }
}

pub(crate) enum TextElem {
    Atom { chars: Vec<u16> },
    Class(ClassData),
}

pub(crate) struct ClassData {
    pub ranges: Vec<CharacterRange>,
    pub negated: bool,
}

pub(crate) struct ChoiceData {
    pub alternatives: Vec<GuardedAlternative>,
    pub kind: ChoiceKind,
    /// True if this node is only reachable after consuming input.
    pub not_at_start: bool,
}

pub(crate) enum ChoiceKind {
    Plain,
    /// The node at a quantifier: one alternative loops back through the
    /// body, the other continues past the loop.
    Loop(LoopData),
    /// Alternative 0 is a negative lookaround body, alternative 1 the
    /// continuation.
    NegativeLookaround,
}

#[derive(Default)]
pub(crate) struct LoopData {
    pub loop_node: Option<NodeId>,
    pub continue_node: Option<NodeId>,
    pub body_can_be_zero_length: bool,
    pub read_backward: bool,
}

#[derive(Clone)]
pub(crate) struct GuardedAlternative {
    pub node: NodeId,
    pub guards: Vec<Guard>,
}

impl GuardedAlternative {
    pub fn new(node: NodeId) -> Self {
        Self { node, guards: Vec::new() }
    }

    pub fn add_guard(&mut self, guard: Guard) {
        self.guards.push(guard);
    }
}

/// Bounds a quantifier counter register in one alternative of a choice.
#[derive(Clone, Copy)]
pub(crate) struct Guard {
    pub reg: usize,
    pub op: GuardOp,
    pub value: i32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardOp {
    Lt,
    Geq,
}

pub(crate) struct ActionData {
    pub action: Action,
    pub on_success: NodeId,
}

#[derive(Clone, Copy)]
pub(crate) enum Action {
    SetRegister {
        reg: usize,
        value: i32,
    },
    IncrementRegister {
        reg: usize,
    },
    StorePosition {
        reg: usize,
        is_capture: bool,
    },
    ClearCaptures {
        from: usize,
        to: usize,
    },
    BeginSubmatch {
        stack_reg: usize,
        position_reg: usize,
    },
    PositiveSubmatchSuccess {
        stack_reg: usize,
        position_reg: usize,
        clear_register_count: usize,
        clear_register_from: usize,
    },
    EmptyMatchCheck {
        start_reg: usize,
        repetition_reg: Option<usize>,
        repetition_limit: u32,
    },
}

pub(crate) struct AssertionData {
    pub kind: AssertionNodeKind,
    pub on_success: NodeId,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssertionNodeKind {
    AtStart,
    AtEnd,
    AfterNewline,
    AtBoundary,
    AtNonBoundary,
}

pub(crate) struct BackRefData {
    pub start_reg: usize,
    pub end_reg: usize,
    pub read_backward: bool,
    pub on_success: NodeId,
}

pub(crate) enum EndData {
    Accept,
    Backtrack,
    /// Unwinds a negative lookaround whose body matched: restores position
    /// and stack, clears the body's captures and backtracks.
    NegativeSubmatchSuccess {
        stack_reg: usize,
        position_reg: usize,
        clear_register_count: usize,
        clear_register_from: usize,
    },
}

/// Returned by the greedy-loop probe when the loop body is not a
/// fixed-length chain of text nodes.
pub(crate) const GREEDY_LOOP_TOO_COMPLEX: i32 = i32::MIN;

pub(crate) struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add(&mut self, variant: NodeVariant) -> NodeId {
        self.nodes.push(Node {
            variant,
            info: NodeInfo::default(),
            label: None,
            on_work_list: false,
            trace_count: 0,
            replacement: None,
            bm_info: [None, None],
        });
        NodeId((self.nodes.len() - 1) as u32)
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// The successor of a node that has exactly one, as text, action,
    /// assertion and back-reference nodes do.
    pub fn on_success(&self, id: NodeId) -> Option<NodeId> {
        match &self.get(id).variant {
            NodeVariant::Text(t) => Some(t.on_success),
            NodeVariant::Action(a) => Some(a.on_success),
            NodeVariant::Assertion(a) => Some(a.on_success),
            NodeVariant::BackReference(b) => Some(b.on_success),
            NodeVariant::Choice(_) | NodeVariant::End(_) => None,
        }
    }

    pub fn set_on_success(&mut self, id: NodeId, next: NodeId) {
        match &mut self.get_mut(id).variant {
            NodeVariant::Text(t) => t.on_success = next,
            NodeVariant::Action(a) => a.on_success = next,
            NodeVariant::Assertion(a) => a.on_success = next,
            NodeVariant::BackReference(b) => b.on_success = next,
            NodeVariant::Choice(_) | NodeVariant::End(_) => {
                panic!("node has no single successor")
            }
        }
    }

    /// A lower bound on the code units consumed from the current position
    /// before `id` can succeed. `budget` bounds the graph walk; when it
    /// runs out the estimate so far is returned. Capped at `still_to_find`
    /// since the callers never benefit from knowing more.
    pub fn eats_at_least(
        &self,
        id: NodeId,
        still_to_find: i32,
        budget: i32,
        not_at_start: bool,
    ) -> i32 {
        match &self.get(id).variant {
            NodeVariant::End(_) => 0,
            NodeVariant::Action(a) => {
                if budget <= 0 {
                    return 0;
                }
                // A submatch success rewinds the input.
                if matches!(a.action, Action::PositiveSubmatchSuccess { .. }) {
                    return 0;
                }
                self.eats_at_least(a.on_success, still_to_find, budget - 1, not_at_start)
            }
            NodeVariant::Assertion(a) => {
                if budget <= 0 {
                    return 0;
                }
                // If we know we are not at the start then a start-of-input
                // assertion cannot succeed, and any answer is valid for
                // "how much do you eat if you succeed".
                if a.kind == AssertionNodeKind::AtStart && not_at_start {
                    return still_to_find;
                }
                self.eats_at_least(a.on_success, still_to_find, budget - 1, not_at_start)
            }
            NodeVariant::BackReference(b) => {
                if b.read_backward || budget <= 0 {
                    return 0;
                }
                self.eats_at_least(b.on_success, still_to_find, budget - 1, not_at_start)
            }
            NodeVariant::Text(t) => {
                if t.read_backward {
                    return 0;
                }
                let answer = t.length();
                if answer >= still_to_find || budget <= 0 {
                    return answer;
                }
                // Not at start anymore after consuming text.
                answer
                    + self.eats_at_least(
                        t.on_success,
                        still_to_find - answer,
                        budget - 1,
                        true,
                    )
            }
            NodeVariant::Choice(c) => match &c.kind {
                ChoiceKind::NegativeLookaround => {
                    if budget <= 0 {
                        return 0;
                    }
                    // Alternative 0 is the lookaround body; only the
                    // continuation consumes input.
                    self.eats_at_least(
                        c.alternatives[1].node,
                        still_to_find,
                        budget - 1,
                        not_at_start,
                    )
                }
                ChoiceKind::Loop(data) => self.eats_at_least_helper(
                    c,
                    still_to_find,
                    budget - 1,
                    data.loop_node,
                    not_at_start,
                ),
                ChoiceKind::Plain => {
                    self.eats_at_least_helper(c, still_to_find, budget, None, not_at_start)
                }
            },
        }
    }

    fn eats_at_least_helper(
        &self,
        choice: &ChoiceData,
        still_to_find: i32,
        budget: i32,
        ignore_node: Option<NodeId>,
        not_at_start: bool,
    ) -> i32 {
        if budget <= 0 {
            return 0;
        }
        let mut min = 100;
        let budget = (budget - 1) / choice.alternatives.len() as i32;
        for alt in &choice.alternatives {
            if Some(alt.node) == ignore_node {
                continue;
            }
            let eats = self.eats_at_least(alt.node, still_to_find, budget, not_at_start);
            min = min.min(eats);
            if min == 0 {
                return 0;
            }
        }
        min
    }

    /// The fixed number of code units one loop iteration consumes, walking
    /// from the first alternative back to `choice`, or
    /// [`GREEDY_LOOP_TOO_COMPLEX`] when the body is not a plain text chain.
    pub fn greedy_loop_text_length(&self, choice_id: NodeId, alternative: NodeId) -> i32 {
        let read_backward = match &self.get(choice_id).variant {
            NodeVariant::Choice(c) => match &c.kind {
                ChoiceKind::Loop(data) => data.read_backward,
                _ => false,
            },
            _ => false,
        };
        let mut length = 0;
        let mut node = alternative;
        let mut depth = 0;
        while node != choice_id {
            depth += 1;
            if depth > crate::compiler::MAX_RECURSION {
                return GREEDY_LOOP_TOO_COMPLEX;
            }
            match &self.get(node).variant {
                NodeVariant::Text(t) => {
                    length += t.length();
                    node = t.on_success;
                }
                _ => return GREEDY_LOOP_TOO_COMPLEX,
            }
        }
        if read_backward {
            -length
        } else {
            length
        }
    }

    /// If `id` is a text node that consumes exactly one arbitrary code
    /// unit, returns its successor. This recognizes the `.*?` loop
    /// prepended to unanchored patterns.
    pub fn successor_of_omnivorous_text_node(
        &self,
        id: NodeId,
        max_char: u32,
    ) -> Option<NodeId> {
        let NodeVariant::Text(t) = &self.get(id).variant else {
            return None;
        };
        if t.read_backward || t.elements.len() != 1 {
            return None;
        }
        let TextElem::Class(class) = &t.elements[0].elem else {
            return None;
        };
        let mut ranges = class.ranges.clone();
        crate::ranges::canonicalize(&mut ranges);
        if class.negated {
            if ranges.is_empty() {
                return Some(t.on_success);
            }
            return None;
        }
        if ranges.len() == 1 && ranges[0].is_everything(max_char) {
            Some(t.on_success)
        } else {
            None
        }
    }

    /// Renders the graph reachable from `root` for debugging and tests.
    /// Nodes are listed in discovery order.
    pub fn dump(&self, root: NodeId) -> String {
        let mut out = String::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = vec![root];
        while let Some(id) = queue.pop() {
            if std::mem::replace(&mut seen[id.0 as usize], true) {
                continue;
            }
            let _ = write!(out, "n{}: ", id.0);
            match &self.get(id).variant {
                NodeVariant::Text(t) => {
                    let _ = write!(out, "Text");
                    for e in &t.elements {
                        match &e.elem {
                            TextElem::Atom { chars } => {
                                let _ = write!(out, " '{}'", String::from_utf16_lossy(chars));
                            }
                            TextElem::Class(c) => {
                                let _ = write!(out, " [{}{} ranges]", if c.negated { "^" } else { "" }, c.ranges.len());
                            }
                        }
                    }
                    let _ = writeln!(out, " -> n{}", t.on_success.0);
                    queue.push(t.on_success);
                }
                NodeVariant::Choice(c) => {
                    let kind = match c.kind {
                        ChoiceKind::Plain => "Choice",
                        ChoiceKind::Loop(_) => "LoopChoice",
                        ChoiceKind::NegativeLookaround => "NegativeLookaroundChoice",
                    };
                    let alts: Vec<String> =
                        c.alternatives.iter().map(|a| format!("n{}", a.node.0)).collect();
                    let _ = writeln!(out, "{kind}({})", alts.join(", "));
                    queue.extend(c.alternatives.iter().map(|a| a.node).rev());
                }
                NodeVariant::Action(a) => {
                    let name = match a.action {
                        Action::SetRegister { .. } => "SetRegister",
                        Action::IncrementRegister { .. } => "IncrementRegister",
                        Action::StorePosition { .. } => "StorePosition",
                        Action::ClearCaptures { .. } => "ClearCaptures",
                        Action::BeginSubmatch { .. } => "BeginSubmatch",
                        Action::PositiveSubmatchSuccess { .. } => "PositiveSubmatchSuccess",
                        Action::EmptyMatchCheck { .. } => "EmptyMatchCheck",
                    };
                    let _ = writeln!(out, "{name} -> n{}", a.on_success.0);
                    queue.push(a.on_success);
                }
                NodeVariant::Assertion(a) => {
                    let name = match a.kind {
                        AssertionNodeKind::AtStart => "AtStart",
                        AssertionNodeKind::AtEnd => "AtEnd",
                        AssertionNodeKind::AfterNewline => "AfterNewline",
                        AssertionNodeKind::AtBoundary => "AtBoundary",
                        AssertionNodeKind::AtNonBoundary => "AtNonBoundary",
                    };
                    let _ = writeln!(out, "Assertion({name}) -> n{}", a.on_success.0);
                    queue.push(a.on_success);
                }
                NodeVariant::BackReference(b) => {
                    let _ = writeln!(
                        out,
                        "BackReference(r{}..r{}) -> n{}",
                        b.start_reg, b.end_reg, b.on_success.0
                    );
                    queue.push(b.on_success);
                }
                NodeVariant::End(e) => {
                    let name = match e {
                        EndData::Accept => "Accept",
                        EndData::Backtrack => "Backtrack",
                        EndData::NegativeSubmatchSuccess { .. } => "NegativeSubmatchSuccess",
                    };
                    let _ = writeln!(out, "End({name})");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn dump_renders_the_graph() {
        let mut arena = NodeArena::new();
        let accept = arena.add(NodeVariant::End(EndData::Accept));
        let text = arena.add(NodeVariant::Text(TextData {
            elements: vec![TextElement::new(TextElem::Atom {
                chars: vec![b'h' as u16, b'i' as u16],
            })],
            read_backward: false,
            on_success: accept,
        }));
        let choice = arena.add(NodeVariant::Choice(ChoiceData {
            alternatives: vec![
                GuardedAlternative::new(text),
                GuardedAlternative::new(accept),
            ],
            kind: ChoiceKind::Plain,
            not_at_start: false,
        }));
        assert_eq!(
            arena.dump(choice),
            "n2: Choice(n1, n0)\n\
             n1: Text 'hi' -> n0\n\
             n0: End(Accept)\n"
        );
    }

    #[test]
    fn eats_at_least_adds_up_text_chains() {
        let mut arena = NodeArena::new();
        let accept = arena.add(NodeVariant::End(EndData::Accept));
        let tail = arena.add(NodeVariant::Text(TextData {
            elements: vec![TextElement::new(TextElem::Atom {
                chars: vec![b'c' as u16],
            })],
            read_backward: false,
            on_success: accept,
        }));
        let head = arena.add(NodeVariant::Text(TextData {
            elements: vec![TextElement::new(TextElem::Atom {
                chars: vec![b'a' as u16, b'b' as u16],
            })],
            read_backward: false,
            on_success: tail,
        }));
        assert_eq!(arena.eats_at_least(head, 8, 10, false), 3);
        // The cap means no more work is done than the caller can use.
        assert_eq!(arena.eats_at_least(head, 2, 10, false), 2);
        assert_eq!(arena.greedy_loop_text_length(accept, head), 3);
    }
}
