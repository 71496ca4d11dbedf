/*!
The analysis pass over the node graph.

Runs depth-first after lowering and before code emission. It makes
case-insensitive text case-independent by expanding classes with their case
equivalents, canonicalizes class ranges, fixes the offset of each text
element within its node, and propagates follow-set interests from
successors to predecessors. Cycles (the back edge of a loop) are cut with
the `being_analyzed` bit; a loop node analyzes its other alternatives first
since the loop body may need this node's own results.

The traversal is recursive, so pathologically deep graphs are cut off with
a depth guard that fails compilation instead of overflowing the stack.
*/

use crate::compiler::Compiler;
use crate::nodes::{ChoiceKind, NodeId, NodeVariant, TextElem};
use crate::ranges::{add_case_equivalents, canonicalize};
use crate::Error;

const MAX_ANALYSIS_DEPTH: usize = 5000;

pub(crate) struct Analysis {
    is_one_byte: bool,
    depth: usize,
    error: Option<Error>,
}

impl Analysis {
    pub fn new(is_one_byte: bool) -> Self {
        Self { is_one_byte, depth: 0, error: None }
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn ensure_analyzed(&mut self, c: &mut Compiler, node: NodeId) {
        self.depth += 1;
        if self.depth > MAX_ANALYSIS_DEPTH {
            self.error.get_or_insert(Error::StackOverflow);
            self.depth -= 1;
            return;
        }
        {
            let info = &c.arena.get(node).info;
            if info.been_analyzed || info.being_analyzed {
                self.depth -= 1;
                return;
            }
        }
        c.arena.get_mut(node).info.being_analyzed = true;
        self.visit(c, node);
        let info = &mut c.arena.get_mut(node).info;
        info.being_analyzed = false;
        info.been_analyzed = true;
        self.depth -= 1;
    }

    fn visit(&mut self, c: &mut Compiler, node: NodeId) {
        match &c.arena.get(node).variant {
            NodeVariant::End(_) => {}
            NodeVariant::Text(t) => {
                let on_success = t.on_success;
                self.make_case_independent(c, node);
                self.ensure_analyzed(c, on_success);
                if !self.has_failed() {
                    calculate_offsets(c, node);
                }
            }
            NodeVariant::Action(a) => {
                let target = a.on_success;
                self.ensure_analyzed(c, target);
                if !self.has_failed() {
                    // Whatever the next node needs to know about what it
                    // follows, this node needs to know too, so it can pass
                    // the information on.
                    let following = c.arena.get(target).info.clone();
                    c.arena.get_mut(node).info.add_from_following(&following);
                }
            }
            NodeVariant::Assertion(a) => {
                let on_success = a.on_success;
                self.ensure_analyzed(c, on_success);
            }
            NodeVariant::BackReference(b) => {
                let on_success = b.on_success;
                self.ensure_analyzed(c, on_success);
            }
            NodeVariant::Choice(choice) => {
                let loop_node = match &choice.kind {
                    ChoiceKind::Loop(data) => data.loop_node,
                    _ => None,
                };
                let alternatives: Vec<NodeId> =
                    choice.alternatives.iter().map(|a| a.node).collect();
                for &alt in &alternatives {
                    if Some(alt) == loop_node {
                        continue;
                    }
                    self.ensure_analyzed(c, alt);
                    if self.has_failed() {
                        return;
                    }
                    let following = c.arena.get(alt).info.clone();
                    c.arena.get_mut(node).info.add_from_following(&following);
                }
                // Check the loop last since it may need the value of this
                // node to get a correct result.
                if let Some(loop_node) = loop_node {
                    self.ensure_analyzed(c, loop_node);
                    if !self.has_failed() {
                        let following = c.arena.get(loop_node).info.clone();
                        c.arena.get_mut(node).info.add_from_following(&following);
                    }
                }
            }
        }
    }

    /// Expands character classes with their case equivalents, and
    /// establishes canonical range lists for emission.
    fn make_case_independent(&mut self, c: &mut Compiler, node: NodeId) {
        let ignore_case = c.flags.ignore_case();
        let folder = std::sync::Arc::clone(&c.case_folder);
        let NodeVariant::Text(t) = &mut c.arena.get_mut(node).variant else {
            unreachable!();
        };
        for element in t.elements.iter_mut() {
            if let TextElem::Class(class) = &mut element.elem {
                canonicalize(&mut class.ranges);
                if ignore_case {
                    add_case_equivalents(folder.as_ref(), &mut class.ranges, self.is_one_byte);
                }
            }
        }
    }
}

/// Sets up the offsets of the elements relative to the start of the text
/// node. A fixed quantity, since a text node only contains fixed-width
/// elements.
fn calculate_offsets(c: &mut Compiler, node: NodeId) {
    let NodeVariant::Text(t) = &mut c.arena.get_mut(node).variant else {
        unreachable!();
    };
    let mut cp_offset = 0;
    for element in t.elements.iter_mut() {
        element.cp_offset = cp_offset;
        cp_offset += element.length();
    }
}
