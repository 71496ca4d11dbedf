/*!
The one-byte filter.

When the subject is known to contain only one-byte code units, whole
branches of the graph can never match: atoms with characters above 0xFF,
classes whose ranges all lie above 0xFF, and everything that can only be
reached through them. This pass rewrites the graph to drop such branches:
a node that cannot match is replaced by nothing, a choice loses dead
alternatives and collapses when a single one survives.

Results are memoized in each node's replacement slot, both to avoid
exponential re-walks of shared subgraphs and to terminate on cycles; the
`visited` bit cuts recursion into a node that is being filtered further up
the stack.
*/

use crate::compiler::Compiler;
use crate::nodes::{ChoiceKind, NodeId, NodeVariant, TextElem};
use crate::ranges::{
    canonicalize, ranges_contain_latin1_equivalents, try_convert_to_latin1,
};
use crate::MAX_ONE_BYTE_CHAR;

/// Filters the graph rooted at `node` for a one-byte subject. Returns the
/// replacement root, or `None` when the whole pattern cannot match.
pub(crate) fn filter_one_byte(
    c: &mut Compiler,
    node: NodeId,
    depth: i32,
) -> Option<NodeId> {
    if let Some(replacement) = c.arena.get(node).replacement {
        return replacement;
    }
    if depth < 0 {
        return Some(node);
    }
    match &c.arena.get(node).variant {
        NodeVariant::End(_) => Some(node),
        NodeVariant::Text(_) => filter_text(c, node, depth),
        NodeVariant::Action(_) | NodeVariant::Assertion(_) | NodeVariant::BackReference(_) => {
            debug_assert!(!c.arena.get(node).info.visited);
            c.arena.get_mut(node).info.visited = true;
            let result = filter_successor(c, node, depth - 1);
            c.arena.get_mut(node).info.visited = false;
            result
        }
        NodeVariant::Choice(choice) => match choice.kind {
            ChoiceKind::Plain => filter_choice(c, node, depth),
            ChoiceKind::Loop(_) => filter_loop_choice(c, node, depth),
            ChoiceKind::NegativeLookaround => filter_negative_lookaround(c, node, depth),
        },
    }
}

fn set_replacement(c: &mut Compiler, node: NodeId, replacement: Option<NodeId>) -> Option<NodeId> {
    let n = c.arena.get_mut(node);
    n.replacement = Some(replacement);
    n.info.replacement_calculated = true;
    replacement
}

/// Filters the single successor of a sequential node, keeping the node if
/// the successor survives.
fn filter_successor(c: &mut Compiler, node: NodeId, depth: i32) -> Option<NodeId> {
    let on_success = c.arena.on_success(node).unwrap();
    match filter_one_byte(c, on_success, depth - 1) {
        None => set_replacement(c, node, None),
        Some(next) => {
            c.arena.set_on_success(node, next);
            set_replacement(c, node, Some(node))
        }
    }
}

fn filter_text(c: &mut Compiler, node: NodeId, depth: i32) -> Option<NodeId> {
    let ignore_case = c.flags.ignore_case();
    debug_assert!(!c.arena.get(node).info.visited);
    c.arena.get_mut(node).info.visited = true;
    let result = filter_text_elements(c, node, ignore_case);
    let result = match result {
        Some(()) => filter_successor(c, node, depth - 1),
        None => set_replacement(c, node, None),
    };
    c.arena.get_mut(node).info.visited = false;
    result
}

fn filter_text_elements(c: &mut Compiler, node: NodeId, ignore_case: bool) -> Option<()> {
    let NodeVariant::Text(t) = &mut c.arena.get_mut(node).variant else {
        unreachable!();
    };
    for element in t.elements.iter_mut() {
        match &mut element.elem {
            TextElem::Atom { chars } => {
                for ch in chars.iter_mut() {
                    let mut converted = *ch;
                    if ignore_case {
                        // A non-Latin-1 character normally cannot match a
                        // Latin-1 one, except through the few case
                        // equivalences that reach back below 0x100.
                        converted = try_convert_to_latin1(converted);
                    }
                    if converted as u32 > MAX_ONE_BYTE_CHAR {
                        return None;
                    }
                    // Keep the conversion in case one was made.
                    *ch = converted;
                }
            }
            TextElem::Class(class) => {
                canonicalize(&mut class.ranges);
                // In canonical order only the first range matters.
                if class.negated {
                    if !class.ranges.is_empty()
                        && class.ranges[0].from == 0
                        && class.ranges[0].to >= MAX_ONE_BYTE_CHAR
                    {
                        if ignore_case && ranges_contain_latin1_equivalents(&class.ranges) {
                            continue;
                        }
                        return None;
                    }
                } else if class.ranges.is_empty()
                    || class.ranges[0].from > MAX_ONE_BYTE_CHAR
                {
                    if ignore_case && ranges_contain_latin1_equivalents(&class.ranges) {
                        continue;
                    }
                    return None;
                }
            }
        }
    }
    Some(())
}

fn filter_loop_choice(c: &mut Compiler, node: NodeId, depth: i32) -> Option<NodeId> {
    if c.arena.get(node).info.visited {
        return Some(node);
    }
    {
        c.arena.get_mut(node).info.visited = true;
        let continue_node = match &c.arena.get(node).variant {
            NodeVariant::Choice(choice) => match &choice.kind {
                ChoiceKind::Loop(data) => data.continue_node.unwrap(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        let continue_replacement = filter_one_byte(c, continue_node, depth - 1);
        c.arena.get_mut(node).info.visited = false;
        // If we can't continue after the loop then there is no point in
        // doing the loop.
        if continue_replacement.is_none() {
            return set_replacement(c, node, None);
        }
    }
    filter_choice(c, node, depth - 1)
}

fn filter_choice(c: &mut Compiler, node: NodeId, depth: i32) -> Option<NodeId> {
    if c.arena.get(node).info.visited {
        return Some(node);
    }
    c.arena.get_mut(node).info.visited = true;
    let result = filter_choice_inner(c, node, depth);
    c.arena.get_mut(node).info.visited = false;
    result
}

fn filter_choice_inner(c: &mut Compiler, node: NodeId, depth: i32) -> Option<NodeId> {
    let (alternatives, any_guards): (Vec<NodeId>, bool) = {
        let NodeVariant::Choice(choice) = &c.arena.get(node).variant else {
            unreachable!();
        };
        (
            choice.alternatives.iter().map(|a| a.node).collect(),
            choice.alternatives.iter().any(|a| !a.guards.is_empty()),
        )
    };
    if any_guards {
        return set_replacement(c, node, Some(node));
    }

    let mut surviving = 0;
    let mut survivor = None;
    for (i, &alt) in alternatives.iter().enumerate() {
        let replacement = filter_one_byte(c, alt, depth - 1);
        debug_assert_ne!(replacement, Some(node));
        if let Some(replacement) = replacement {
            set_alternative_node(c, node, i, replacement);
            surviving += 1;
            survivor = Some(replacement);
        }
    }
    if surviving < 2 {
        return set_replacement(c, node, survivor);
    }

    set_replacement(c, node, Some(node));
    if surviving == alternatives.len() {
        return Some(node);
    }
    // Only some of the nodes survived the filtering; rebuild the
    // alternatives list. The recursive filter calls below return the
    // memoized replacements.
    let mut new_alternatives = Vec::with_capacity(surviving);
    for (i, &alt) in alternatives.iter().enumerate() {
        if let Some(replacement) = filter_one_byte(c, alt, depth - 1) {
            set_alternative_node(c, node, i, replacement);
            let NodeVariant::Choice(choice) = &c.arena.get(node).variant else {
                unreachable!();
            };
            new_alternatives.push(choice.alternatives[i].clone());
        }
    }
    let NodeVariant::Choice(choice) = &mut c.arena.get_mut(node).variant else {
        unreachable!();
    };
    choice.alternatives = new_alternatives;
    Some(node)
}

fn filter_negative_lookaround(c: &mut Compiler, node: NodeId, depth: i32) -> Option<NodeId> {
    if c.arena.get(node).info.visited {
        return Some(node);
    }
    c.arena.get_mut(node).info.visited = true;
    let result = filter_negative_lookaround_inner(c, node, depth);
    c.arena.get_mut(node).info.visited = false;
    result
}

fn filter_negative_lookaround_inner(
    c: &mut Compiler,
    node: NodeId,
    depth: i32,
) -> Option<NodeId> {
    // Alternative 0 is the negative lookaround, alternative 1 is what
    // comes afterwards.
    let (neg_node, continuation) = {
        let NodeVariant::Choice(choice) = &c.arena.get(node).variant else {
            unreachable!();
        };
        (choice.alternatives[0].node, choice.alternatives[1].node)
    };
    let Some(replacement) = filter_one_byte(c, continuation, depth - 1) else {
        return set_replacement(c, node, None);
    };
    set_alternative_node(c, node, 1, replacement);

    let neg_replacement = filter_one_byte(c, neg_node, depth - 1);
    // If the lookaround body can never match, the check is not needed.
    let Some(neg_replacement) = neg_replacement else {
        return set_replacement(c, node, Some(replacement));
    };
    set_alternative_node(c, node, 0, neg_replacement);
    set_replacement(c, node, Some(node))
}

fn set_alternative_node(c: &mut Compiler, choice: NodeId, index: usize, node: NodeId) {
    let NodeVariant::Choice(data) = &mut c.arena.get_mut(choice).variant else {
        unreachable!();
    };
    data.alternatives[index].node = node;
}
