/*!
The regular expression syntax tree consumed by the compiler.

Parsing happens outside this crate; whoever produces the tree also reports
the number of captures, whether the pattern is "simple" (a bare literal) and
the parse error, if any. [`CompileData`] bundles all of that. The tree itself
is read-only input: lowering never mutates it.

Code units are UTF-16 throughout. An [`Tree::Atom`] holds a literal sequence
of code units; a surrogate pair is simply two adjacent units, which keeps
`unicode` patterns from ever matching half of one.
*/

use crate::ranges::CharacterRange;

/// Upper bound marker for a quantifier without a maximum, as in `a*`.
pub const MAX_MATCHES: u32 = u32::MAX;

/// A parsed regular expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tree {
    /// Matches the empty string.
    Empty,
    /// A literal sequence of UTF-16 code units.
    Atom(Vec<u16>),
    /// A character class.
    Class(ClassSet),
    /// A run of adjacent atoms and classes, matched as one unit.
    Text(Vec<TextPart>),
    /// Ordered alternatives, preferring earlier ones.
    Alternation(Vec<Tree>),
    /// Concatenation.
    Sequence(Vec<Tree>),
    /// `body{min,max}`, greedy or not.
    Quantifier {
        /// Minimum number of repetitions.
        min: u32,
        /// Maximum number of repetitions, or [`MAX_MATCHES`] for unbounded.
        max: u32,
        /// Whether the quantifier prefers more repetitions.
        greedy: bool,
        /// The repeated sub-pattern.
        body: Box<Tree>,
    },
    /// A capturing group. Capture indices start at 1; index 0 is reserved
    /// for the whole match.
    Capture {
        /// One-based capture index.
        index: usize,
        /// The captured sub-pattern.
        body: Box<Tree>,
    },
    /// A zero-width assertion.
    Assertion(AssertionKind),
    /// A back reference to an earlier capture.
    BackReference(usize),
    /// A lookahead or lookbehind.
    Lookaround {
        /// `true` for `(?=)`/`(?<=)`, `false` for `(?!)`/`(?<!)`.
        positive: bool,
        /// `true` for lookbehind.
        behind: bool,
        /// The asserted sub-pattern.
        body: Box<Tree>,
    },
}

/// The contents of a character class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSet {
    /// Member ranges. Not required to be canonical; the compiler
    /// canonicalizes on first use.
    pub ranges: Vec<CharacterRange>,
    /// Whether the class is negated, as in `[^...]`.
    pub negated: bool,
}

/// One element of a [`Tree::Text`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPart {
    /// A literal sequence of code units.
    Atom(Vec<u16>),
    /// A character class.
    Class(ClassSet),
}

/// Zero-width assertion kinds. The parser picks the line variants when the
/// pattern is compiled with the multiline flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    /// `^` without multiline.
    StartOfInput,
    /// `^` with multiline.
    StartOfLine,
    /// `$` without multiline.
    EndOfInput,
    /// `$` with multiline.
    EndOfLine,
    /// `\b`.
    Boundary,
    /// `\B`.
    NonBoundary,
}

impl Tree {
    /// Builds an atom from a string of ASCII/BMP characters.
    pub fn atom_str(s: &str) -> Tree {
        Tree::Atom(s.encode_utf16().collect())
    }

    /// Builds a sequence, collapsing the trivial cases.
    pub fn seq(mut children: Vec<Tree>) -> Tree {
        match children.len() {
            0 => Tree::Empty,
            1 => children.pop().unwrap(),
            _ => Tree::Sequence(children),
        }
    }

    /// Builds a non-negated class from inclusive ranges.
    pub fn class(ranges: &[(u32, u32)]) -> Tree {
        Tree::Class(ClassSet {
            ranges: ranges.iter().map(|&(f, t)| CharacterRange::new(f, t)).collect(),
            negated: false,
        })
    }

    /// Builds a negated class from inclusive ranges.
    pub fn negated_class(ranges: &[(u32, u32)]) -> Tree {
        Tree::Class(ClassSet {
            ranges: ranges.iter().map(|&(f, t)| CharacterRange::new(f, t)).collect(),
            negated: true,
        })
    }

    /// The fewest code units this pattern can consume.
    pub fn min_match(&self) -> u32 {
        match self {
            Tree::Empty | Tree::Assertion(_) | Tree::Lookaround { .. } => 0,
            Tree::Atom(data) => data.len() as u32,
            Tree::Class(_) => 1,
            Tree::Text(parts) => parts.iter().map(TextPart::length).sum(),
            Tree::Alternation(alts) => {
                alts.iter().map(Tree::min_match).min().unwrap_or(0)
            }
            Tree::Sequence(children) => {
                children.iter().map(Tree::min_match).fold(0u32, u32::saturating_add)
            }
            Tree::Quantifier { min, body, .. } => {
                mul_clamped(*min, body.min_match())
            }
            Tree::Capture { body, .. } => body.min_match(),
            // The length of a back reference is not known until run time.
            Tree::BackReference(_) => 0,
        }
    }

    /// The most code units this pattern can consume, [`MAX_MATCHES`] when
    /// unbounded.
    pub fn max_match(&self) -> u32 {
        match self {
            Tree::Empty | Tree::Assertion(_) | Tree::Lookaround { .. } => 0,
            Tree::Atom(data) => data.len() as u32,
            Tree::Class(_) => 1,
            Tree::Text(parts) => parts.iter().map(TextPart::length).sum(),
            Tree::Alternation(alts) => {
                alts.iter().map(Tree::max_match).max().unwrap_or(0)
            }
            Tree::Sequence(children) => {
                children.iter().map(Tree::max_match).fold(0u32, add_clamped)
            }
            Tree::Quantifier { max, body, .. } => mul_clamped(*max, body.max_match()),
            Tree::Capture { body, .. } => body.max_match(),
            Tree::BackReference(_) => MAX_MATCHES,
        }
    }

    /// True if every way this pattern matches starts at the beginning of
    /// the input.
    pub fn is_anchored_at_start(&self) -> bool {
        match self {
            Tree::Assertion(kind) => *kind == AssertionKind::StartOfInput,
            Tree::Alternation(alts) => alts.iter().all(Tree::is_anchored_at_start),
            Tree::Sequence(children) => {
                children.first().is_some_and(Tree::is_anchored_at_start)
            }
            Tree::Quantifier { min, body, .. } => {
                *min > 0 && body.is_anchored_at_start()
            }
            Tree::Capture { body, .. } => body.is_anchored_at_start(),
            Tree::Lookaround { positive, behind, body } => {
                *positive && !*behind && body.is_anchored_at_start()
            }
            _ => false,
        }
    }

    /// True if every way this pattern matches ends at the end of the input.
    pub fn is_anchored_at_end(&self) -> bool {
        match self {
            Tree::Assertion(kind) => *kind == AssertionKind::EndOfInput,
            Tree::Alternation(alts) => alts.iter().all(Tree::is_anchored_at_end),
            Tree::Sequence(children) => {
                children.last().is_some_and(Tree::is_anchored_at_end)
            }
            Tree::Quantifier { min, body, .. } => {
                *min > 0 && body.is_anchored_at_end()
            }
            Tree::Capture { body, .. } => body.is_anchored_at_end(),
            _ => false,
        }
    }

    /// The interval of capture registers used inside this pattern, as
    /// `(first, last)` register indices, or `None` when there are no
    /// captures.
    pub(crate) fn capture_registers(&self) -> Option<(usize, usize)> {
        fn union(
            a: Option<(usize, usize)>,
            b: Option<(usize, usize)>,
        ) -> Option<(usize, usize)> {
            match (a, b) {
                (None, x) | (x, None) => x,
                (Some((af, at)), Some((bf, bt))) => Some((af.min(bf), at.max(bt))),
            }
        }
        match self {
            Tree::Capture { index, body } => {
                let own = Some((2 * index, 2 * index + 1));
                union(own, body.capture_registers())
            }
            Tree::Alternation(trees) | Tree::Sequence(trees) => trees
                .iter()
                .map(Tree::capture_registers)
                .fold(None, union),
            Tree::Quantifier { body, .. } | Tree::Lookaround { body, .. } => {
                body.capture_registers()
            }
            _ => None,
        }
    }

    /// True if the tree contains a `^` assertion anywhere, in either the
    /// input-anchored or line-anchored form.
    pub(crate) fn contains_anchor(&self) -> bool {
        match self {
            Tree::Assertion(kind) => {
                matches!(kind, AssertionKind::StartOfInput | AssertionKind::StartOfLine)
            }
            Tree::Alternation(trees) | Tree::Sequence(trees) => {
                trees.iter().any(Tree::contains_anchor)
            }
            Tree::Quantifier { body, .. }
            | Tree::Capture { body, .. }
            | Tree::Lookaround { body, .. } => body.contains_anchor(),
            _ => false,
        }
    }
}

impl TextPart {
    pub(crate) fn length(&self) -> u32 {
        match self {
            TextPart::Atom(data) => data.len() as u32,
            TextPart::Class(_) => 1,
        }
    }
}

fn add_clamped(a: u32, b: u32) -> u32 {
    if a == MAX_MATCHES || b == MAX_MATCHES {
        MAX_MATCHES
    } else {
        a.saturating_add(b).min(MAX_MATCHES)
    }
}

fn mul_clamped(a: u32, b: u32) -> u32 {
    if a == 0 || b == 0 {
        0
    } else if a == MAX_MATCHES || b == MAX_MATCHES {
        MAX_MATCHES
    } else {
        (a as u64 * b as u64).min(MAX_MATCHES as u64) as u32
    }
}

/// Everything the compiler needs to know about a parsed pattern.
#[derive(Debug, Clone)]
pub struct CompileData {
    /// The syntax tree.
    pub tree: Tree,
    /// Number of capturing groups, not counting the implicit whole-match
    /// capture.
    pub capture_count: usize,
    /// True if the pattern is a bare literal equal to its source text.
    pub simple: bool,
    /// True if the pattern contains a `^` anywhere.
    pub contains_anchor: bool,
    /// Parse error reported by the parser, if any. A present error makes
    /// compilation fail without looking at the tree.
    pub error: Option<String>,
    /// Names of named capture groups, as `(name, index)` pairs.
    pub capture_name_map: Option<Vec<(String, usize)>>,
}

impl CompileData {
    /// Bundles a tree with its capture count, deriving the `simple` and
    /// `contains_anchor` bits from the tree.
    pub fn new(tree: Tree, capture_count: usize) -> Self {
        let simple = matches!(tree, Tree::Atom(_));
        let contains_anchor = tree.contains_anchor();
        Self {
            tree,
            capture_count,
            simple,
            contains_anchor,
            error: None,
            capture_name_map: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn match_lengths() {
        let t = Tree::seq(vec![
            Tree::atom_str("ab"),
            Tree::Quantifier {
                min: 2,
                max: 4,
                greedy: true,
                body: Box::new(Tree::atom_str("xy")),
            },
        ]);
        assert_eq!(t.min_match(), 6);
        assert_eq!(t.max_match(), 10);

        let unbounded = Tree::Quantifier {
            min: 0,
            max: MAX_MATCHES,
            greedy: true,
            body: Box::new(Tree::atom_str("a")),
        };
        assert_eq!(unbounded.min_match(), 0);
        assert_eq!(unbounded.max_match(), MAX_MATCHES);
    }

    #[test]
    fn anchoring() {
        let anchored = Tree::seq(vec![
            Tree::Assertion(AssertionKind::StartOfInput),
            Tree::atom_str("foo"),
        ]);
        assert!(anchored.is_anchored_at_start());
        assert!(!anchored.is_anchored_at_end());
        assert!(anchored.contains_anchor());

        // A multiline `^` is an anchor for unrolling purposes but does not
        // anchor the whole pattern.
        let multiline = Tree::seq(vec![
            Tree::Assertion(AssertionKind::StartOfLine),
            Tree::atom_str("foo"),
        ]);
        assert!(!multiline.is_anchored_at_start());
        assert!(multiline.contains_anchor());
    }

    #[test]
    fn capture_register_intervals() {
        let t = Tree::seq(vec![
            Tree::Capture { index: 1, body: Box::new(Tree::atom_str("a")) },
            Tree::Capture {
                index: 2,
                body: Box::new(Tree::Capture {
                    index: 3,
                    body: Box::new(Tree::atom_str("b")),
                }),
            },
        ]);
        assert_eq!(t.capture_registers(), Some((2, 7)));
        assert_eq!(Tree::atom_str("a").capture_registers(), None);
    }
}
