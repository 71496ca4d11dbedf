use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::ast::{AssertionKind, CompileData, Tree, MAX_MATCHES};
use crate::exec::{MatchInfo, Regexp, Subject};
use crate::ranges::{case_independent_letters, list_contains, Latin1CaseFolder};
use crate::{Engine, Error, Flags};

// -----------------------------------------------------------------
// A brute-force reference matcher over the syntax tree. Slow and
// simple-minded on purpose: its results are what the compiled programs
// are checked against.

mod reference {
    use super::*;
    use crate::ranges::canonicalize;

    pub struct RefMatcher {
        subject: Vec<u32>,
        flags: Flags,
    }

    type Caps = Vec<i32>;

    fn is_newline(c: u32) -> bool {
        matches!(c, 0x0A | 0x0D | 0x2028 | 0x2029)
    }

    fn is_word(c: Option<u32>) -> bool {
        match c {
            Some(c) => {
                (c >= b'0' as u32 && c <= b'9' as u32)
                    || (c >= b'A' as u32 && c <= b'Z' as u32)
                    || (c >= b'a' as u32 && c <= b'z' as u32)
                    || c == b'_' as u32
            }
            None => false,
        }
    }

    impl RefMatcher {
        pub fn new(subject: &Subject, flags: Flags) -> Self {
            let subject = (0..subject.len()).map(|i| subject.get(i)).collect();
            Self { subject, flags }
        }

        /// First match at or after `start`, as raw capture registers.
        pub fn exec(&self, tree: &Tree, start: usize, capture_count: usize) -> Option<Caps> {
            for at in start..=self.subject.len() {
                let mut caps = vec![-1i32; 2 * (capture_count + 1)];
                let mut end_pos = None;
                let matched = self.m(tree, at, &mut caps, &mut |end, _| {
                    end_pos = Some(end);
                    true
                });
                if matched {
                    caps[0] = at as i32;
                    caps[1] = end_pos.unwrap() as i32;
                    return Some(caps);
                }
                if self.flags.sticky() {
                    break;
                }
            }
            None
        }

        fn chars_equal(&self, a: u32, b: u32) -> bool {
            if a == b {
                return true;
            }
            self.flags.ignore_case()
                && case_independent_letters(&Latin1CaseFolder, a, false).contains(&b)
        }

        fn class_matches(&self, class: &crate::ast::ClassSet, c: u32) -> bool {
            let mut ranges = class.ranges.clone();
            canonicalize(&mut ranges);
            let mut inside = list_contains(&ranges, c);
            if !inside && self.flags.ignore_case() {
                inside = case_independent_letters(&Latin1CaseFolder, c, false)
                    .iter()
                    .any(|&e| list_contains(&ranges, e));
            }
            inside != class.negated
        }

        fn m(
            &self,
            tree: &Tree,
            pos: usize,
            caps: &mut Caps,
            k: &mut dyn FnMut(usize, &mut Caps) -> bool,
        ) -> bool {
            match tree {
                Tree::Empty => k(pos, caps),
                Tree::Atom(chars) => {
                    if pos + chars.len() > self.subject.len() {
                        return false;
                    }
                    for (i, &ch) in chars.iter().enumerate() {
                        if !self.chars_equal(ch as u32, self.subject[pos + i]) {
                            return false;
                        }
                    }
                    k(pos + chars.len(), caps)
                }
                Tree::Class(class) => {
                    if pos >= self.subject.len() {
                        return false;
                    }
                    if !self.class_matches(class, self.subject[pos]) {
                        return false;
                    }
                    k(pos + 1, caps)
                }
                Tree::Text(parts) => {
                    let seq: Vec<Tree> = parts
                        .iter()
                        .map(|p| match p {
                            crate::ast::TextPart::Atom(a) => Tree::Atom(a.clone()),
                            crate::ast::TextPart::Class(c) => Tree::Class(c.clone()),
                        })
                        .collect();
                    self.m_seq(&seq, 0, pos, caps, k)
                }
                Tree::Sequence(children) => self.m_seq(children, 0, pos, caps, k),
                Tree::Alternation(alternatives) => {
                    for alt in alternatives {
                        if self.m(alt, pos, caps, k) {
                            return true;
                        }
                    }
                    false
                }
                Tree::Capture { index, body } => {
                    let i = *index;
                    let saved = (caps[2 * i], caps[2 * i + 1]);
                    let ok = self.m(body, pos, caps, &mut |end, caps| {
                        let old = (caps[2 * i], caps[2 * i + 1]);
                        caps[2 * i] = pos as i32;
                        caps[2 * i + 1] = end as i32;
                        if k(end, caps) {
                            true
                        } else {
                            caps[2 * i] = old.0;
                            caps[2 * i + 1] = old.1;
                            false
                        }
                    });
                    if !ok {
                        caps[2 * i] = saved.0;
                        caps[2 * i + 1] = saved.1;
                    }
                    ok
                }
                Tree::Quantifier { min, max, greedy, body } => {
                    self.m_rep(body, *min, *max, *greedy, 0, pos, caps, k)
                }
                Tree::Assertion(kind) => {
                    let len = self.subject.len();
                    let holds = match kind {
                        AssertionKind::StartOfInput => pos == 0,
                        AssertionKind::StartOfLine => {
                            pos == 0 || is_newline(self.subject[pos - 1])
                        }
                        AssertionKind::EndOfInput => pos == len,
                        AssertionKind::EndOfLine => {
                            pos == len || is_newline(self.subject[pos])
                        }
                        AssertionKind::Boundary | AssertionKind::NonBoundary => {
                            let before =
                                if pos == 0 { None } else { Some(self.subject[pos - 1]) };
                            let after =
                                if pos == len { None } else { Some(self.subject[pos]) };
                            let boundary = is_word(before) != is_word(after);
                            (*kind == AssertionKind::Boundary) == boundary
                        }
                    };
                    holds && k(pos, caps)
                }
                Tree::BackReference(index) => {
                    let (start, end) = (caps[2 * index], caps[2 * index + 1]);
                    if start < 0 || end < 0 {
                        return k(pos, caps);
                    }
                    let (start, end) = (start as usize, end as usize);
                    let length = end - start;
                    if pos + length > self.subject.len() {
                        return false;
                    }
                    for i in 0..length {
                        if !self.chars_equal(self.subject[start + i], self.subject[pos + i]) {
                            return false;
                        }
                    }
                    k(pos + length, caps)
                }
                Tree::Lookaround { positive, behind, body } => {
                    let saved = caps.clone();
                    let matched = if *behind {
                        (0..=pos).rev().any(|j| {
                            caps.copy_from_slice(&saved);
                            self.m(body, j, caps, &mut |end, _| end == pos)
                        })
                    } else {
                        self.m(body, pos, caps, &mut |_, _| true)
                    };
                    if *positive {
                        if matched {
                            if k(pos, caps) {
                                return true;
                            }
                        }
                        caps.copy_from_slice(&saved);
                        false
                    } else {
                        // A negative lookaround never keeps captures.
                        caps.copy_from_slice(&saved);
                        !matched && k(pos, caps)
                    }
                }
            }
        }

        fn m_seq(
            &self,
            children: &[Tree],
            index: usize,
            pos: usize,
            caps: &mut Caps,
            k: &mut dyn FnMut(usize, &mut Caps) -> bool,
        ) -> bool {
            if index == children.len() {
                return k(pos, caps);
            }
            self.m(&children[index], pos, caps, &mut |next, caps| {
                self.m_seq(children, index + 1, next, caps, k)
            })
        }

        #[allow(clippy::too_many_arguments)]
        fn m_rep(
            &self,
            body: &Tree,
            min: u32,
            max: u32,
            greedy: bool,
            count: u32,
            pos: usize,
            caps: &mut Caps,
            k: &mut dyn FnMut(usize, &mut Caps) -> bool,
        ) -> bool {
            let capture_range = body.capture_registers();
            let try_body = |caps: &mut Caps,
                            k2: &mut dyn FnMut(usize, &mut Caps) -> bool|
             -> bool {
                let saved = caps.clone();
                // Captures inside the body restart on each iteration.
                if let Some((from, to)) = capture_range {
                    for reg in from..=to {
                        caps[reg] = -1;
                    }
                }
                let ok = self.m(body, pos, caps, k2);
                if !ok {
                    caps.copy_from_slice(&saved);
                }
                ok
            };
            if greedy {
                if count < max
                    && try_body(caps, &mut |end, caps| {
                        // An iteration that consumed nothing past the
                        // required minimum ends the loop.
                        if end == pos && count >= min {
                            return false;
                        }
                        self.m_rep(body, min, max, greedy, count + 1, end, caps, k)
                    })
                {
                    return true;
                }
                count >= min && k(pos, caps)
            } else {
                if count >= min && k(pos, caps) {
                    return true;
                }
                count < max
                    && try_body(caps, &mut |end, caps| {
                        if end == pos && count >= min {
                            return false;
                        }
                        self.m_rep(body, min, max, greedy, count + 1, end, caps, k)
                    })
            }
        }
    }
}

// -----------------------------------------------------------------
// Helpers.

fn compile(pattern: &str, tree: Tree, capture_count: usize, flags: Flags) -> (Engine, Regexp) {
    let engine = Engine::new();
    let re = engine
        .compile(pattern, CompileData::new(tree, capture_count), flags)
        .unwrap();
    (engine, re)
}

fn exec(
    engine: &Engine,
    re: &Regexp,
    subject: &Arc<Subject>,
    start: usize,
) -> Option<Vec<i32>> {
    let mut info = MatchInfo::new();
    match re.exec(engine, subject, start, &mut info).unwrap() {
        true => Some(info.captures().to_vec()),
        false => None,
    }
}

/// Compiles a pattern and compares it against the reference matcher over
/// every subject, in both subject representations where possible.
macro_rules! assert_matches_reference {
    ($pattern:expr, $tree:expr, $captures:expr, $flags:expr, $subjects:expr) => {{
        let tree = $tree;
        let flags = $flags;
        let (engine, re) = compile($pattern, tree.clone(), $captures, flags);
        for subject_text in $subjects {
            let narrow = Subject::from_str(subject_text);
            let mut subjects = vec![Arc::new(narrow.clone())];
            if narrow.is_one_byte() {
                // The same content as a two-byte subject exercises the
                // unfiltered compile.
                let units: Vec<u16> = subject_text.encode_utf16().collect();
                subjects.push(Arc::new(Subject::two_byte(&units)));
            }
            for subject in subjects {
                let expected =
                    reference::RefMatcher::new(&subject, flags).exec(&tree, 0, $captures);
                let actual = exec(&engine, &re, &subject, 0);
                assert_eq!(
                    expected, actual,
                    "pattern /{}/ over {:?}",
                    $pattern, subject_text
                );
            }
        }
    }};
}

fn quantifier(min: u32, max: u32, greedy: bool, body: Tree) -> Tree {
    Tree::Quantifier { min, max, greedy, body: Box::new(body) }
}

fn capture(index: usize, body: Tree) -> Tree {
    Tree::Capture { index, body: Box::new(body) }
}

// -----------------------------------------------------------------
// The concrete scenarios.

#[test]
fn scenario_a_greedy_loop_with_capture() {
    // a(b|c)*d
    let tree = Tree::seq(vec![
        Tree::atom_str("a"),
        quantifier(
            0,
            MAX_MATCHES,
            true,
            capture(
                1,
                Tree::Alternation(vec![Tree::atom_str("b"), Tree::atom_str("c")]),
            ),
        ),
        Tree::atom_str("d"),
    ]);
    let (engine, re) = compile("a(b|c)*d", tree, 1, Flags::empty());
    let subject = Arc::new(Subject::one_byte(b"XabcbdY"));
    let caps = exec(&engine, &re, &subject, 0).unwrap();
    // Whole match "abcbd" at [1,6]; capture 1 holds the last iteration.
    assert_eq!(caps, vec![1, 6, 4, 5]);
}

#[test]
fn scenario_b_multiline_anchors() {
    // ^foo$ with multiline
    let tree = Tree::seq(vec![
        Tree::Assertion(AssertionKind::StartOfLine),
        Tree::atom_str("foo"),
        Tree::Assertion(AssertionKind::EndOfLine),
    ]);
    let (engine, re) = compile("^foo$", tree, 0, Flags::MULTILINE);
    let subject = Arc::new(Subject::one_byte(b"foo\nbar"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![0, 3]));

    // The second line does not match.
    let subject = Arc::new(Subject::one_byte(b"bar\nfoo!"));
    assert_eq!(exec(&engine, &re, &subject, 0), None);
}

#[test]
fn scenario_c_word_boundaries() {
    // \bword\b
    let tree = Tree::seq(vec![
        Tree::Assertion(AssertionKind::Boundary),
        Tree::atom_str("word"),
        Tree::Assertion(AssertionKind::Boundary),
    ]);
    let (engine, re) = compile("\\bword\\b", tree.clone(), 0, Flags::empty());
    let subject = Arc::new(Subject::one_byte(b"word!word"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![0, 4]));

    // Global iteration yields both occurrences.
    let (_engine, re) = compile("\\bword\\b", tree, 0, Flags::GLOBAL);
    let mut matches = Vec::new();
    let mut global = re.global_matches(&subject);
    while let Some(registers) = global.fetch_next().unwrap() {
        matches.push((registers[0], registers[1]));
    }
    assert_eq!(matches, vec![(0, 4), (5, 9)]);
}

#[test]
fn scenario_d_positive_lookahead() {
    // (?=ab)a
    let tree = Tree::seq(vec![
        Tree::Lookaround {
            positive: true,
            behind: false,
            body: Box::new(Tree::atom_str("ab")),
        },
        Tree::atom_str("a"),
    ]);
    let (engine, re) = compile("(?=ab)a", tree, 0, Flags::empty());
    let subject = Arc::new(Subject::one_byte(b"ab"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![0, 1]));

    let subject = Arc::new(Subject::one_byte(b"ax"));
    assert_eq!(exec(&engine, &re, &subject, 0), None);
}

#[test]
fn scenario_e_negative_lookahead() {
    // (?!xx)x
    let tree = Tree::seq(vec![
        Tree::Lookaround {
            positive: false,
            behind: false,
            body: Box::new(Tree::atom_str("xx")),
        },
        Tree::atom_str("x"),
    ]);
    let (engine, re) = compile("(?!xx)x", tree, 0, Flags::empty());
    let subject = Arc::new(Subject::one_byte(b"xy"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![0, 1]));

    // On "xx" the lookahead fails at position 0 but holds at position 1,
    // where only one x remains.
    let subject = Arc::new(Subject::one_byte(b"xx"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![1, 2]));
}

#[test]
fn scenario_f_global_empty_matches_advance() {
    // a* as a global pattern over a subject with no a's: one empty match
    // per position, each advancing by one.
    let tree = quantifier(0, MAX_MATCHES, true, Tree::atom_str("a"));
    let (_engine, re) = compile("a*", tree, 0, Flags::GLOBAL);
    let subject = Arc::new(Subject::one_byte(b"bbb"));
    let mut positions = Vec::new();
    let mut global = re.global_matches(&subject);
    while let Some(registers) = global.fetch_next().unwrap() {
        positions.push((registers[0], registers[1]));
    }
    assert_eq!(positions, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
}

#[test]
fn scenario_g_surrogate_pair_atom() {
    // The class [😀] in unicode mode denotes the single code
    // point U+1F600, i.e. an atom of one surrogate pair.
    let tree = Tree::Atom(vec![0xD83D, 0xDE00]);
    let (engine, re) = compile("[\\uD83D\\uDE00]", tree, 0, Flags::UNICODE);
    let subject = Arc::new(Subject::two_byte(&[0xD83D, 0xDE00]));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![0, 2]));
}

#[test]
fn unicode_exec_steps_back_to_lead_surrogate() {
    // Starting inside a surrogate pair, a global unicode matcher steps
    // back to the lead surrogate rather than splitting the pair. The
    // capture keeps the pattern off the substring-search fast path.
    let tree = capture(1, Tree::Atom(vec![0xD83D, 0xDE00]));
    let (engine, re) =
        compile("(\\u{1F600})", tree, 1, Flags::UNICODE | Flags::GLOBAL);
    let subject = Arc::new(Subject::two_byte(&[0xD83D, 0xDE00]));
    assert_eq!(exec(&engine, &re, &subject, 1), Some(vec![0, 2, 0, 2]));
}

#[test]
fn scenario_h_atom_strategy() {
    let (engine, re) = compile("abc", Tree::atom_str("abc"), 0, Flags::empty());
    let subject = Arc::new(Subject::one_byte(b"zzabczz"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![2, 5]));
    assert_eq!(exec(&engine, &re, &subject, 3), None);
}

#[test]
fn global_unicode_empty_match_skips_surrogate_pairs() {
    // x* matches empty everywhere; in unicode mode the empty match at the
    // lead surrogate advances by two.
    let tree = quantifier(0, MAX_MATCHES, true, Tree::atom_str("x"));
    let (_engine, re) = compile("x*", tree, 0, Flags::GLOBAL | Flags::UNICODE);
    let subject = Arc::new(Subject::two_byte(&[0xD83D, 0xDE00, b'a' as u16]));
    let mut positions = Vec::new();
    let mut global = re.global_matches(&subject);
    while let Some(registers) = global.fetch_next().unwrap() {
        positions.push(registers[0]);
    }
    assert_eq!(positions, vec![0, 2, 3]);
}

// -----------------------------------------------------------------
// Equivalence with the reference matcher.

#[test]
fn literals_and_classes_match_like_the_reference() {
    assert_matches_reference!(
        "abc",
        Tree::atom_str("abc"),
        0,
        Flags::empty(),
        ["", "abc", "xxabcxx", "ab", "abd", "aabbcc", "xabcabcx"]
    );
    assert_matches_reference!(
        "[b-d]x",
        Tree::seq(vec![
            Tree::class(&[(b'b' as u32, b'd' as u32)]),
            Tree::atom_str("x"),
        ]),
        0,
        Flags::empty(),
        ["bx", "cx", "dx", "ax", "ex", "zzdxzz", "x"]
    );
    assert_matches_reference!(
        "[^b-d]x",
        Tree::seq(vec![
            Tree::negated_class(&[(b'b' as u32, b'd' as u32)]),
            Tree::atom_str("x"),
        ]),
        0,
        Flags::empty(),
        ["bx", "ax", "ex", "xx", "bbax"]
    );
}

#[test]
fn case_insensitive_matching_matches_like_the_reference() {
    assert_matches_reference!(
        "abc",
        Tree::atom_str("abc"),
        0,
        Flags::IGNORE_CASE,
        ["ABC", "aBc", "abC", "xAbCx", "ab", "ABD"]
    );
    assert_matches_reference!(
        "[x-z]+",
        quantifier(1, MAX_MATCHES, true, Tree::class(&[(b'x' as u32, b'z' as u32)])),
        0,
        Flags::IGNORE_CASE,
        ["XYZ", "xYz", "w", "aXa", "zzzz"]
    );
}

#[test]
fn alternations_match_like_the_reference() {
    assert_matches_reference!(
        "foo|bar|baz",
        Tree::Alternation(vec![
            Tree::atom_str("foo"),
            Tree::atom_str("bar"),
            Tree::atom_str("baz"),
        ]),
        0,
        Flags::empty(),
        ["foo", "bar", "baz", "xbazx", "ba", "bafoo", "barbaz"]
    );
    // Alternatives sharing a prefix exercise the quick-check merge.
    assert_matches_reference!(
        "(ab|ac)d",
        Tree::seq(vec![
            capture(
                1,
                Tree::Alternation(vec![Tree::atom_str("ab"), Tree::atom_str("ac")]),
            ),
            Tree::atom_str("d"),
        ]),
        1,
        Flags::empty(),
        ["abd", "acd", "abc", "xacdx", "ad", "aabdacd"]
    );
}

#[test]
fn quantifiers_match_like_the_reference() {
    assert_matches_reference!(
        "a{2,4}",
        quantifier(2, 4, true, Tree::atom_str("a")),
        0,
        Flags::empty(),
        ["", "a", "aa", "aaa", "aaaa", "aaaaaa", "baab"]
    );
    assert_matches_reference!(
        "a*?b",
        Tree::seq(vec![
            quantifier(0, MAX_MATCHES, false, Tree::atom_str("a")),
            Tree::atom_str("b"),
        ]),
        0,
        Flags::empty(),
        ["b", "ab", "aaab", "aaa", "xb"]
    );
    assert_matches_reference!(
        "(a|b)+",
        quantifier(
            1,
            MAX_MATCHES,
            true,
            capture(1, Tree::Alternation(vec![Tree::atom_str("a"), Tree::atom_str("b")])),
        ),
        1,
        Flags::empty(),
        ["ab", "ba", "c", "cab", "abababc"]
    );
    // A body that can match empty exercises the empty-match check.
    assert_matches_reference!(
        "(a?)*b",
        Tree::seq(vec![
            quantifier(0, MAX_MATCHES, true, capture(1, quantifier(0, 1, true, Tree::atom_str("a")))),
            Tree::atom_str("b"),
        ]),
        1,
        Flags::empty(),
        ["b", "ab", "aab", "x"]
    );
}

#[test]
fn anchors_match_like_the_reference() {
    assert_matches_reference!(
        "^ab",
        Tree::seq(vec![
            Tree::Assertion(AssertionKind::StartOfInput),
            Tree::atom_str("ab"),
        ]),
        0,
        Flags::empty(),
        ["ab", "xab", "abx", ""]
    );
    assert_matches_reference!(
        "ab$",
        Tree::seq(vec![
            Tree::atom_str("ab"),
            Tree::Assertion(AssertionKind::EndOfInput),
        ]),
        0,
        Flags::empty(),
        ["ab", "xab", "abx", "aab"]
    );
    assert_matches_reference!(
        "\\Bend",
        Tree::seq(vec![
            Tree::Assertion(AssertionKind::NonBoundary),
            Tree::atom_str("end"),
        ]),
        0,
        Flags::empty(),
        ["bend", "end", " end", "xxendxx"]
    );
}

#[test]
fn back_references_match_like_the_reference() {
    // (a|b)\1
    assert_matches_reference!(
        "(a|b)\\1",
        Tree::seq(vec![
            capture(1, Tree::Alternation(vec![Tree::atom_str("a"), Tree::atom_str("b")])),
            Tree::BackReference(1),
        ]),
        1,
        Flags::empty(),
        ["aa", "bb", "ab", "ba", "xbbx", "a"]
    );
    // An unset capture matches the empty string.
    assert_matches_reference!(
        "(x)?y\\1",
        Tree::seq(vec![
            quantifier(0, 1, true, capture(1, Tree::atom_str("x"))),
            Tree::atom_str("y"),
            Tree::BackReference(1),
        ]),
        1,
        Flags::empty(),
        ["y", "xyx", "xy", "yz"]
    );
}

#[test]
fn lookbehind_matches_like_the_reference() {
    // (?<=ab)c
    assert_matches_reference!(
        "(?<=ab)c",
        Tree::seq(vec![
            Tree::Lookaround {
                positive: true,
                behind: true,
                body: Box::new(Tree::atom_str("ab")),
            },
            Tree::atom_str("c"),
        ]),
        0,
        Flags::empty(),
        ["abc", "c", "xc", "ababc", "abd"]
    );
    // (?<!a)b
    assert_matches_reference!(
        "(?<!a)b",
        Tree::seq(vec![
            Tree::Lookaround {
                positive: false,
                behind: true,
                body: Box::new(Tree::atom_str("a")),
            },
            Tree::atom_str("b"),
        ]),
        0,
        Flags::empty(),
        ["b", "ab", "cb", "aab", "abb"]
    );
}

#[test]
fn unanchored_scans_match_like_the_reference() {
    // Long unanchored literal tails exercise the Boyer-Moore skip loop.
    assert_matches_reference!(
        "needle",
        Tree::atom_str("needle"),
        0,
        // The ignore-case flag forces the irregexp strategy.
        Flags::IGNORE_CASE,
        [
            "needle",
            "haystack haystack haystack needle haystack",
            "haystack haystack haystack haystack haystac",
            "neeneedlele",
            "NEEDLE at the start"
        ]
    );
}

// -----------------------------------------------------------------
// Compilation behaviour.

#[test]
fn failed_match_leaves_match_info_untouched() {
    let (engine, re) = compile("abcdefgh", Tree::atom_str("abcdefgh"), 0, Flags::empty());
    let hit = Arc::new(Subject::one_byte(b"xxabcdefghxx"));
    let miss = Arc::new(Subject::one_byte(b"nothing here"));
    let mut info = MatchInfo::new();
    assert!(re.exec(&engine, &hit, 0, &mut info).unwrap());
    assert_eq!(info.capture(0), Some((2, 10)));
    assert!(!re.exec(&engine, &miss, 0, &mut info).unwrap());
    // The record still describes the successful match.
    assert_eq!(info.capture(0), Some((2, 10)));
    assert_eq!(info.last_subject().map(|s| s.len()), Some(hit.len()));
}

#[test]
fn compiling_in_two_engines_is_behaviorally_identical() {
    let tree = Tree::seq(vec![
        Tree::atom_str("a"),
        quantifier(0, MAX_MATCHES, true, Tree::class(&[(b'0' as u32, b'9' as u32)])),
        Tree::atom_str("z"),
    ]);
    let (engine1, re1) = compile("a[0-9]*z", tree.clone(), 0, Flags::empty());
    let (engine2, re2) = compile("a[0-9]*z", tree, 0, Flags::empty());
    for subject in ["a123z", "az", "a123", "xxa9zxx"] {
        let subject = Arc::new(Subject::from_str(subject));
        assert_eq!(
            exec(&engine1, &re1, &subject, 0),
            exec(&engine2, &re2, &subject, 0)
        );
    }
}

#[test]
fn too_many_captures_is_a_compile_error() {
    // Register numbers are bounded by the bytecode format.
    let capture_count = 33_000;
    let children: Vec<Tree> =
        (1..=capture_count).map(|index| capture(index, Tree::atom_str("a"))).collect();
    let tree = Tree::Sequence(children);
    let engine = Engine::new();
    let re = engine
        .compile("wide", CompileData::new(tree, capture_count), Flags::empty())
        .unwrap();
    let subject = Arc::new(Subject::one_byte(b"a"));
    let mut info = MatchInfo::new();
    assert_eq!(re.exec(&engine, &subject, 0, &mut info), Err(Error::TooBig));
}

#[test]
fn deep_alternations_compile_via_the_work_list() {
    // A pattern deep enough that emission must fall back to the work list
    // instead of recursing.
    let mut tree = Tree::atom_str("end");
    for _ in 0..300 {
        tree = Tree::Alternation(vec![Tree::atom_str("q"), Tree::seq(vec![
            Tree::atom_str("p"),
            tree,
        ])]);
    }
    let (engine, re) = compile("deep", tree, 0, Flags::empty());
    let mut subject_text = String::new();
    for _ in 0..300 {
        subject_text.push('p');
    }
    subject_text.push_str("end");
    let subject = Arc::new(Subject::from_str(&subject_text));
    let caps = exec(&engine, &re, &subject, 0).unwrap();
    assert_eq!(caps, vec![0, 303]);

    // The lone-alternative fast path still matches.
    let subject = Arc::new(Subject::one_byte(b"q"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![0, 1]));
}

#[test]
fn exec_all_uses_the_results_cache() {
    let tree = Tree::seq(vec![
        Tree::atom_str("a"),
        capture(1, Tree::class(&[(b'0' as u32, b'9' as u32)])),
    ]);
    let (engine, re) = compile("a([0-9])", tree, 1, Flags::GLOBAL);
    let subject = Arc::new(Subject::one_byte(b"a1 a2 a3"));
    let first = engine.exec_all(&re, &subject).unwrap().unwrap();
    assert_eq!(first.registers_per_match, 4);
    assert_eq!(first.matches, vec![0, 2, 1, 2, 3, 5, 4, 5, 6, 8, 7, 8]);
    assert_eq!(first.last_match, vec![6, 8, 7, 8]);
    // Second run hits the cache and shares the result array.
    let second = engine.exec_all(&re, &subject).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let empty = Arc::new(Subject::one_byte(b"bbb"));
    assert_eq!(engine.exec_all(&re, &empty).unwrap(), None);
}

#[test]
fn end_anchored_patterns_search_from_the_end() {
    // Not start-anchored, end-anchored, and short: the backsearch kicks
    // in and still yields the rightmost match only.
    let tree = Tree::seq(vec![
        Tree::atom_str("ab"),
        Tree::Assertion(AssertionKind::EndOfInput),
    ]);
    let (engine, re) = compile("ab$", tree, 0, Flags::empty());
    let subject = Arc::new(Subject::one_byte(b"ab ab ab"));
    assert_eq!(exec(&engine, &re, &subject, 0), Some(vec![6, 8]));
    let subject = Arc::new(Subject::one_byte(b"ab ab x"));
    assert_eq!(exec(&engine, &re, &subject, 0), None);
}

#[test]
fn sticky_matching_is_anchored_to_the_start_index() {
    let tree = Tree::atom_str("ab");
    let (engine, re) = compile("ab", tree, 0, Flags::STICKY);
    let subject = Arc::new(Subject::one_byte(b"xxab"));
    assert_eq!(exec(&engine, &re, &subject, 0), None);
    assert_eq!(exec(&engine, &re, &subject, 2), Some(vec![2, 4]));
}
