/*! A trace-based regular expression compiler and bytecode engine.

This crate takes a parsed regular expression syntax tree and turns it into an
executable matching program. The parse itself happens elsewhere: callers hand
in an [`ast::Tree`] plus [`Flags`], and get back a compiled [`Regexp`] that
can be executed against one-byte or two-byte subjects.

Compilation proceeds in three steps:

1. The syntax tree is lowered into a graph of nodes. Each node represents a
   state of the match (text to consume, a choice between alternatives, an
   action on a register, an assertion, and so on). Several whole-graph
   optimizations run on the node graph: an analysis pass that computes
   per-node offsets and expands case equivalences, and a filter pass that
   removes branches which cannot match a one-byte subject.

2. The node graph is walked by the emitter, which produces code through an
   abstract macro-assembler. The emitter virtualizes execution state in a
   trace: register writes and position advances are deferred for as long
   as possible, so that failing paths never pay for them, and each node can
   be emitted several times, specialized for the state it is entered with.
   Alternatives are guarded with mask-and-compare quick checks over up to
   four lookahead characters, and unanchored searches get a Boyer-Moore
   style skip loop.

3. The only macro-assembler backend provided here emits compact bytecode
   that is run by a small register machine with an explicit backtrack stack.
   The [`MacroAssembler`] trait is public so that native backends can be
   plugged in.

A thin orchestrator sits on top: it picks a plain substring search for
patterns that are just an atom, provisions register buffers, reshapes the raw
capture registers into a [`MatchInfo`] record, and caches compilation results
per [`Engine`].

# Example

```rust
use std::sync::Arc;
use irregexp::{ast, Engine, Flags, MatchInfo, Subject};

let engine = Engine::new();

// /a(b|c)*d/ as a syntax tree; the parser lives outside this crate.
let tree = ast::Tree::seq(vec![
    ast::Tree::atom_str("a"),
    ast::Tree::Quantifier {
        min: 0,
        max: ast::MAX_MATCHES,
        greedy: true,
        body: Box::new(ast::Tree::Capture {
            index: 1,
            body: Box::new(ast::Tree::Alternation(vec![
                ast::Tree::atom_str("b"),
                ast::Tree::atom_str("c"),
            ])),
        }),
    },
    ast::Tree::atom_str("d"),
]);

let re = engine
    .compile("a(b|c)*d", ast::CompileData::new(tree, 1), Flags::empty())
    .unwrap();

let subject = Arc::new(Subject::one_byte(b"XabcbdY"));
let mut info = MatchInfo::new();
assert!(re.exec(&engine, &subject, 0, &mut info).unwrap());
assert_eq!(info.capture(0), Some((1, 6)));
```

[`MacroAssembler`]: codegen::MacroAssembler
*/

#![deny(missing_docs)]

pub mod ast;
pub mod codegen;
pub mod ranges;

mod analysis;
mod boyer_moore;
mod cache;
mod compiler;
mod emit;
mod exec;
mod filter;
mod nodes;
mod quickcheck;
mod trace;

#[cfg(test)]
mod tests;

use bitflags::bitflags;
use thiserror::Error;

pub use crate::cache::{Engine, GlobalResults};
pub use crate::exec::{GlobalMatches, MatchInfo, Regexp, Subject};
pub use crate::ranges::{CaseFolder, CharacterRange, Latin1CaseFolder};

/// Largest code unit of a one-byte subject.
pub const MAX_ONE_BYTE_CHAR: u32 = 0xFF;

/// Largest UTF-16 code unit.
pub const MAX_UTF16_CODE_UNIT: u32 = 0xFFFF;

/// Largest Unicode code point.
pub const MAX_CODE_POINT: u32 = 0x10FFFF;

/// First lead surrogate code unit.
pub const LEAD_SURROGATE_START: u32 = 0xD800;
/// Last lead surrogate code unit.
pub const LEAD_SURROGATE_END: u32 = 0xDBFF;
/// First trail surrogate code unit.
pub const TRAIL_SURROGATE_START: u32 = 0xDC00;
/// Last trail surrogate code unit.
pub const TRAIL_SURROGATE_END: u32 = 0xDFFF;

pub(crate) fn is_lead_surrogate(c: u32) -> bool {
    (LEAD_SURROGATE_START..=LEAD_SURROGATE_END).contains(&c)
}

pub(crate) fn is_trail_surrogate(c: u32) -> bool {
    (TRAIL_SURROGATE_START..=TRAIL_SURROGATE_END).contains(&c)
}

bitflags! {
    /// Flags a regular expression is compiled with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        /// Case-insensitive matching.
        const IGNORE_CASE = 0b0000_0001;
        /// `^` and `$` also match at line terminators.
        const MULTILINE = 0b0000_0010;
        /// Matching is anchored at the starting index.
        const STICKY = 0b0000_0100;
        /// Find all matches instead of the first one.
        const GLOBAL = 0b0000_1000;
        /// Full Unicode matching; never splits surrogate pairs.
        const UNICODE = 0b0001_0000;
        /// `.` also matches line terminators.
        const DOT_ALL = 0b0010_0000;
    }
}

impl Flags {
    #[inline]
    pub(crate) fn ignore_case(&self) -> bool {
        self.contains(Flags::IGNORE_CASE)
    }

    #[inline]
    pub(crate) fn multiline(&self) -> bool {
        self.contains(Flags::MULTILINE)
    }

    #[inline]
    pub(crate) fn sticky(&self) -> bool {
        self.contains(Flags::STICKY)
    }

    #[inline]
    pub(crate) fn global(&self) -> bool {
        self.contains(Flags::GLOBAL)
    }

    #[inline]
    pub(crate) fn unicode(&self) -> bool {
        self.contains(Flags::UNICODE)
    }
}

/// Errors produced while compiling or executing a regular expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The pattern failed to parse. The error text comes from the parser,
    /// which runs outside this crate.
    #[error("syntax error in regular expression: {0}")]
    Syntax(String),

    /// The pattern needs more registers or more code than the
    /// macro-assembler supports.
    #[error("RegExp too big")]
    TooBig,

    /// The node graph was too deep to analyze.
    #[error("Stack overflow")]
    StackOverflow,

    /// Matching exhausted the backtrack stack. This is an exceptional
    /// condition, distinct from an ordinary failure to match.
    #[error("regexp matcher ran out of backtrack stack")]
    MatchStackExhausted,
}
