/*!
Sets of code points, represented as canonicalized lists of closed ranges.

Character classes keep their contents as a `Vec<CharacterRange>`. Most of the
compiler requires lists to be canonical (sorted by start, non-overlapping,
non-adjacent), which [`canonicalize`] establishes. Case-insensitive matching
expands classes with their case equivalents through an injected
[`CaseFolder`], so the engine itself carries no case tables beyond the
Latin-1 folder used by default.
*/

use itertools::Itertools;
use smallvec::SmallVec;

use crate::{MAX_ONE_BYTE_CHAR, MAX_UTF16_CODE_UNIT};

/// A closed interval `[from, to]` of code points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterRange {
    /// First code point in the range.
    pub from: u32,
    /// Last code point in the range, inclusive.
    pub to: u32,
}

impl CharacterRange {
    /// Creates the range `[from, to]`. `from` must not exceed `to`.
    pub fn new(from: u32, to: u32) -> Self {
        debug_assert!(from <= to);
        Self { from, to }
    }

    /// Creates a range holding the single code point `c`.
    pub fn singleton(c: u32) -> Self {
        Self { from: c, to: c }
    }

    /// Creates the range covering every UTF-16 code unit.
    pub fn everything() -> Self {
        Self { from: 0, to: MAX_UTF16_CODE_UNIT }
    }

    /// True if `c` lies within the range.
    #[inline]
    pub fn contains(&self, c: u32) -> bool {
        self.from <= c && c <= self.to
    }

    /// True if the range covers all code points up to `max_char`.
    #[inline]
    pub fn is_everything(&self, max_char: u32) -> bool {
        self.from == 0 && self.to >= max_char
    }
}

/// Sorts `ranges` by start and merges overlapping or adjacent entries.
pub fn canonicalize(ranges: &mut Vec<CharacterRange>) {
    if ranges.len() <= 1 {
        return;
    }
    ranges.sort_unstable_by_key(|r| r.from);
    let merged: Vec<CharacterRange> = ranges
        .drain(..)
        .coalesce(|a, b| {
            if b.from <= a.to.saturating_add(1) {
                Ok(CharacterRange::new(a.from, a.to.max(b.to)))
            } else {
                Err((a, b))
            }
        })
        .collect();
    *ranges = merged;
}

/// Adds `range` to the canonical list `ranges`, keeping it canonical.
pub fn add_range(ranges: &mut Vec<CharacterRange>, range: CharacterRange) {
    ranges.push(range);
    canonicalize(ranges);
}

/// Returns the complement of the canonical list `ranges` relative to
/// `[0, max_char]`.
pub fn negate(ranges: &[CharacterRange], max_char: u32) -> Vec<CharacterRange> {
    let mut result = Vec::with_capacity(ranges.len() + 1);
    let mut next = 0u32;
    for range in ranges {
        if range.from > max_char {
            break;
        }
        if range.from > next {
            result.push(CharacterRange::new(next, range.from - 1));
        }
        next = range.to.saturating_add(1);
        if next > max_char {
            return result;
        }
    }
    if next <= max_char {
        result.push(CharacterRange::new(next, max_char));
    }
    result
}

/// True if any range in the canonical list contains `c`.
pub fn list_contains(ranges: &[CharacterRange], c: u32) -> bool {
    // The list is sorted, so a binary search on the start would do, but
    // classes are short and a linear scan is simpler.
    ranges.iter().any(|r| r.contains(c))
}

/// True if the canonical list covers all of `[0, max_char]`.
pub fn list_is_everything(ranges: &[CharacterRange], max_char: u32) -> bool {
    ranges.len() == 1 && ranges[0].is_everything(max_char)
}

/// A 128-entry boolean table, the unit of the macro-assembler's
/// bit-table checks.
pub type BoolTable = bitvec::array::BitArray<[u64; 2]>;

/// Builds a 128-entry table with a bit set for every code point of `ranges`
/// that falls below 128.
pub fn list_to_table(ranges: &[CharacterRange]) -> BoolTable {
    let mut table = BoolTable::ZERO;
    for range in ranges {
        if range.from >= 128 {
            break;
        }
        for c in range.from..=range.to.min(127) {
            table.set(c as usize, true);
        }
    }
    table
}

/// Oracle for case-insensitive matching.
///
/// For a code point, `fold` reports the other code points that compare equal
/// to it under case folding. Reporting nothing means the code point only
/// matches itself. Implementations are free to be partial; whatever they do
/// not report is treated as case-distinct.
pub trait CaseFolder: Sync + Send {
    /// Appends the case equivalents of `c` (not including `c` itself) to
    /// `out`. At most four code points take part in one equivalence class.
    fn fold(&self, c: u32, out: &mut SmallVec<[u32; 4]>);
}

/// The default [`CaseFolder`]. Covers ASCII and Latin-1 letters plus the
/// code points outside Latin-1 that fold into it (micro sign, ÿ, Kelvin
/// sign, long s).
#[derive(Debug, Default, Clone, Copy)]
pub struct Latin1CaseFolder;

impl CaseFolder for Latin1CaseFolder {
    fn fold(&self, c: u32, out: &mut SmallVec<[u32; 4]>) {
        match c {
            0x6B | 0x4B => {
                out.push(if c == b'k' as u32 { b'K' as u32 } else { b'k' as u32 });
                out.push(0x212A);
            }
            0x212A => {
                out.push(b'K' as u32);
                out.push(b'k' as u32);
            }
            0x73 | 0x53 => {
                out.push(if c == b's' as u32 { b'S' as u32 } else { b's' as u32 });
                out.push(0x17F);
            }
            0x17F => {
                out.push(b'S' as u32);
                out.push(b's' as u32);
            }
            0x41..=0x5A => out.push(c + 0x20),
            0x61..=0x7A => out.push(c - 0x20),
            // Latin-1 letters, except ×, ÷ and the caseless ß.
            0xC0..=0xDE if c != 0xD7 => out.push(c + 0x20),
            0xE0..=0xFE if c != 0xF7 && c != 0xFF => out.push(c - 0x20),
            0xB5 => {
                out.push(0x39C);
                out.push(0x3BC);
            }
            0x39C | 0x3BC => {
                out.push(0xB5);
                out.push(if c == 0x39C { 0x3BC } else { 0x39C });
            }
            0xFF => out.push(0x178),
            0x178 => out.push(0xFF),
            _ => {}
        }
    }
}

/// Returns the sorted set of code units that match `c` under case folding,
/// including `c` itself. On a one-byte subject, equivalents above 0xFF are
/// dropped; the result may then be empty, meaning `c` cannot match at all.
pub(crate) fn case_independent_letters(
    folder: &dyn CaseFolder,
    c: u32,
    one_byte: bool,
) -> SmallVec<[u32; 4]> {
    let mut letters = SmallVec::new();
    letters.push(c);
    folder.fold(c, &mut letters);
    letters.sort_unstable();
    letters.dedup();
    if one_byte {
        letters.retain(|&mut l| l <= MAX_ONE_BYTE_CHAR);
    }
    letters
}

/// Expands the canonical list `ranges` with all case equivalents of its
/// members, then re-canonicalizes.
pub fn add_case_equivalents(
    folder: &dyn CaseFolder,
    ranges: &mut Vec<CharacterRange>,
    one_byte: bool,
) {
    let max_char = if one_byte { MAX_ONE_BYTE_CHAR } else { MAX_UTF16_CODE_UNIT };
    if list_is_everything(ranges, max_char) {
        // Closed under folding already.
        return;
    }
    let mut equivalents = Vec::new();
    let mut folded = SmallVec::new();
    for range in ranges.iter() {
        for c in range.from..=range.to.min(MAX_UTF16_CODE_UNIT) {
            folded.clear();
            folder.fold(c, &mut folded);
            for &e in folded.iter() {
                if e <= max_char && !list_contains(ranges, e) {
                    equivalents.push(CharacterRange::singleton(e));
                }
            }
        }
    }
    ranges.extend(equivalents);
    canonicalize(ranges);
}

/// Maps the code points outside Latin-1 that have a Latin-1 case equivalent
/// onto that equivalent. Everything else maps to itself.
pub(crate) fn try_convert_to_latin1(c: u16) -> u16 {
    match c {
        0x39C | 0x3BC => 0xB5,
        0x178 => 0xFF,
        _ => c,
    }
}

/// True if the range contains one of the code points whose case equivalents
/// reach back into Latin-1 (see [`try_convert_to_latin1`]).
pub(crate) fn range_contains_latin1_equivalents(range: CharacterRange) -> bool {
    range.contains(0x39C) || range.contains(0x3BC) || range.contains(0x178)
}

pub(crate) fn ranges_contain_latin1_equivalents(ranges: &[CharacterRange]) -> bool {
    ranges.iter().any(|r| range_contains_latin1_equivalents(*r))
}

/// Code points that terminate a line: `\n`, `\r`, U+2028 and U+2029.
pub(crate) const NEWLINE_RANGES: &[CharacterRange] = &[
    CharacterRange { from: 0x0A, to: 0x0A },
    CharacterRange { from: 0x0D, to: 0x0D },
    CharacterRange { from: 0x2028, to: 0x2029 },
];

/// The `\s` set.
pub(crate) const SPACE_RANGES: &[CharacterRange] = &[
    CharacterRange { from: 0x09, to: 0x0D },
    CharacterRange { from: 0x20, to: 0x20 },
    CharacterRange { from: 0xA0, to: 0xA0 },
    CharacterRange { from: 0x1680, to: 0x1680 },
    CharacterRange { from: 0x2000, to: 0x200A },
    CharacterRange { from: 0x2028, to: 0x2029 },
    CharacterRange { from: 0x202F, to: 0x202F },
    CharacterRange { from: 0x205F, to: 0x205F },
    CharacterRange { from: 0x3000, to: 0x3000 },
    CharacterRange { from: 0xFEFF, to: 0xFEFF },
];

/// The `\w` set.
pub(crate) const WORD_RANGES: &[CharacterRange] = &[
    CharacterRange { from: b'0' as u32, to: b'9' as u32 },
    CharacterRange { from: b'A' as u32, to: b'Z' as u32 },
    CharacterRange { from: b'_' as u32, to: b'_' as u32 },
    CharacterRange { from: b'a' as u32, to: b'z' as u32 },
];

/// The `\d` set.
pub(crate) const DIGIT_RANGES: &[CharacterRange] =
    &[CharacterRange { from: b'0' as u32, to: b'9' as u32 }];

/// All surrogate code units.
pub(crate) const SURROGATE_RANGES: &[CharacterRange] =
    &[CharacterRange { from: 0xD800, to: 0xDFFF }];

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use smallvec::SmallVec;

    use super::*;

    fn ranges(pairs: &[(u32, u32)]) -> Vec<CharacterRange> {
        pairs.iter().map(|&(f, t)| CharacterRange::new(f, t)).collect()
    }

    #[test]
    fn canonicalize_sorts_and_merges() {
        let mut r = ranges(&[(10, 20), (0, 4), (5, 9), (30, 40), (35, 50)]);
        canonicalize(&mut r);
        assert_eq!(r, ranges(&[(0, 20), (30, 50)]));
    }

    #[test]
    fn negate_covers_the_gaps() {
        let r = ranges(&[(5, 9), (20, 0xFF)]);
        assert_eq!(negate(&r, 0xFF), ranges(&[(0, 4), (10, 19)]));
        assert_eq!(negate(&[], 0xFF), ranges(&[(0, 0xFF)]));
        assert_eq!(negate(&ranges(&[(0, 0xFF)]), 0xFF), vec![]);
    }

    #[test]
    fn table_covers_low_code_points_only() {
        let table = list_to_table(&ranges(&[(b'a' as u32, b'c' as u32), (0x100, 0x200)]));
        assert!(table[b'a' as usize]);
        assert!(table[b'c' as usize]);
        assert!(!table[b'd' as usize]);
        assert_eq!(table.count_ones(), 3);
    }

    #[test]
    fn latin1_folder_closes_over_ascii() {
        let letters = case_independent_letters(&Latin1CaseFolder, b'a' as u32, false);
        assert_eq!(letters.as_slice(), &[b'A' as u32, b'a' as u32]);

        let letters = case_independent_letters(&Latin1CaseFolder, b'k' as u32, false);
        assert_eq!(letters.as_slice(), &[b'K' as u32, b'k' as u32, 0x212A]);

        // Kelvin sign folds away entirely on a one-byte subject.
        let letters = case_independent_letters(&Latin1CaseFolder, 0x212A, true);
        assert_eq!(letters.as_slice(), &[b'K' as u32, b'k' as u32]);
    }

    #[test]
    fn case_equivalents_expand_classes() {
        let mut r = ranges(&[(b'a' as u32, b'c' as u32)]);
        add_case_equivalents(&Latin1CaseFolder, &mut r, true);
        assert_eq!(r, ranges(&[(b'A' as u32, b'C' as u32), (b'a' as u32, b'c' as u32)]));
    }

    #[test]
    fn folding_mu_is_symmetric() {
        let mut out = SmallVec::new();
        Latin1CaseFolder.fold(0xB5, &mut out);
        assert!(out.contains(&0x39C) && out.contains(&0x3BC));
    }
}
