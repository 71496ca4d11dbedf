/*!
The execution orchestrator.

Compiled patterns come in two strategies. A pattern that is nothing but a
literal is matched with a plain substring search; everything else runs as
a compiled program. Which one a pattern gets is decided when it enters the
engine, but programs themselves are compiled lazily, per subject width, the
first time a subject of that width is matched.

Execution prepares a register buffer sized for the compiled program,
invokes it, and on success reshapes the capture registers into a
[`MatchInfo`] record. A [`GlobalMatches`] iterator drives repeated matching
for global patterns, advancing past empty matches by one code unit, or two
when that would split a surrogate pair.
*/

use std::sync::{Arc, Mutex};

use log::debug;
use memchr::memmem;

use crate::ast::{CompileData, Tree};
use crate::cache::Engine;
use crate::codegen::bytecode::Program;
use crate::codegen::interpreter::{match_program, MatchResult};
use crate::compiler::{self, PATTERN_TOO_SHORT_FOR_BOYER_MOORE, MAX_LOOKAHEAD_FOR_BOYER_MOORE};
use crate::ranges::CaseFolder;
use crate::{is_lead_surrogate, is_trail_surrogate, Error, Flags, MAX_ONE_BYTE_CHAR};

/// A subject string, in either of the two representations the engine
/// matches against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Code units that all fit in a byte (Latin-1).
    OneByte(Vec<u8>),
    /// UTF-16 code units.
    TwoByte(Vec<u16>),
}

impl Subject {
    /// Creates a one-byte subject from raw bytes.
    pub fn one_byte(bytes: &[u8]) -> Self {
        Subject::OneByte(bytes.to_vec())
    }

    /// Creates a two-byte subject from UTF-16 code units.
    pub fn two_byte(units: &[u16]) -> Self {
        Subject::TwoByte(units.to_vec())
    }

    /// Encodes a string, using the one-byte representation when every
    /// code unit fits.
    pub fn from_str(s: &str) -> Self {
        let units: Vec<u16> = s.encode_utf16().collect();
        if units.iter().all(|&u| u as u32 <= MAX_ONE_BYTE_CHAR) {
            Subject::OneByte(units.into_iter().map(|u| u as u8).collect())
        } else {
            Subject::TwoByte(units)
        }
    }

    /// Length in code units.
    pub fn len(&self) -> usize {
        match self {
            Subject::OneByte(bytes) => bytes.len(),
            Subject::TwoByte(units) => units.len(),
        }
    }

    /// True if the subject is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for the one-byte representation.
    pub fn is_one_byte(&self) -> bool {
        matches!(self, Subject::OneByte(_))
    }

    /// The code unit at `index`.
    pub(crate) fn get(&self, index: usize) -> u32 {
        match self {
            Subject::OneByte(bytes) => bytes[index] as u32,
            Subject::TwoByte(units) => units[index] as u32,
        }
    }
}

/// The result record of the most recent successful match.
///
/// Holds the number of capture registers in use, the subject the match ran
/// against, and one `[start, end]` pair of offsets per capture; `-1` marks
/// a capture that did not participate. The record grows as needed and can
/// be reused across calls.
#[derive(Debug, Default, Clone)]
pub struct MatchInfo {
    num_capture_registers: usize,
    last_subject: Option<Arc<Subject>>,
    last_input: Option<Arc<Subject>>,
    captures: Vec<i32>,
}

impl MatchInfo {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of capture registers the last match filled in.
    pub fn num_capture_registers(&self) -> usize {
        self.num_capture_registers
    }

    /// The subject of the last match.
    pub fn last_subject(&self) -> Option<&Arc<Subject>> {
        self.last_subject.as_ref()
    }

    /// The input string the last match was requested on.
    pub fn last_input(&self) -> Option<&Arc<Subject>> {
        self.last_input.as_ref()
    }

    /// The bounds of capture `index`, or `None` when it did not take part
    /// in the match. Capture 0 is the whole match.
    pub fn capture(&self, index: usize) -> Option<(usize, usize)> {
        let start = *self.captures.get(2 * index)?;
        let end = *self.captures.get(2 * index + 1)?;
        if start < 0 || end < 0 {
            return None;
        }
        Some((start as usize, end as usize))
    }

    /// Raw capture registers of the last match.
    pub fn captures(&self) -> &[i32] {
        &self.captures[..self.num_capture_registers]
    }

    /// This is the only place where a match info record grows.
    pub(crate) fn set_last_match_info(
        &mut self,
        subject: &Arc<Subject>,
        capture_count: usize,
        registers: &[i32],
    ) {
        let capture_register_count = (capture_count + 1) * 2;
        if self.captures.len() < capture_register_count {
            self.captures.resize(capture_register_count, -1);
        }
        self.num_capture_registers = capture_register_count;
        self.captures[..capture_register_count]
            .copy_from_slice(&registers[..capture_register_count]);
        self.last_subject = Some(Arc::clone(subject));
        self.last_input = Some(Arc::clone(subject));
    }
}

/// One compiled program with the register count it needs.
pub(crate) struct CodeUnit {
    pub program: Program,
    pub register_count: usize,
}

#[derive(Default)]
pub(crate) struct IrregexpCode {
    one_byte: Option<Arc<CodeUnit>>,
    two_byte: Option<Arc<CodeUnit>>,
    max_register_count: usize,
}

pub(crate) enum Strategy {
    /// Plain substring search.
    Atom { needle: Vec<u16> },
    /// The full compiled matcher. Programs are compiled per subject width
    /// on first use.
    Irregexp { code: Mutex<IrregexpCode> },
}

pub(crate) struct RegexpData {
    pub pattern: String,
    pub flags: Flags,
    pub capture_count: usize,
    pub capture_name_map: Option<Vec<(String, usize)>>,
    pub compile_data: CompileData,
    pub strategy: Strategy,
    pub case_folder: Arc<dyn CaseFolder>,
}

/// A compiled regular expression. Cheap to clone; the compiled data is
/// shared.
#[derive(Clone)]
pub struct Regexp {
    pub(crate) data: Arc<RegexpData>,
}

/// Identifies regexps where the full engine beats the plain substring
/// search: short needles over a small alphabet repay the setup cost.
fn has_few_different_characters(units: &[u16]) -> bool {
    let length = units.len().min(MAX_LOOKAHEAD_FOR_BOYER_MOORE as usize);
    if length <= PATTERN_TOO_SHORT_FOR_BOYER_MOORE {
        return false;
    }
    let mut character_found = [false; 128];
    let mut different = 0;
    for &unit in &units[..length] {
        let ch = (unit & 0x7F) as usize;
        if !character_found[ch] {
            character_found[ch] = true;
            different += 1;
            // Low-alphabet means at least 3 times as many characters as
            // different characters.
            if different * 3 > length {
                return false;
            }
        }
    }
    true
}

/// Chooses the strategy for a pattern and bundles its compiled data.
pub(crate) fn build_regexp_data(
    pattern: &str,
    data: CompileData,
    flags: Flags,
    case_folder: Arc<dyn CaseFolder>,
) -> Result<RegexpData, Error> {
    if let Some(error) = &data.error {
        return Err(Error::Syntax(error.clone()));
    }
    let pattern_units: Vec<u16> = pattern.encode_utf16().collect();
    // "Simple" promises the tree is a single atom equal to the pattern
    // text; trust it only when that actually holds, since the tree is the
    // authority on what must be matched.
    let simple = data.simple
        && matches!(&data.tree, Tree::Atom(atom) if *atom == pattern_units);
    let mut strategy = None;
    if simple
        && !flags.ignore_case()
        && !flags.sticky()
        && !has_few_different_characters(&pattern_units)
    {
        strategy = Some(Strategy::Atom { needle: pattern_units });
    } else if let Tree::Atom(atom) = &data.tree {
        if !flags.sticky()
            && data.capture_count == 0
            && !flags.ignore_case()
            && !has_few_different_characters(atom)
        {
            strategy = Some(Strategy::Atom { needle: atom.clone() });
        }
    }
    let strategy = strategy.unwrap_or_else(|| {
        Strategy::Irregexp { code: Mutex::new(IrregexpCode::default()) }
    });
    debug!(
        "pattern /{pattern}/ uses the {} strategy",
        match &strategy {
            Strategy::Atom { .. } => "atom",
            Strategy::Irregexp { .. } => "irregexp",
        }
    );
    let capture_name_map = data.capture_name_map.clone();
    Ok(RegexpData {
        pattern: pattern.to_string(),
        flags,
        capture_count: data.capture_count,
        capture_name_map,
        compile_data: data,
        strategy,
        case_folder,
    })
}

impl Regexp {
    /// The source text of the pattern.
    pub fn pattern(&self) -> &str {
        &self.data.pattern
    }

    /// The flags the pattern was compiled with.
    pub fn flags(&self) -> Flags {
        self.data.flags
    }

    /// Number of capturing groups, not counting the whole match.
    pub fn capture_count(&self) -> usize {
        self.data.capture_count
    }

    /// Names of named capture groups.
    pub fn capture_name_map(&self) -> Option<&[(String, usize)]> {
        self.data.capture_name_map.as_deref()
    }

    /// Matches `subject` from `start`, filling `info` on success. Returns
    /// whether a match was found.
    pub fn exec(
        &self,
        engine: &Engine,
        subject: &Arc<Subject>,
        start: usize,
        info: &mut MatchInfo,
    ) -> Result<bool, Error> {
        assert!(start <= subject.len());
        match &self.data.strategy {
            Strategy::Atom { needle } => self.atom_exec(subject, needle, start, info),
            Strategy::Irregexp { .. } => self.irregexp_exec(engine, subject, start, info),
        }
    }

    /// Iterates all matches of a global pattern over `subject`.
    pub fn global_matches(&self, subject: &Arc<Subject>) -> GlobalMatches {
        GlobalMatches::new(self.clone(), Arc::clone(subject))
    }

    fn atom_exec(
        &self,
        subject: &Arc<Subject>,
        needle: &[u16],
        start: usize,
        info: &mut MatchInfo,
    ) -> Result<bool, Error> {
        let mut registers = [0i32; 2];
        if atom_exec_raw(needle, subject, start, &mut registers) == 0 {
            return Ok(false);
        }
        info.set_last_match_info(subject, 0, &registers);
        Ok(true)
    }

    fn irregexp_exec(
        &self,
        engine: &Engine,
        subject: &Arc<Subject>,
        start: usize,
        info: &mut MatchInfo,
    ) -> Result<bool, Error> {
        let capture_registers = (self.data.capture_count + 1) * 2;
        let found = engine.with_register_buffer(
            self.required_registers(subject)?,
            |registers| -> Result<bool, Error> {
                if !self.exec_raw(subject, start, registers)? {
                    return Ok(false);
                }
                info.set_last_match_info(
                    subject,
                    self.data.capture_count,
                    &registers[..capture_registers],
                );
                Ok(true)
            },
        )?;
        Ok(found)
    }

    /// How many registers a match of `subject` needs, compiling the
    /// matching program first if necessary. The count covers every variant
    /// compiled so far, so one buffer serves both subject widths.
    pub(crate) fn required_registers(&self, subject: &Arc<Subject>) -> Result<usize, Error> {
        match &self.data.strategy {
            Strategy::Atom { .. } => Ok(2),
            Strategy::Irregexp { code } => {
                self.ensure_compiled(subject, subject.is_one_byte())?;
                Ok(code.lock().unwrap().max_register_count)
            }
        }
    }

    /// Runs the pattern over `subject` from `start`, leaving the capture
    /// registers at the start of `registers`. `registers` must hold at
    /// least [`required_registers`] entries.
    ///
    /// [`required_registers`]: Regexp::required_registers
    pub(crate) fn exec_raw(
        &self,
        subject: &Arc<Subject>,
        start: usize,
        registers: &mut [i32],
    ) -> Result<bool, Error> {
        match &self.data.strategy {
            Strategy::Atom { needle } => {
                Ok(atom_exec_raw(needle, subject, start, &mut registers[..2]) > 0)
            }
            Strategy::Irregexp { .. } => {
                let mut is_one_byte = subject.is_one_byte();
                loop {
                    let code = self.ensure_compiled(subject, is_one_byte)?;
                    debug_assert!(registers.len() >= code.register_count);
                    registers.fill(-1);
                    let result = match_program(
                        &code.program,
                        subject,
                        registers,
                        start,
                        self.data.case_folder.as_ref(),
                    );
                    match result {
                        MatchResult::Success => return Ok(true),
                        MatchResult::Failure => return Ok(false),
                        MatchResult::Exception => return Err(Error::MatchStackExhausted),
                        MatchResult::Retry => {
                            // The subject changed representation between
                            // preparation and matching; re-prepare with the
                            // representation it has now and restart.
                            is_one_byte = subject.is_one_byte();
                        }
                    }
                }
            }
        }
    }

    fn ensure_compiled(
        &self,
        subject: &Arc<Subject>,
        is_one_byte: bool,
    ) -> Result<Arc<CodeUnit>, Error> {
        let Strategy::Irregexp { code } = &self.data.strategy else {
            unreachable!();
        };
        let mut code = code.lock().unwrap();
        let slot = if is_one_byte { &code.one_byte } else { &code.two_byte };
        if let Some(unit) = slot {
            return Ok(Arc::clone(unit));
        }
        let result = compiler::compile(
            &self.data.compile_data,
            self.data.flags,
            &self.data.pattern,
            subject,
            is_one_byte,
            Arc::clone(&self.data.case_folder),
        )?;
        let unit = Arc::new(CodeUnit {
            program: result.program,
            register_count: result.num_registers,
        });
        code.max_register_count = code.max_register_count.max(result.num_registers);
        if is_one_byte {
            code.one_byte = Some(Arc::clone(&unit));
        } else {
            code.two_byte = Some(Arc::clone(&unit));
        }
        Ok(unit)
    }
}

/// Fills `output` with up to `output.len() / 2` matches of `needle`,
/// returning how many were found.
fn atom_exec_raw(
    needle: &[u16],
    subject: &Subject,
    mut index: usize,
    output: &mut [i32],
) -> usize {
    let needle_len = needle.len();
    debug_assert!(needle_len > 0);
    if index + needle_len > subject.len() {
        return 0;
    }
    for i in (0..output.len()).step_by(2) {
        let found = search(subject, needle, index);
        match found {
            None => return i / 2,
            Some(at) => {
                output[i] = at as i32;
                output[i + 1] = (at + needle_len) as i32;
                index = at + needle_len;
            }
        }
    }
    output.len() / 2
}

/// Substring search over the four combinations of needle and subject
/// width.
fn search(subject: &Subject, needle: &[u16], from: usize) -> Option<usize> {
    let narrow_needle: Option<Vec<u8>> = if needle.iter().all(|&u| u <= 0xFF) {
        Some(needle.iter().map(|&u| u as u8).collect())
    } else {
        None
    };
    match (subject, narrow_needle) {
        (Subject::OneByte(haystack), Some(needle)) => {
            memmem::find(&haystack[from..], &needle).map(|i| i + from)
        }
        // A needle with wide characters cannot occur in a narrow subject.
        (Subject::OneByte(_), None) => None,
        (Subject::TwoByte(haystack), _) => haystack[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| i + from),
    }
}

/// Iterator over all matches of a global pattern. Matches advance
/// monotonically; an empty match advances by one code unit, or by two when
/// the next two code units form a surrogate pair in unicode mode.
pub struct GlobalMatches {
    regexp: Regexp,
    subject: Arc<Subject>,
    registers: Vec<i32>,
    next_start: usize,
    done: bool,
    failed: Option<Error>,
}

impl GlobalMatches {
    fn new(regexp: Regexp, subject: Arc<Subject>) -> Self {
        debug_assert!(regexp.flags().global());
        let (registers, failed) = match regexp.required_registers(&subject) {
            Ok(count) => (vec![-1; count], None),
            Err(error) => (Vec::new(), Some(error)),
        };
        Self { regexp, subject, registers, next_start: 0, done: false, failed }
    }

    /// The capture registers of the next match, or `None` when the
    /// subject is exhausted.
    pub fn fetch_next(&mut self) -> Result<Option<&[i32]>, Error> {
        if let Some(error) = &self.failed {
            return Err(error.clone());
        }
        if self.done || self.next_start > self.subject.len() {
            self.done = true;
            return Ok(None);
        }
        let found =
            self.regexp.exec_raw(&self.subject, self.next_start, &mut self.registers)?;
        if !found {
            self.done = true;
            return Ok(None);
        }
        let match_start = self.registers[0];
        let match_end = self.registers[1];
        if match_start == match_end {
            self.next_start = self.advance_zero_length(match_end as usize);
        } else {
            self.next_start = match_end as usize;
        }
        let capture_registers = (self.regexp.capture_count() + 1) * 2;
        Ok(Some(&self.registers[..capture_registers]))
    }

    fn advance_zero_length(&self, last_index: usize) -> usize {
        if self.regexp.flags().unicode()
            && last_index + 1 < self.subject.len()
            && is_lead_surrogate(self.subject.get(last_index))
            && is_trail_surrogate(self.subject.get(last_index + 1))
        {
            // Step over the whole surrogate pair.
            return last_index + 2;
        }
        last_index + 1
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn low_alphabet_patterns_avoid_the_atom_strategy() {
        let units = |s: &str| s.encode_utf16().collect::<Vec<u16>>();
        // Too short to be worth deciding.
        assert!(!has_few_different_characters(&units("ab")));
        // Many distinct characters.
        assert!(!has_few_different_characters(&units("abcdefgh")));
        // Few distinct characters, repeated.
        assert!(has_few_different_characters(&units("aabbaabb")));
    }

    #[test]
    fn substring_search_width_combinations() {
        let needle = |s: &str| s.encode_utf16().collect::<Vec<u16>>();
        let narrow = Subject::one_byte(b"zzabczz");
        let wide = Subject::two_byte(&needle("zz\u{1F600}abc"));

        assert_eq!(search(&narrow, &needle("abc"), 0), Some(2));
        assert_eq!(search(&narrow, &needle("abc"), 3), None);
        // Wide needle in a narrow subject cannot match.
        assert_eq!(search(&narrow, &needle("\u{1F600}"), 0), None);
        assert_eq!(search(&wide, &needle("abc"), 0), Some(4));
        assert_eq!(search(&wide, &needle("\u{1F600}"), 0), Some(2));
    }

    #[test]
    fn subject_from_str_picks_the_narrow_representation() {
        assert!(Subject::from_str("hello").is_one_byte());
        assert!(Subject::from_str("héllo").is_one_byte());
        assert!(!Subject::from_str("h€llo").is_one_byte());
        assert_eq!(Subject::from_str("😀").len(), 2);
    }
}
