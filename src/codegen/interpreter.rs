/*!
Executes bytecode produced by [`BytecodeAssembler`].

The machine state is the current position, a current-character register
holding up to four packed code units, a register file shared with the
caller (capture registers live at the low indices) and one stack that holds
backtrack targets, saved positions and saved register values alike. The
compiled code knows which kind of value it pushed where, so a single stack
suffices, and saving/restoring the stack pointer through a register is what
implements submatches.

[`BytecodeAssembler`]: super::bytecode::BytecodeAssembler
*/

use smallvec::SmallVec;

use crate::codegen::bytecode::Program;
use crate::codegen::instr::{Instr, InstrParser};
use crate::codegen::TABLE_MASK;
use crate::exec::Subject;
use crate::ranges::CaseFolder;
use crate::{is_lead_surrogate, is_trail_surrogate};

/// Outcome of one interpreter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchResult {
    /// A match was found; the registers hold the captures.
    Success,
    /// No match.
    Failure,
    /// Matching was aborted; surfaced to the caller as an error.
    Exception,
    /// The subject must be re-prepared and matching restarted.
    Retry,
}

/// Entries the backtrack stack can hold before matching is aborted.
const BACKTRACK_STACK_LIMIT: usize = 1 << 16;

/// Runs `program` over `subject` starting at `start`. `registers` must be
/// sized to the register count the program was compiled with.
pub(crate) fn match_program(
    program: &Program,
    subject: &Subject,
    registers: &mut [i32],
    start: usize,
    folder: &dyn CaseFolder,
) -> MatchResult {
    match subject {
        Subject::OneByte(bytes) => {
            raw_match(&program.code, bytes.as_slice(), registers, start, folder)
        }
        Subject::TwoByte(units) => {
            raw_match(&program.code, units.as_slice(), registers, start, folder)
        }
    }
}

pub(crate) trait Char: Copy {
    fn to_u32(self) -> u32;
    const SHIFT: u32;
}

impl Char for u8 {
    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }
    const SHIFT: u32 = 8;
}

impl Char for u16 {
    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }
    const SHIFT: u32 = 16;
}

#[inline]
fn pack_chars<C: Char>(subject: &[C], pos: usize, characters: usize) -> u32 {
    let mut packed = 0u32;
    for i in (0..characters).rev() {
        packed = (packed << C::SHIFT) | subject[pos + i].to_u32();
    }
    packed
}

fn chars_equal_ignore_case(folder: &dyn CaseFolder, c1: u32, c2: u32) -> bool {
    if c1 == c2 {
        return true;
    }
    let mut equivalents = SmallVec::<[u32; 4]>::new();
    folder.fold(c1, &mut equivalents);
    equivalents.contains(&c2)
}

fn raw_match<C: Char>(
    code: &[u8],
    subject: &[C],
    registers: &mut [i32],
    start: usize,
    folder: &dyn CaseFolder,
) -> MatchResult {
    let parser = InstrParser::new(code);
    let len = subject.len() as isize;
    let mut current = start as isize;
    let mut current_char = 0u32;
    let mut stack: Vec<i32> = Vec::with_capacity(64);
    let mut pc = 0usize;

    macro_rules! push {
        ($value:expr) => {{
            if stack.len() >= BACKTRACK_STACK_LIMIT {
                return MatchResult::Exception;
            }
            stack.push($value);
        }};
    }

    loop {
        let (instr, next) = parser.decode(pc);
        pc = next;
        match instr {
            Instr::Break => return MatchResult::Exception,
            Instr::Fail => return MatchResult::Failure,
            Instr::Succeed => return MatchResult::Success,
            Instr::AdvanceCp { by } => current += by as isize,
            Instr::Goto { addr } => pc = addr as usize,
            Instr::PushBacktrack { addr } => push!(addr as i32),
            Instr::PopBacktrack => match stack.pop() {
                Some(addr) => pc = addr as usize,
                None => return MatchResult::Exception,
            },
            Instr::PushCp => push!(current as i32),
            Instr::PopCp => match stack.pop() {
                Some(pos) => current = pos as isize,
                None => return MatchResult::Exception,
            },
            Instr::PushRegister { reg } => push!(registers[reg as usize]),
            Instr::PopRegister { reg } => match stack.pop() {
                Some(value) => registers[reg as usize] = value,
                None => return MatchResult::Exception,
            },
            Instr::SetRegister { reg, value } => registers[reg as usize] = value,
            Instr::AdvanceRegister { reg, by } => registers[reg as usize] += by,
            Instr::ClearRegisters { from, to } => {
                for reg in from..=to {
                    registers[reg as usize] = -1;
                }
            }
            Instr::SetRegisterToCp { reg, cp_offset } => {
                registers[reg as usize] = (current + cp_offset as isize) as i32;
            }
            Instr::SetCpToRegister { reg } => current = registers[reg as usize] as isize,
            Instr::SetRegisterToSp { reg } => {
                registers[reg as usize] = stack.len() as i32;
            }
            Instr::SetSpToRegister { reg } => stack.truncate(registers[reg as usize] as usize),
            Instr::SetCpFromEnd { by } => {
                let target = len - by as isize;
                if current < target {
                    current = target;
                }
            }
            Instr::LoadCurrentChar { cp_offset, characters, on_failure } => {
                let pos = current + cp_offset as isize;
                if pos < 0 || pos + characters as isize > len {
                    pc = on_failure as usize;
                } else {
                    current_char = pack_chars(subject, pos as usize, characters as usize);
                }
            }
            Instr::LoadCurrentCharUnchecked { cp_offset, characters } => {
                let pos = current + cp_offset as isize;
                debug_assert!(pos >= 0 && pos + characters as isize <= len);
                current_char = pack_chars(subject, pos as usize, characters as usize);
            }
            Instr::CheckChar { c, addr } => {
                if current_char == c {
                    pc = addr as usize;
                }
            }
            Instr::CheckNotChar { c, addr } => {
                if current_char != c {
                    pc = addr as usize;
                }
            }
            Instr::AndCheckChar { c, mask, addr } => {
                if current_char & mask == c {
                    pc = addr as usize;
                }
            }
            Instr::AndCheckNotChar { c, mask, addr } => {
                if current_char & mask != c {
                    pc = addr as usize;
                }
            }
            Instr::MinusAndCheckNotChar { c, minus, mask, addr } => {
                if current_char.wrapping_sub(minus as u32) & mask as u32 != c as u32 {
                    pc = addr as usize;
                }
            }
            Instr::CheckCharInRange { from, to, addr } => {
                if (from as u32..=to as u32).contains(&current_char) {
                    pc = addr as usize;
                }
            }
            Instr::CheckCharNotInRange { from, to, addr } => {
                if !(from as u32..=to as u32).contains(&current_char) {
                    pc = addr as usize;
                }
            }
            Instr::CheckCharGt { limit, addr } => {
                if current_char > limit as u32 {
                    pc = addr as usize;
                }
            }
            Instr::CheckCharLt { limit, addr } => {
                if current_char < limit as u32 {
                    pc = addr as usize;
                }
            }
            Instr::CheckBitInTable { table, addr } => {
                let bit = (current_char & TABLE_MASK) as usize;
                if table[bit / 8] & (1 << (bit % 8)) != 0 {
                    pc = addr as usize;
                }
            }
            Instr::CheckAtStart { addr } => {
                if current == 0 {
                    pc = addr as usize;
                }
            }
            Instr::CheckNotAtStart { cp_offset, addr } => {
                if current + cp_offset as isize != 0 {
                    pc = addr as usize;
                }
            }
            Instr::CheckPosition { cp_offset, addr } => {
                let pos = current + cp_offset as isize;
                if pos < 0 || pos >= len {
                    pc = addr as usize;
                }
            }
            Instr::CheckGreedy { addr } => {
                if stack.last() == Some(&(current as i32)) {
                    stack.pop();
                    pc = addr as usize;
                }
            }
            Instr::CheckRegisterLt { reg, value, addr } => {
                if registers[reg as usize] < value {
                    pc = addr as usize;
                }
            }
            Instr::CheckRegisterGe { reg, value, addr } => {
                if registers[reg as usize] >= value {
                    pc = addr as usize;
                }
            }
            Instr::CheckRegisterEqPos { reg, addr } => {
                if registers[reg as usize] as isize == current {
                    pc = addr as usize;
                }
            }
            Instr::CheckNotBackRef { reg, backward, addr } => {
                let from = registers[reg as usize];
                let capture_len = registers[reg as usize + 1] - from;
                if from >= 0 && capture_len > 0 {
                    let from = from as isize;
                    let capture_len = capture_len as isize;
                    let matched = |at: isize| {
                        (0..capture_len).all(|i| {
                            subject[(from + i) as usize].to_u32()
                                == subject[(at + i) as usize].to_u32()
                        })
                    };
                    if backward {
                        if current - capture_len < 0 || !matched(current - capture_len) {
                            pc = addr as usize;
                        } else {
                            current -= capture_len;
                        }
                    } else if current + capture_len > len || !matched(current) {
                        pc = addr as usize;
                    } else {
                        current += capture_len;
                    }
                }
            }
            Instr::CheckNotBackRefNoCase { reg, backward, unicode: _, addr } => {
                let from = registers[reg as usize];
                let capture_len = registers[reg as usize + 1] - from;
                if from >= 0 && capture_len > 0 {
                    let from = from as isize;
                    let capture_len = capture_len as isize;
                    let matched = |at: isize| {
                        (0..capture_len).all(|i| {
                            chars_equal_ignore_case(
                                folder,
                                subject[(from + i) as usize].to_u32(),
                                subject[(at + i) as usize].to_u32(),
                            )
                        })
                    };
                    if backward {
                        if current - capture_len < 0 || !matched(current - capture_len) {
                            pc = addr as usize;
                        } else {
                            current -= capture_len;
                        }
                    } else if current + capture_len > len || !matched(current) {
                        pc = addr as usize;
                    } else {
                        current += capture_len;
                    }
                }
            }
            Instr::CheckNotInSurrogatePair { cp_offset, addr } => {
                let pos = current + cp_offset as isize;
                if pos > 0
                    && pos < len
                    && is_trail_surrogate(subject[pos as usize].to_u32())
                    && is_lead_surrogate(subject[(pos - 1) as usize].to_u32())
                {
                    pc = addr as usize;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::codegen::bytecode::BytecodeAssembler;
    use crate::codegen::{MacroAssembler, Mode};
    use crate::ranges::Latin1CaseFolder;

    fn run(masm: BytecodeAssembler, subject: &[u8], registers: &mut [i32]) -> MatchResult {
        let program = masm.get_code();
        let subject = Subject::OneByte(subject.to_vec());
        match_program(&program, &subject, registers, 0, &Latin1CaseFolder)
    }

    #[test]
    fn a_hand_written_literal_matcher() {
        // Matches "hi" at position 0, storing the bounds in r0/r1.
        let mut masm = BytecodeAssembler::new(Mode::OneByte);
        let fail = masm.create_label();
        masm.push_backtrack(fail);
        masm.load_current_character(1, None, true, 1);
        masm.check_not_character(b'i' as u32, None);
        masm.load_current_character(0, None, true, 1);
        masm.check_not_character(b'h' as u32, None);
        masm.write_current_position_to_register(0, 0);
        masm.write_current_position_to_register(1, 2);
        masm.succeed();
        masm.bind(fail);
        masm.fail();

        let mut registers = [-1i32; 2];
        assert_eq!(run(masm, b"hi", &mut registers), MatchResult::Success);
        assert_eq!(registers, [0, 2]);
    }

    #[test]
    fn backtracking_pops_saved_position() {
        // Tries the wrong branch first, backtracks, succeeds on the other.
        let mut masm = BytecodeAssembler::new(Mode::OneByte);
        let fail = masm.create_label();
        let second = masm.create_label();
        masm.push_backtrack(fail);
        masm.push_backtrack(second);
        masm.load_current_character(0, None, true, 1);
        masm.check_not_character(b'x' as u32, None);
        masm.succeed();
        masm.bind(second);
        masm.load_current_character(0, None, true, 1);
        masm.check_not_character(b'a' as u32, None);
        masm.succeed();
        masm.bind(fail);
        masm.fail();

        let mut registers = [];
        assert_eq!(run(masm, b"a", &mut registers), MatchResult::Success);
    }

    #[test]
    fn multi_character_load_packs_little_endian() {
        let mut masm = BytecodeAssembler::new(Mode::OneByte);
        let ok = masm.create_label();
        let fail = masm.create_label();
        masm.push_backtrack(fail);
        masm.load_current_character(0, None, true, 2);
        // 'a' | 'b' << 8
        masm.check_character(0x6261, Some(ok));
        masm.fail();
        masm.bind(ok);
        masm.succeed();
        masm.bind(fail);
        masm.fail();

        let mut registers = [];
        assert_eq!(run(masm, b"ab", &mut registers), MatchResult::Success);
    }
}
