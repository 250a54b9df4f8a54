use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::{BracketKind, Error, ParseError, RuntimeFault};
use crate::interpreter::{Interpreter, Step};
use crate::primitives::{CharSource, emit_char};

/// Configuration for the tape machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrainfuckConfig {
    /// Cell width in bits (1..=64). `None` means unbounded cells that never wrap.
    pub cell_bits: Option<u32>,
}

impl Default for BrainfuckConfig {
    fn default() -> Self {
        Self { cell_bits: Some(8) }
    }
}

/// The classic Brainfuck tape machine.
///
/// - IP (instruction pointer): index into the source characters
/// - pointer: unbounded in both directions, starts at 0
/// - memory: sparse, untouched cells read as 0
///
/// With a finite cell width, `+` and `-` wrap modulo `2^bits`.
pub struct Brainfuck<R: Read, W: Write> {
    code: Vec<char>,
    /// `jumps[i]` is the matching bracket of the bracket at `i`, or `usize::MAX`.
    jumps: Vec<usize>,
    ip: usize,
    pointer: i64,
    memory: HashMap<i64, i128>,
    /// `None` for unbounded cells.
    modulus: Option<i128>,
    input: CharSource<R>,
    output: W,
}

const LESS: char = '<';
const GREATER: char = '>';
const MINUS: char = '-';
const PLUS: char = '+';
const DOT: char = '.';
const COMMA: char = ',';
const LBRACKET: char = '[';
const RBRACKET: char = ']';

impl<R: Read, W: Write> Brainfuck<R, W> {
    pub fn new(input: R, output: W, config: BrainfuckConfig) -> Result<Self, Error> {
        let modulus = match config.cell_bits {
            None => None,
            Some(bits @ 1..=64) => Some(1i128 << bits),
            Some(bits) => {
                return Err(Error::Config(format!(
                    "cell size must be between 1 and 64 bits, got {bits}"
                )));
            }
        };
        Ok(Self {
            code: Vec::new(),
            jumps: Vec::new(),
            ip: 0,
            pointer: 0,
            memory: HashMap::new(),
            modulus,
            input: CharSource::new(input),
            output,
        })
    }

    pub fn pointer(&self) -> i64 {
        self.pointer
    }

    /// Value of the cell under the pointer.
    pub fn current_cell(&self) -> i128 {
        self.cell(self.pointer)
    }

    pub fn cell(&self, index: i64) -> i128 {
        self.memory.get(&index).copied().unwrap_or(0)
    }

    /// Touched memory as a dense list, from the lowest to the highest index.
    pub fn memory_snapshot(&self) -> Vec<i128> {
        let (Some(&lo), Some(&hi)) = (self.memory.keys().min(), self.memory.keys().max()) else {
            return Vec::new();
        };
        (lo..=hi).map(|i| self.cell(i)).collect()
    }

    pub fn jump_table(&self) -> &[usize] {
        &self.jumps
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn adjust(&mut self, delta: i128) -> Result<(), RuntimeFault> {
        let cell = self.memory.entry(self.pointer).or_insert(0);
        *cell = match self.modulus {
            Some(m) => (*cell + delta).rem_euclid(m),
            None => cell.checked_add(delta).ok_or(RuntimeFault::CellOverflow)?,
        };
        Ok(())
    }
}

impl<R: Read, W: Write> Interpreter for Brainfuck<R, W> {
    fn language(&self) -> &'static str {
        "Brainfuck"
    }

    fn load(&mut self, source: &str) -> Result<(), ParseError> {
        let code: Vec<char> = source.chars().collect();
        self.jumps = build_jump_table(&code)?;
        self.code = code;
        self.ip = 0;
        self.pointer = 0;
        self.memory.clear();
        log::debug!("Brainfuck: loaded {} chars", self.code.len());
        Ok(())
    }

    fn step(&mut self) -> Result<Step, Error> {
        let Some(&op) = self.code.get(self.ip) else {
            return Ok(Step::Halt);
        };

        match op {
            GREATER => self.pointer += 1,
            LESS => self.pointer -= 1,
            PLUS => self.adjust(1)?,
            MINUS => self.adjust(-1)?,
            DOT => {
                let value = self.current_cell();
                emit_char(&mut self.output, value)?;
            }
            COMMA => {
                let c = self.input.next_char()?.ok_or(RuntimeFault::EndOfInput)?;
                let code = c as i128;
                let value = match self.modulus {
                    Some(m) => code.rem_euclid(m),
                    None => code,
                };
                self.memory.insert(self.pointer, value);
            }
            LBRACKET => {
                if self.current_cell() == 0 {
                    self.ip = self.jumps[self.ip];
                }
            }
            RBRACKET => {
                if self.current_cell() != 0 {
                    self.ip = self.jumps[self.ip];
                }
            }
            _ => {} // comment
        }
        self.ip += 1;
        Ok(Step::Continue)
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.output.flush()?;
        Ok(())
    }
}

/// Build the bracket-match table for `code`.
///
/// `result[i]` is the index of the bracket matching the one at `i`; entries
/// for non-bracket positions are `usize::MAX`. Unbalanced brackets are an
/// error naming the offending index.
pub fn build_jump_table(code: &[char]) -> Result<Vec<usize>, ParseError> {
    let mut table = vec![usize::MAX; code.len()];
    let mut opening = Vec::new();

    for (i, &c) in code.iter().enumerate() {
        match c {
            LBRACKET => opening.push(i),
            RBRACKET => {
                let open = opening.pop().ok_or(ParseError::UnmatchedBracket {
                    index: i,
                    kind: BracketKind::Close,
                })?;
                table[open] = i;
                table[i] = open;
            }
            _ => {}
        }
    }
    if let Some(index) = opening.pop() {
        return Err(ParseError::UnmatchedBracket { index, kind: BracketKind::Open });
    }

    Ok(table)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn jump_table_is_an_involution(code in "[\\[\\]+<>-]{0,64}") {
            let chars: Vec<char> = code.chars().collect();
            if let Ok(table) = build_jump_table(&chars) {
                for (i, &c) in chars.iter().enumerate() {
                    if c == '[' || c == ']' {
                        let target = table[i];
                        prop_assert_ne!(target, usize::MAX);
                        prop_assert_eq!(table[target], i);
                        prop_assert_ne!(chars[target], c);
                    } else {
                        prop_assert_eq!(table[i], usize::MAX);
                    }
                }
            }
        }

        #[test]
        fn eight_bit_cells_stay_in_range(code in "[+<>-]{0,200}") {
            let mut bf = Brainfuck::new(&b""[..], Vec::new(), BrainfuckConfig::default()).unwrap();
            bf.run(&code, &crate::interpreter::Limits::default()).unwrap();
            for value in bf.memory_snapshot() {
                prop_assert!((0..256).contains(&value));
            }
        }
    }
}
