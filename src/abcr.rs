use std::io::{Read, Write};

use crate::error::{Error, ParseError, RuntimeFault};
use crate::interpreter::{Interpreter, Step};
use crate::primitives::{CharSource, Fallback, Fifo, Register, emit_char};

/// One of the three queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    A,
    B,
    C,
}

/// The value a loop test inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTest {
    Peek(Queue),
    Register,
}

/// A decoded ABCR instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// R = get
    Dequeue(Queue),
    /// put R
    Enqueue(Queue),
    /// R = peek
    Peek(Queue),
    /// R = length
    Length(Queue),
    /// R = R + get
    Add(Queue),
    /// R = R - get
    Sub(Queue),
    PrintNumber(Queue),
    PrintChar(Queue),
    /// Skip past the `x` at `end` when the tested value is zero.
    Loop { test: LoopTest, end: usize },
    /// Jump back to the loop test at `start`.
    EndLoop { start: usize },
    Decrement,
    Increment,
    ReadSigned,
    Nop,
}

/// The ABCR queue machine.
///
/// State:
/// - `R`: a single integer register, starts at 0
/// - queues `A`, `B`, `C`
///
/// Reading an empty queue falls back per queue: `A` yields 0, `B` yields 1,
/// `C` slurps the rest of the input on get and yields `R` on peek.
pub struct Abcr<R: Read, W: Write> {
    program: Vec<Op>,
    pc: usize,
    r: Register<i64>,
    a: Fifo,
    b: Fifo,
    c: Fifo,
    input: CharSource<R>,
    output: W,
}

impl<R: Read, W: Write> Abcr<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            program: Vec::new(),
            pc: 0,
            r: Register::new(0),
            a: Fifo::new(Fallback::Constant(0), Fallback::Constant(0)),
            b: Fifo::new(Fallback::Constant(1), Fallback::Constant(1)),
            c: Fifo::new(Fallback::DrainInput, Fallback::Register),
            input: CharSource::new(input),
            output,
        }
    }

    pub fn register(&self) -> i64 {
        self.r.get()
    }

    pub fn set_register(&mut self, value: i64) {
        self.r.put(value);
    }

    pub fn queue(&self, q: Queue) -> &Fifo {
        match q {
            Queue::A => &self.a,
            Queue::B => &self.b,
            Queue::C => &self.c,
        }
    }

    pub fn queue_mut(&mut self, q: Queue) -> &mut Fifo {
        match q {
            Queue::A => &mut self.a,
            Queue::B => &mut self.b,
            Queue::C => &mut self.c,
        }
    }

    pub fn program(&self) -> &[Op] {
        &self.program
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn get(&mut self, q: Queue) -> Result<i64, Error> {
        if let Some(v) = self.queue_mut(q).pop() {
            return Ok(v);
        }
        match self.queue(q).on_get() {
            Fallback::Constant(v) => Ok(v),
            Fallback::Register => Ok(self.r.get()),
            Fallback::DrainInput => {
                self.drain_input(q)?;
                Ok(self.queue_mut(q).pop().ok_or(RuntimeFault::EndOfInput)?)
            }
        }
    }

    fn peek(&mut self, q: Queue) -> Result<i64, Error> {
        if let Some(v) = self.queue(q).front() {
            return Ok(v);
        }
        match self.queue(q).on_peek() {
            Fallback::Constant(v) => Ok(v),
            Fallback::Register => Ok(self.r.get()),
            Fallback::DrainInput => {
                self.drain_input(q)?;
                Ok(self.queue(q).front().ok_or(RuntimeFault::EndOfInput)?)
            }
        }
    }

    /// Queue every remaining input character as its code point.
    fn drain_input(&mut self, q: Queue) -> Result<(), Error> {
        while let Some(c) = self.input.next_char()? {
            self.queue_mut(q).put(c as i64);
        }
        Ok(())
    }

    /// Accumulate `[-+0-9]` characters and parse them; 0 when invalid.
    fn read_signed(&mut self) -> Result<i64, Error> {
        let mut digits = String::new();
        while let Some(c) = self.input.next_char()? {
            if c == '-' || c == '+' || c.is_ascii_digit() {
                digits.push(c);
            } else {
                self.input.push_back(c);
                break;
            }
        }
        Ok(digits.parse().unwrap_or(0))
    }
}

impl<R: Read, W: Write> Interpreter for Abcr<R, W> {
    fn language(&self) -> &'static str {
        "ABCR"
    }

    fn load(&mut self, source: &str) -> Result<(), ParseError> {
        self.program = decode(source)?;
        self.pc = 0;
        log::debug!("ABCR: decoded {} instructions", self.program.len());
        Ok(())
    }

    fn step(&mut self) -> Result<Step, Error> {
        let Some(&op) = self.program.get(self.pc) else {
            return Ok(Step::Halt);
        };

        match op {
            Op::Dequeue(q) => {
                let v = self.get(q)?;
                self.r.put(v);
            }
            Op::Enqueue(q) => {
                let v = self.r.get();
                self.queue_mut(q).put(v);
            }
            Op::Peek(q) => {
                let v = self.peek(q)?;
                self.r.put(v);
            }
            Op::Length(q) => {
                let len = self.queue(q).len() as i64;
                self.r.put(len);
            }
            Op::Add(q) => {
                let v = self.get(q)?;
                self.r.put(self.r.get().wrapping_add(v));
            }
            Op::Sub(q) => {
                let v = self.get(q)?;
                self.r.put(self.r.get().wrapping_sub(v));
            }
            Op::PrintNumber(q) => {
                let v = self.peek(q)?;
                write!(self.output, "{v}")?;
            }
            Op::PrintChar(q) => {
                let v = self.peek(q)?;
                emit_char(&mut self.output, v as i128)?;
            }
            Op::Loop { test, end } => {
                let value = match test {
                    LoopTest::Peek(q) => self.peek(q)?,
                    LoopTest::Register => self.r.get(),
                };
                if value == 0 {
                    self.pc = end;
                }
            }
            Op::EndLoop { start } => {
                self.pc = start;
                return Ok(Step::Continue);
            }
            Op::Decrement => self.r.put(self.r.get().wrapping_sub(1)),
            Op::Increment => self.r.put(self.r.get().wrapping_add(1)),
            Op::ReadSigned => {
                let v = self.read_signed()?;
                self.r.put(v);
            }
            Op::Nop => {}
        }
        self.pc += 1;
        Ok(Step::Continue)
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.output.flush()?;
        Ok(())
    }
}

/// Decode `source` into instructions, resolving loop markers.
///
/// Loop tests (`4`-`7`) and `x` pair up like brackets and may nest.
pub fn decode(source: &str) -> Result<Vec<Op>, ParseError> {
    let mut program = Vec::new();
    let mut open = Vec::new();

    for (i, c) in source.chars().enumerate() {
        let op = match c {
            'a' => Op::Dequeue(Queue::A),
            'b' => Op::Dequeue(Queue::B),
            'c' => Op::Dequeue(Queue::C),
            'A' => Op::Enqueue(Queue::A),
            'B' => Op::Enqueue(Queue::B),
            'C' => Op::Enqueue(Queue::C),
            '1' => Op::Peek(Queue::A),
            '2' => Op::Peek(Queue::B),
            '3' => Op::Peek(Queue::C),
            '!' => Op::Length(Queue::A),
            '@' => Op::Length(Queue::B),
            '#' => Op::Length(Queue::C),
            '*' => Op::Add(Queue::A),
            '+' => Op::Add(Queue::B),
            ',' => Op::Add(Queue::C),
            '-' => Op::Sub(Queue::A),
            '.' => Op::Sub(Queue::B),
            '/' => Op::Sub(Queue::C),
            'o' => Op::PrintNumber(Queue::A),
            'p' => Op::PrintNumber(Queue::B),
            'q' => Op::PrintNumber(Queue::C),
            'O' => Op::PrintChar(Queue::A),
            'P' => Op::PrintChar(Queue::B),
            'Q' => Op::PrintChar(Queue::C),
            '4' | '5' | '6' | '7' => {
                let test = match c {
                    '4' => LoopTest::Peek(Queue::A),
                    '5' => LoopTest::Peek(Queue::B),
                    '6' => LoopTest::Peek(Queue::C),
                    _ => LoopTest::Register,
                };
                open.push(i);
                // Patched when the matching `x` is found.
                Op::Loop { test, end: usize::MAX }
            }
            'x' => {
                let start = open.pop().ok_or(ParseError::UnmatchedLoop { index: i })?;
                if let Op::Loop { end, .. } = &mut program[start] {
                    *end = i;
                }
                Op::EndLoop { start }
            }
            '(' => Op::Decrement,
            ')' => Op::Increment,
            'i' => Op::ReadSigned,
            _ => Op::Nop,
        };
        program.push(op);
    }
    if let Some(index) = open.pop() {
        return Err(ParseError::UnmatchedLoop { index });
    }

    Ok(program)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn loops_link_both_ways(code in "[4567xaA()]{0,40}") {
            if let Ok(program) = decode(&code) {
                for (i, op) in program.iter().enumerate() {
                    match *op {
                        Op::Loop { end, .. } => {
                            let linked = matches!(program[end], Op::EndLoop { start } if start == i);
                            prop_assert!(linked);
                        }
                        Op::EndLoop { start } => {
                            let linked = matches!(program[start], Op::Loop { end, .. } if end == i);
                            prop_assert!(linked);
                        }
                        _ => {}
                    }
                }
            }
        }

        #[test]
        fn enqueue_then_dequeue_is_fifo(values in prop::collection::vec(-1000i64..1000, 1..20)) {
            let mut abcr = Abcr::new(&b""[..], Vec::<u8>::new());
            for &v in &values {
                abcr.set_register(v);
                abcr.load("A").unwrap();
                abcr.step().unwrap();
            }
            for &v in &values {
                abcr.load("a").unwrap();
                abcr.step().unwrap();
                prop_assert_eq!(abcr.register(), v);
            }
        }
    }
}
