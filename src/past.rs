//! My Unreliable Past: a transactional register machine.
//!
//! A program is a cyclic list of transactions. Each transaction is a list of
//! commands `<register><operator><integer>` where the operator is `+`, `-` or
//! `=`. An `=` whose register does not hold the operand rolls the whole
//! transaction back. Execution starts at a random transaction and never halts
//! on its own.
//!
//! Register `O` is the output port and `I` the input port. Characters move
//! between the ports and the streams through two background threads, so the
//! step loop never blocks on I/O.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, ParseError};
use crate::interpreter::{Interpreter, Step};
use crate::primitives::{CharSource, to_char};

/// Register names, in storage order.
pub const REGISTERS: &str = "ABCDEFGHIKLMNOPQRSTUWXYZ";

const REGISTER_COUNT: usize = 24;

/// Upper bound on the coin flips used to size a random initial value.
const MAX_DOUBLINGS: u32 = 62;

fn register_index(name: char) -> Option<usize> {
    REGISTERS.chars().position(|r| r == name)
}

const INPUT: usize = 8; // 'I'
const OUTPUT: usize = 13; // 'O'

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PastConfig {
    /// Probability per step that a pending input character is taken into `I`.
    pub input_chance: f64,
    /// Probability per step that a non-zero `O` is written out.
    pub output_chance: f64,
    pub seed: Option<u64>,
}

impl Default for PastConfig {
    fn default() -> Self {
        Self {
            input_chance: 0.5,
            output_chance: 0.5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    /// Abort the transaction unless the register equals the operand.
    Expect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Index into [`REGISTERS`].
    pub register: usize,
    pub operator: Operator,
    pub operand: i64,
}

pub type Transaction = Vec<Command>;

/// Background threads that move characters between the ports and the streams.
struct Flows<W> {
    input: Receiver<char>,
    output: Sender<char>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<W>>,
}

pub struct Past<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    transactions: Vec<Transaction>,
    tc: usize,
    registers: [i64; REGISTER_COUNT],
    input_chance: f64,
    output_chance: f64,
    rng: SmallRng,
    input: Option<R>,
    output: Option<W>,
    flows: Option<Flows<W>>,
}

impl<R, W> Past<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    pub fn new(input: R, output: W, config: PastConfig) -> Result<Self, Error> {
        for (name, chance) in [
            ("input_chance", config.input_chance),
            ("output_chance", config.output_chance),
        ] {
            if !(0.0..=1.0).contains(&chance) {
                return Err(Error::Config(format!("{name} must lie in [0, 1], got {chance}")));
            }
        }
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            transactions: Vec::new(),
            tc: 0,
            registers: [0; REGISTER_COUNT],
            input_chance: config.input_chance,
            output_chance: config.output_chance,
            rng,
            input: Some(input),
            output: Some(output),
            flows: None,
        })
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn transaction_counter(&self) -> usize {
        self.tc
    }

    pub fn set_transaction_counter(&mut self, tc: usize) {
        self.tc = tc;
    }

    pub fn registers(&self) -> &[i64; REGISTER_COUNT] {
        &self.registers
    }

    pub fn register(&self, name: char) -> Option<i64> {
        register_index(name).map(|i| self.registers[i])
    }

    pub fn register_mut(&mut self, name: char) -> Option<&mut i64> {
        register_index(name).map(move |i| &mut self.registers[i])
    }

    /// The output handle, available whenever the output flow is not running.
    pub fn output(&self) -> Option<&W> {
        self.output.as_ref()
    }

    pub fn into_output(mut self) -> Option<W> {
        self.shutdown();
        self.output.take()
    }

    /// Give every register a random starting value.
    ///
    /// 0 with chance 1/2, 1 with chance 1/4, 2 and 3 each with chance 1/16,
    /// and so on: each extra doubling of the range halves its probability.
    fn randomize_registers(&mut self) {
        for value in self.registers.iter_mut() {
            let mut k = 0;
            while k < MAX_DOUBLINGS && !self.rng.r#gen::<bool>() {
                k += 1;
            }
            *value = if k == 0 {
                0
            } else {
                self.rng.gen_range((1i64 << (k - 1))..(1i64 << k))
            };
        }
    }

    fn spawn_flows(&mut self) {
        let stop = Arc::new(AtomicBool::new(false));
        let (in_tx, in_rx) = mpsc::channel::<char>();
        let (out_tx, out_rx) = mpsc::channel::<char>();

        let reader = self.input.take().map(|input| {
            let stop = Arc::clone(&stop);
            thread::spawn(move || read_flow(input, in_tx, &stop))
        });
        let writer = self
            .output
            .take()
            .map(|output| thread::spawn(move || write_flow(output, out_rx)));

        self.flows = Some(Flows {
            input: in_rx,
            output: out_tx,
            stop,
            reader,
            writer,
        });
    }

    /// Stop both flows and take the output handle back.
    fn shutdown(&mut self) {
        let Some(flows) = self.flows.take() else {
            return;
        };
        let Flows { input, output, stop, reader, writer } = flows;
        stop.store(true, Ordering::SeqCst);
        drop(output);
        drop(input);

        if let Some(writer) = writer {
            match writer.join() {
                Ok(w) => self.output = Some(w),
                Err(_) => log::warn!("past: output flow panicked, output handle lost"),
            }
        }
        if let Some(reader) = reader {
            // A reader blocked on a read cannot be interrupted; leave it detached.
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                log::debug!("past: input flow still waiting on input, detaching");
            }
        }
    }
}

fn read_flow<R: Read>(input: R, tx: Sender<char>, stop: &AtomicBool) {
    let mut source = CharSource::new(input);
    while !stop.load(Ordering::SeqCst) {
        match source.next_char() {
            Ok(Some(c)) => {
                if tx.send(c).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("past: input flow stopped: {e}");
                break;
            }
        }
    }
}

fn write_flow<W: Write>(mut output: W, rx: Receiver<char>) -> W {
    let mut buf = [0u8; 4];
    for c in rx {
        let bytes = c.encode_utf8(&mut buf).as_bytes();
        if let Err(e) = output.write_all(bytes).and_then(|()| output.flush()) {
            log::debug!("past: dropped output {c:?}: {e}");
        }
    }
    output
}

impl<R, W> Interpreter for Past<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    fn language(&self) -> &'static str {
        "My Unreliable Past"
    }

    fn load(&mut self, source: &str) -> Result<(), ParseError> {
        self.transactions = parse(source)?;
        self.tc = 0;
        log::debug!("past: loaded {} transactions", self.transactions.len());
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), Error> {
        self.shutdown();
        log::debug!("past: randomizing registers");
        self.randomize_registers();
        if !self.transactions.is_empty() {
            self.tc = self.rng.gen_range(0..self.transactions.len());
            self.spawn_flows();
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Step, Error> {
        let Some(transaction) = self.transactions.get(self.tc) else {
            return Ok(Step::Halt);
        };

        let snapshot = self.registers;
        for cmd in transaction {
            let reg = &mut self.registers[cmd.register];
            match cmd.operator {
                Operator::Add => *reg = reg.wrapping_add(cmd.operand),
                Operator::Sub => *reg = reg.wrapping_sub(cmd.operand),
                Operator::Expect => {
                    if *reg != cmd.operand {
                        log::trace!("past: transaction {} rolled back", self.tc);
                        self.registers = snapshot;
                        break;
                    }
                }
            }
        }

        if let Some(flows) = &self.flows {
            if self.registers[OUTPUT] != 0 && self.rng.gen_bool(self.output_chance) {
                let c = to_char(self.registers[OUTPUT] as i128 - 1)?;
                if flows.output.send(c).is_err() {
                    log::debug!("past: output flow gone, dropped {c:?}");
                }
                self.registers[OUTPUT] = 0;
            }
            if self.registers[INPUT] == 0 && self.rng.gen_bool(self.input_chance) {
                if let Ok(c) = flows.input.try_recv() {
                    self.registers[INPUT] = c as i64 + 1;
                }
            }
        }

        self.tc = (self.tc + 1) % self.transactions.len();
        Ok(Step::Continue)
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.shutdown();
        Ok(())
    }
}

impl<R, W> Drop for Past<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rotate `source` so it starts at the beginning of a comment, a transaction
/// or a command, in that order of preference.
pub fn align(source: &str) -> Result<String, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let rotate = |at: usize| -> String { chars[at..].iter().chain(&chars[..at]).collect() };

    let open = chars.iter().filter(|&&c| c == '(').count();
    let close = chars.iter().filter(|&&c| c == ')').count();
    if open != close {
        return Err(ParseError::UnbalancedComments { open, close });
    }

    // Comments first: any of ";,+-=" may appear inside one.
    if open > 0 {
        return chars
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == '(')
            .map(|(i, _)| i)
            .find(|&start| balanced_from(&chars, start))
            .map(rotate)
            .ok_or(ParseError::NoValidRotation);
    }

    for sep in [';', ','] {
        if let Some(i) = chars.iter().position(|&c| c == sep) {
            return Ok(rotate(i + 1));
        }
    }
    for op in ['+', '-', '='] {
        if let Some(i) = chars.iter().position(|&c| c == op) {
            return Ok(rotate((i + chars.len() - 1) % chars.len()));
        }
    }
    Ok(source.to_string())
}

/// Whether reading the source circularly from `start` never closes more
/// comments than it opened.
fn balanced_from(chars: &[char], start: usize) -> bool {
    let mut depth = 0i64;
    let mut i = start;
    loop {
        match chars[i] {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
        i = (i + 1) % chars.len();
        if i == start {
            return depth == 0;
        }
    }
}

/// Drop everything inside `(...)`, parentheses included. Expects aligned input.
pub fn strip_comments(source: &str) -> String {
    let mut depth = 0i64;
    let mut out = String::with_capacity(source.len());
    for c in source.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Align, strip and split `source` into transactions.
pub fn parse(source: &str) -> Result<Vec<Transaction>, ParseError> {
    let aligned = align(source)?;
    let code: String = strip_comments(&aligned)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut transactions = Vec::new();
    for text in code.split(';').filter(|t| !t.is_empty()) {
        let transaction = text
            .split(',')
            .filter(|c| !c.is_empty())
            .map(|c| parse_command(c, text))
            .collect::<Result<Transaction, _>>()?;
        transactions.push(transaction);
    }
    Ok(transactions)
}

fn parse_command(command: &str, transaction: &str) -> Result<Command, ParseError> {
    let mut chars = command.chars();
    let (Some(name), Some(op), Some(_)) = (chars.next(), chars.next(), chars.clone().next()) else {
        return Err(ParseError::CommandTooShort {
            command: command.to_string(),
            transaction: transaction.to_string(),
        });
    };
    let register = register_index(name).ok_or_else(|| ParseError::UnknownRegister {
        register: name,
        transaction: transaction.to_string(),
    })?;
    let operator = match op {
        '+' => Operator::Add,
        '-' => Operator::Sub,
        '=' => Operator::Expect,
        other => {
            return Err(ParseError::UnknownOperator {
                operator: other,
                transaction: transaction.to_string(),
            });
        }
    };
    let operand_text = chars.as_str();
    let operand = operand_text.parse().map_err(|_| ParseError::InvalidOperand {
        operand: operand_text.to_string(),
        transaction: transaction.to_string(),
    })?;
    Ok(Command { register, operator, operand })
}
