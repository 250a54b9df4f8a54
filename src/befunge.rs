use std::io::Write;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::error::{Error, ParseError, RuntimeFault};
use crate::interpreter::{Interpreter, Step};
use crate::primitives::{emit_char, to_char};

/// What to do with source characters that fall outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridOverflow {
    /// Fail the load with [`ParseError::GridOverflow`].
    #[default]
    Reject,
    /// Drop them.
    Truncate,
}

/// What popping an empty stack does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Underflow {
    /// Raise [`RuntimeFault::StackUnderflow`].
    #[default]
    Fault,
    /// Yield 0, as Befunge-93 prescribes.
    Zero,
}

/// Configuration for the grid machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BefungeConfig {
    pub width: usize,
    pub height: usize,
    pub overflow: GridOverflow,
    pub underflow: Underflow,
    /// Seed for `?`. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for BefungeConfig {
    fn default() -> Self {
        Self {
            width: 80,
            height: 25,
            overflow: GridOverflow::Reject,
            underflow: Underflow::Fault,
            seed: None,
        }
    }
}

const RIGHT: (i64, i64) = (1, 0);
const LEFT: (i64, i64) = (-1, 0);
const UP: (i64, i64) = (0, -1);
const DOWN: (i64, i64) = (0, 1);

/// Befunge-93 on a toroidal grid.
///
/// State:
/// - `(x, y)`: program counter, always inside the grid
/// - `(dx, dy)`: one of the four unit directions, starts moving right
/// - `stack`: operand stack of `i64`
/// - `string_mode`: toggled by `"`; pushes code points instead of executing
///
/// Binary operators pop `a` then `b` and push `b op a`.
pub struct Befunge<W: Write> {
    grid: Vec<Vec<char>>,
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    dx: i64,
    dy: i64,
    stack: Vec<i64>,
    string_mode: bool,
    overflow: GridOverflow,
    underflow: Underflow,
    rng: SmallRng,
    output: W,
}

impl<W: Write> Befunge<W> {
    pub fn new(output: W, config: BefungeConfig) -> Result<Self, Error> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::Config("grid dimensions must be positive".to_string()));
        }
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            grid: vec![vec![' '; config.width]; config.height],
            width: config.width,
            height: config.height,
            x: 0,
            y: 0,
            dx: RIGHT.0,
            dy: RIGHT.1,
            stack: Vec::new(),
            string_mode: false,
            overflow: config.overflow,
            underflow: config.underflow,
            rng,
            output,
        })
    }

    pub fn position(&self) -> (usize, usize) {
        (self.x, self.y)
    }

    pub fn direction(&self) -> (i64, i64) {
        (self.dx, self.dy)
    }

    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    pub fn grid(&self) -> &[Vec<char>] {
        &self.grid
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Complete a division that stopped with [`RuntimeFault::DivisionByZero`]:
    /// replace both operands by `value` and move on.
    pub fn resolve_division(&mut self, value: i64) -> Result<(), Error> {
        let op = self.grid[self.y][self.x];
        if op != '/' && op != '%' {
            return Err(Error::Config(format!("no pending division at '{op}'")));
        }
        self.pop(op)?;
        self.pop(op)?;
        self.stack.push(value);
        self.advance();
        Ok(())
    }

    fn pop(&mut self, op: char) -> Result<i64, RuntimeFault> {
        match (self.stack.pop(), self.underflow) {
            (Some(v), _) => Ok(v),
            (None, Underflow::Zero) => Ok(0),
            (None, Underflow::Fault) => Err(RuntimeFault::StackUnderflow { op }),
        }
    }

    /// Pop `a`, then `b`.
    fn pop2(&mut self, op: char) -> Result<(i64, i64), RuntimeFault> {
        let a = self.pop(op)?;
        let b = self.pop(op)?;
        Ok((a, b))
    }

    fn set_direction(&mut self, (dx, dy): (i64, i64)) {
        self.dx = dx;
        self.dy = dy;
    }

    /// Move one cell along the direction, wrapping on both axes.
    fn advance(&mut self) {
        self.x = (self.x as i64 + self.dx).rem_euclid(self.width as i64) as usize;
        self.y = (self.y as i64 + self.dy).rem_euclid(self.height as i64) as usize;
    }

    fn cell_index(&self, x: i64, y: i64) -> Option<(usize, usize)> {
        let in_x = (0..self.width as i64).contains(&x);
        let in_y = (0..self.height as i64).contains(&y);
        (in_x && in_y).then_some((x as usize, y as usize))
    }

    fn divide(&mut self, op: char) -> Result<(), Error> {
        let before = self.stack.clone();
        let (a, b) = self.pop2(op)?;
        if a == 0 {
            self.stack.clone_from(&before);
            return Err(RuntimeFault::DivisionByZero { op, stack: before }.into());
        }
        let q = floor_div(b, a);
        self.stack.push(if op == '/' { q } else { b.wrapping_sub(q.wrapping_mul(a)) });
        Ok(())
    }

    fn execute(&mut self, op: char) -> Result<Step, Error> {
        match op {
            '0'..='9' => self.stack.push(op as i64 - '0' as i64),
            '+' => {
                let (a, b) = self.pop2(op)?;
                self.stack.push(b.wrapping_add(a));
            }
            '-' => {
                let (a, b) = self.pop2(op)?;
                self.stack.push(b.wrapping_sub(a));
            }
            '*' => {
                let (a, b) = self.pop2(op)?;
                self.stack.push(b.wrapping_mul(a));
            }
            '/' | '%' => self.divide(op)?,
            '!' => {
                let a = self.pop(op)?;
                self.stack.push((a == 0) as i64);
            }
            '`' => {
                let (a, b) = self.pop2(op)?;
                self.stack.push((b > a) as i64);
            }
            '>' => self.set_direction(RIGHT),
            '<' => self.set_direction(LEFT),
            '^' => self.set_direction(UP),
            'v' => self.set_direction(DOWN),
            '?' => {
                let dirs = [RIGHT, LEFT, UP, DOWN];
                let dir = dirs[self.rng.gen_range(0..dirs.len())];
                self.set_direction(dir);
            }
            '_' => {
                let a = self.pop(op)?;
                self.set_direction(if a == 0 { RIGHT } else { LEFT });
            }
            '|' => {
                let a = self.pop(op)?;
                self.set_direction(if a == 0 { DOWN } else { UP });
            }
            '"' => self.string_mode = true,
            ':' => {
                let a = self.pop(op)?;
                self.stack.push(a);
                self.stack.push(a);
            }
            '\\' => {
                let (a, b) = self.pop2(op)?;
                self.stack.push(a);
                self.stack.push(b);
            }
            '$' => {
                self.pop(op)?;
            }
            '.' => {
                let a = self.pop(op)?;
                write!(self.output, "{a}")?;
            }
            ',' => {
                let a = self.pop(op)?;
                emit_char(&mut self.output, a as i128)?;
            }
            '#' => self.advance(),
            'g' => {
                let y = self.pop(op)?;
                let x = self.pop(op)?;
                let value = self
                    .cell_index(x, y)
                    .map_or(0, |(x, y)| self.grid[y][x] as i64);
                self.stack.push(value);
            }
            'p' => {
                let y = self.pop(op)?;
                let x = self.pop(op)?;
                let v = self.pop(op)?;
                let (cx, cy) = self.cell_index(x, y).ok_or(RuntimeFault::OutOfBounds { x, y })?;
                self.grid[cy][cx] = to_char(v as i128)?;
            }
            '&' | '~' => return Err(RuntimeFault::Unsupported(op).into()),
            '@' => return Ok(Step::Halt),
            _ => {} // no-op
        }
        Ok(Step::Continue)
    }
}

/// Division rounding towards negative infinity.
fn floor_div(b: i64, a: i64) -> i64 {
    let q = b.wrapping_div(a);
    if b.wrapping_rem(a) != 0 && ((b < 0) != (a < 0)) {
        q - 1
    } else {
        q
    }
}

impl<W: Write> Interpreter for Befunge<W> {
    fn language(&self) -> &'static str {
        "Befunge"
    }

    fn load(&mut self, source: &str) -> Result<(), ParseError> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        for (row, line) in source.lines().enumerate() {
            for (col, c) in line.chars().enumerate() {
                if row < self.height && col < self.width {
                    grid[row][col] = c;
                    continue;
                }
                match self.overflow {
                    GridOverflow::Truncate => break,
                    GridOverflow::Reject => {
                        return Err(ParseError::GridOverflow {
                            line: row + 1,
                            column: col + 1,
                            width: self.width,
                            height: self.height,
                        });
                    }
                }
            }
        }

        self.grid = grid;
        self.x = 0;
        self.y = 0;
        self.set_direction(RIGHT);
        self.stack.clear();
        self.string_mode = false;
        log::debug!("Befunge: loaded {}x{} grid", self.width, self.height);
        Ok(())
    }

    fn step(&mut self) -> Result<Step, Error> {
        let op = self.grid[self.y][self.x];

        if self.string_mode {
            if op == '"' {
                self.string_mode = false;
            } else {
                self.stack.push(op as i64);
            }
        } else if self.execute(op)? == Step::Halt {
            return Ok(Step::Halt);
        }

        self.advance();
        Ok(Step::Continue)
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.output.flush()?;
        Ok(())
    }
}
