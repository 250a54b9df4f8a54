use std::fmt;
use std::io::{Read, Write};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, ParseError, RuntimeFault};
use crate::interpreter::{Interpreter, Step};
use crate::primitives::{CharSource, emit_char};

/// Side length of the square board.
pub const SIZE: usize = 10;

pub const MONKEY_COUNT: usize = 7;

/// Starting board. Digits are monkeys, `!` are bananas. Monkeys 6 and 7
/// start on top of a banana each.
pub const SETUP: [&str; SIZE] = [
    "..!1.!....",
    ".......2!.",
    ".........!",
    ".3.!......",
    ".......!..",
    ".!....!...",
    "..5.!4....",
    "....6...!.",
    "......!...",
    ".7......!.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonkeysConfig {
    /// Drop lines with more than two tokens instead of treating the
    /// extra tokens as a comment.
    pub strict: bool,
    /// Seed for `PLAY`. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for MonkeysConfig {
    fn default() -> Self {
        Self { strict: false, seed: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
    Learn,
    Yell,
    Play,
    Sleep,
    Wake,
    Grab,
    Drop,
    Eat,
    Mark,
    Back,
    Teach,
    Fight,
    Bond,
    Ego,
}

impl Action {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "UP" => Action::Up,
            "DOWN" => Action::Down,
            "LEFT" => Action::Left,
            "RIGHT" => Action::Right,
            "LEARN" => Action::Learn,
            "YELL" => Action::Yell,
            "PLAY" => Action::Play,
            "SLEEP" => Action::Sleep,
            "WAKE" => Action::Wake,
            "GRAB" => Action::Grab,
            "DROP" => Action::Drop,
            "EAT" => Action::Eat,
            "MARK" => Action::Mark,
            "BACK" => Action::Back,
            "TEACH" => Action::Teach,
            "FIGHT" => Action::Fight,
            "BOND" => Action::Bond,
            "EGO" => Action::Ego,
            _ => return None,
        })
    }
}

/// One line of a Monkeys program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Monkey number, 1 to 7.
    pub monkey: u8,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monkey {
    x: usize,
    y: usize,
    value: u8,
    sleeping: bool,
    /// Program index recorded by `MARK`.
    mark: Option<usize>,
    /// Id of the carried banana.
    banana: Option<usize>,
}

impl Monkey {
    fn new(x: usize, y: usize) -> Self {
        Self { x, y, value: 0, sleeping: false, mark: None, banana: None }
    }

    pub fn position(&self) -> (usize, usize) {
        (self.x, self.y)
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn set_value(&mut self, value: u8) {
        self.value = value;
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    pub fn is_carrying(&self) -> bool {
        self.banana.is_some()
    }

    fn is_adjacent(&self, other: &Monkey) -> bool {
        self.x.abs_diff(other.x) <= 1 && self.y.abs_diff(other.y) <= 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Banana {
    pub id: usize,
    pub x: usize,
    pub y: usize,
}

/// The 10x10 world: seven monkeys and the bananas not yet eaten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    monkeys: Vec<Monkey>,
    bananas: Vec<Banana>,
}

impl Default for Board {
    fn default() -> Self {
        let mut board = Self::scan(&SETUP);
        for n in [6, 7] {
            let (x, y) = board.monkeys[n - 1].position();
            let id = board.bananas.len();
            board.bananas.push(Banana { id, x, y });
        }
        board
    }
}

impl Board {
    /// Build a board from ten rows of ten cells, `1`-`7` for monkeys, `!` for
    /// bananas and anything else for empty ground. Every monkey must appear
    /// exactly once.
    pub fn from_layout(layout: &str) -> Option<Self> {
        let rows: Vec<&str> = layout.lines().collect();
        if rows.len() != SIZE || rows.iter().any(|r| r.chars().count() != SIZE) {
            return None;
        }
        let digits = layout.chars().filter(char::is_ascii_digit);
        let mut seen = [false; MONKEY_COUNT];
        for d in digits {
            let n = d.to_digit(10)? as usize;
            if !(1..=MONKEY_COUNT).contains(&n) || seen[n - 1] {
                return None;
            }
            seen[n - 1] = true;
        }
        if !seen.iter().all(|&s| s) {
            return None;
        }
        Some(Self::scan(&rows))
    }

    fn scan(rows: &[&str]) -> Self {
        let mut slots: [Option<Monkey>; MONKEY_COUNT] = Default::default();
        let mut bananas = Vec::new();
        for (y, row) in rows.iter().enumerate() {
            for (x, cell) in row.chars().enumerate() {
                match cell {
                    '1'..='7' => {
                        let n = cell as usize - '1' as usize;
                        slots[n] = Some(Monkey::new(x, y));
                    }
                    '!' => {
                        let id = bananas.len();
                        bananas.push(Banana { id, x, y });
                    }
                    _ => {}
                }
            }
        }
        Self {
            monkeys: slots.into_iter().flatten().collect(),
            bananas,
        }
    }

    /// Monkey by number, 1 to 7.
    pub fn monkey(&self, number: u8) -> Option<&Monkey> {
        self.monkeys.get(usize::from(number).checked_sub(1)?)
    }

    pub fn monkey_mut(&mut self, number: u8) -> Option<&mut Monkey> {
        self.monkeys.get_mut(usize::from(number).checked_sub(1)?)
    }

    pub fn bananas(&self) -> &[Banana] {
        &self.bananas
    }

    fn monkey_at(&self, x: usize, y: usize) -> Option<usize> {
        self.monkeys.iter().position(|m| m.x == x && m.y == y)
    }

    fn banana_at(&self, x: usize, y: usize) -> Option<usize> {
        self.bananas.iter().find(|b| b.x == x && b.y == y).map(|b| b.id)
    }

    fn carry(&mut self, id: Option<usize>, x: usize, y: usize) {
        if let Some(b) = self.bananas.iter_mut().find(|b| Some(b.id) == id) {
            b.x = x;
            b.y = y;
        }
    }

    fn has_neighbour(&self, i: usize) -> bool {
        let me = &self.monkeys[i];
        self.monkeys
            .iter()
            .enumerate()
            .any(|(j, m)| j != i && me.is_adjacent(m))
    }

    fn step_monkey(&mut self, i: usize, dx: isize, dy: isize) {
        let (x, y) = self.monkeys[i].position();
        let target = x
            .checked_add_signed(dx)
            .zip(y.checked_add_signed(dy))
            .filter(|&(nx, ny)| nx < SIZE && ny < SIZE);

        let Some((nx, ny)) = target else {
            let m = &mut self.monkeys[i];
            m.value = m.value.wrapping_sub(1);
            return;
        };

        if let Some(j) = self.monkey_at(nx, ny) {
            if self.monkeys[j].sleeping {
                self.monkeys[j].sleeping = false;
            } else if self.monkeys[i].is_carrying() == self.monkeys[j].is_carrying() {
                for k in [i, j] {
                    self.monkeys[k].value = self.monkeys[k].value.wrapping_add(1);
                }
            } else {
                let mine = self.monkeys[i].banana.take();
                let theirs = self.monkeys[j].banana.take();
                self.monkeys[i].banana = theirs;
                self.monkeys[j].banana = mine;
                self.carry(theirs, x, y);
                self.carry(mine, nx, ny);
            }
            return;
        }

        self.monkeys[i].x = nx;
        self.monkeys[i].y = ny;
        if !self.has_neighbour(i) {
            let m = &mut self.monkeys[i];
            m.value = m.value.wrapping_add(1);
        }
        let banana = self.monkeys[i].banana;
        self.carry(banana, nx, ny);
    }

    /// Apply `f(neighbour, actor)` to every awake monkey next to monkey `i`.
    fn influence(&mut self, i: usize, f: impl Fn(u8, u8) -> Option<u8>) {
        let actor = self.monkeys[i].clone();
        for (j, m) in self.monkeys.iter_mut().enumerate() {
            if j != i && !m.sleeping && actor.is_adjacent(m) {
                if let Some(v) = f(m.value, actor.value) {
                    m.value = v;
                }
            }
        }
    }
}

/// Renders the board, a monkey's number over a banana over empty ground.
impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..SIZE {
            if y > 0 {
                writeln!(f)?;
            }
            for x in 0..SIZE {
                let cell = match (self.monkey_at(x, y), self.banana_at(x, y)) {
                    (Some(i), _) => char::from(b'1' + i as u8),
                    (None, Some(_)) => '!',
                    (None, None) => '.',
                };
                write!(f, "{cell}")?;
            }
        }
        Ok(())
    }
}

/// The Monkeys simulation.
///
/// Each line of a program names a monkey and an action. The simulation stops
/// when the program runs out or every banana has been eaten.
pub struct Monkeys<R: Read, W: Write> {
    board: Board,
    code: Vec<Instruction>,
    pc: usize,
    strict: bool,
    rng: SmallRng,
    input: CharSource<R>,
    output: W,
}

impl<R: Read, W: Write> Monkeys<R, W> {
    pub fn new(input: R, output: W, config: MonkeysConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            board: Board::default(),
            code: Vec::new(),
            pc: 0,
            strict: config.strict,
            rng,
            input: CharSource::new(input),
            output,
        }
    }

    pub fn with_board(mut self, board: Board) -> Self {
        self.board = board;
        self
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: Read, W: Write> Interpreter for Monkeys<R, W> {
    fn language(&self) -> &'static str {
        "Monkeys"
    }

    fn load(&mut self, source: &str) -> Result<(), ParseError> {
        self.code = parse(source, self.strict);
        self.pc = 0;
        log::debug!("monkeys: loaded {} instructions", self.code.len());
        Ok(())
    }

    fn step(&mut self) -> Result<Step, Error> {
        let Some(&Instruction { monkey, action }) = self.code.get(self.pc) else {
            return Ok(Step::Halt);
        };
        if self.board.bananas.is_empty() {
            log::debug!("monkeys: all bananas eaten");
            return Ok(Step::Halt);
        }
        let i = usize::from(monkey) - 1;
        log::trace!("monkeys: {} {:?} {:?}", self.pc, monkey, action);

        let board = &mut self.board;
        let m = &mut board.monkeys[i];
        if m.sleeping {
            if action == Action::Wake {
                m.sleeping = false;
            }
            self.pc += 1;
            return Ok(Step::Continue);
        }

        match action {
            Action::Wake => {}
            Action::Sleep => {
                if !m.is_carrying() {
                    m.sleeping = true;
                }
            }
            Action::Learn => {
                let c = self.input.next_char()?.ok_or(RuntimeFault::EndOfInput)?;
                m.value = (u32::from(c) % 256) as u8;
            }
            Action::Yell => emit_char(&mut self.output, i128::from(m.value))?,
            Action::Play => m.value = self.rng.r#gen::<u8>(),
            Action::Up => board.step_monkey(i, 0, -1),
            Action::Down => board.step_monkey(i, 0, 1),
            Action::Left => board.step_monkey(i, -1, 0),
            Action::Right => board.step_monkey(i, 1, 0),
            Action::Grab => {
                if !m.is_carrying() {
                    let (x, y) = m.position();
                    let found = board.banana_at(x, y);
                    board.monkeys[i].banana = found;
                }
            }
            Action::Drop => m.banana = None,
            Action::Eat => {
                if let Some(id) = m.banana.take() {
                    board.bananas.retain(|b| b.id != id);
                }
            }
            Action::Mark => m.mark = Some(self.pc),
            Action::Back => {
                if let Some(mark) = m.mark {
                    self.pc = mark;
                }
            }
            Action::Teach => board.influence(i, |v, a| Some(v.wrapping_add(a))),
            Action::Fight => board.influence(i, |v, a| Some(v.wrapping_sub(a))),
            Action::Bond => board.influence(i, |v, a| Some(v.wrapping_mul(a))),
            Action::Ego => board.influence(i, |v, a| v.checked_div(a)),
        }

        self.pc += 1;
        Ok(Step::Continue)
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.output.flush()?;
        Ok(())
    }
}

/// Parse a program, dropping every line that is not `<1-7> <ACTION>`.
pub fn parse(source: &str, strict: bool) -> Vec<Instruction> {
    source
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split(' ').collect();
            if strict && tokens.len() > 2 {
                return None;
            }
            let monkey: u8 = tokens.first()?.parse().ok()?;
            if !(1..=MONKEY_COUNT as u8).contains(&monkey) {
                return None;
            }
            let action = Action::from_name(tokens.get(1)?)?;
            Some(Instruction { monkey, action })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{Limits, Stop};

    const ROW: &str = "\
1!2.......
..........
..........
..........
..........
..........
..........
..........
..........
3.4.5.6.7.";

    fn machine(input: &str) -> Monkeys<&[u8], Vec<u8>> {
        Monkeys::new(input.as_bytes(), Vec::new(), MonkeysConfig { strict: false, seed: Some(9) })
    }

    fn on_row(input: &str) -> Monkeys<&[u8], Vec<u8>> {
        machine(input).with_board(Board::from_layout(ROW).unwrap())
    }

    fn value(m: &Monkeys<&[u8], Vec<u8>>, n: u8) -> u8 {
        m.board().monkey(n).unwrap().value()
    }

    #[test]
    fn test_setup() {
        let board = Board::default();
        assert_eq!(board.to_string(), SETUP.join("\n"));
        assert_eq!(board.bananas().len(), 14);
        assert_eq!(board.monkey(1).unwrap().position(), (3, 0));
        assert_eq!(board.monkey(7).unwrap().position(), (1, 9));
    }

    #[test]
    fn test_layout_rejects_bad_boards() {
        assert!(Board::from_layout("1234567").is_none());
        assert!(Board::from_layout(&ROW.replace('7', ".")).is_none());
        assert!(Board::from_layout(&ROW.replace('7', "1")).is_none());
        assert!(Board::from_layout(&ROW.replace('7', "8")).is_none());
    }

    #[test]
    fn test_parse() {
        let code = parse("1 UP\n7 EAT tasty\n\n8 UP\n1 JUMP\nUP\n0 DOWN\n3", false);
        assert_eq!(
            code,
            vec![
                Instruction { monkey: 1, action: Action::Up },
                Instruction { monkey: 7, action: Action::Eat },
            ]
        );
    }

    #[test]
    fn test_parse_strict() {
        let code = parse("1 UP\n7 EAT tasty", true);
        assert_eq!(code, vec![Instruction { monkey: 1, action: Action::Up }]);
    }

    #[test]
    fn test_parse_splits_on_single_spaces() {
        let lenient = parse("1 UP 
2  DOWN
3 LEFT", false);
        assert_eq!(
            lenient,
            vec![
                Instruction { monkey: 1, action: Action::Up },
                Instruction { monkey: 3, action: Action::Left },
            ]
        );
        let strict = parse("1 UP 
3 LEFT", true);
        assert_eq!(strict, vec![Instruction { monkey: 3, action: Action::Left }]);
    }

    #[test]
    fn test_eat_removes_one_banana() {
        // Monkey 1 walks left onto the banana at (2, 0).
        let mut m = machine("");
        m.run("1 LEFT\n1 GRAB\n1 EAT", &Limits::default()).unwrap();
        assert_eq!(m.board().bananas().len(), 13);
        assert!(m.board().bananas().iter().all(|b| (b.x, b.y) != (2, 0)));
        assert_eq!(value(&m, 1), 1);
    }

    #[test]
    fn test_halts_without_bananas() {
        // The row layout has a single banana, right of monkey 1.
        let mut m = on_row("");
        let summary = m.run("1 RIGHT\n1 GRAB\n1 EAT\n1 YELL\n1 YELL", &Limits::default()).unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.stop, Stop::Halted);
        assert!(m.output().is_empty());
    }

    #[test]
    fn test_move_off_board() {
        let mut m = machine("");
        m.run("1 UP", &Limits::default()).unwrap();
        assert_eq!(value(&m, 1), 255);
        assert_eq!(m.board().monkey(1).unwrap().position(), (3, 0));
    }

    #[test]
    fn test_move_next_to_neighbour() {
        let mut m = on_row("");
        m.run("1 RIGHT\n1 DOWN\n1 DOWN", &Limits::default()).unwrap();
        // (1,0) and (1,1) touch monkey 2, (1,2) does not.
        assert_eq!(value(&m, 1), 1);
        assert_eq!(m.board().monkey(1).unwrap().position(), (1, 2));
    }

    #[test]
    fn test_bump_wakes_sleeper() {
        let mut m = on_row("");
        m.run("1 RIGHT\n2 SLEEP\n1 RIGHT", &Limits::default()).unwrap();
        let two = m.board().monkey(2).unwrap();
        assert!(!two.is_sleeping());
        assert_eq!(two.value(), 0);
        assert_eq!(m.board().monkey(1).unwrap().position(), (1, 0));
    }

    #[test]
    fn test_bump_awake_neighbours() {
        let mut m = on_row("");
        m.run("1 RIGHT\n1 RIGHT", &Limits::default()).unwrap();
        assert_eq!(value(&m, 1), 1);
        assert_eq!(value(&m, 2), 1);
    }

    #[test]
    fn test_bump_hands_over_banana() {
        let mut m = on_row("");
        m.run("1 RIGHT\n1 GRAB\n1 RIGHT", &Limits::default()).unwrap();
        assert!(!m.board().monkey(1).unwrap().is_carrying());
        assert!(m.board().monkey(2).unwrap().is_carrying());
        let banana = m.board().bananas()[0];
        assert_eq!((banana.x, banana.y), (2, 0));
    }

    #[test]
    fn test_banana_travels_with_monkey() {
        let mut m = on_row("");
        m.run("1 RIGHT\n1 GRAB\n1 DOWN\n1 DOWN", &Limits::default()).unwrap();
        let banana = m.board().bananas()[0];
        assert_eq!((banana.x, banana.y), (1, 2));
        assert_eq!(m.board().to_string().lines().nth(2), Some(".1........"));
    }

    #[test]
    fn test_sleep_while_carrying_is_ignored() {
        let mut m = on_row("");
        m.run("1 RIGHT\n1 GRAB\n1 SLEEP", &Limits::default()).unwrap();
        assert!(!m.board().monkey(1).unwrap().is_sleeping());
    }

    #[test]
    fn test_sleeping_monkey_only_wakes() {
        let mut m = on_row("");
        m.run("1 SLEEP\n1 RIGHT\n1 WAKE\n1 RIGHT", &Limits::default()).unwrap();
        assert_eq!(m.board().monkey(1).unwrap().position(), (1, 0));
    }

    #[test]
    fn test_learn_and_yell() {
        let mut m = machine("Hé");
        m.run("1 LEARN\n1 YELL\n2 LEARN", &Limits::default()).unwrap();
        assert_eq!(m.output(), b"H");
        assert_eq!(value(&m, 2), 0xE9);
    }

    #[test]
    fn test_learn_at_end_of_input() {
        let mut m = machine("");
        let err = m.run("1 LEARN", &Limits::default()).unwrap_err();
        assert_eq!(err.as_fault(), Some(&RuntimeFault::EndOfInput));
    }

    #[test]
    fn test_play_is_seeded() {
        let mut a = machine("");
        let mut b = machine("");
        a.run("1 PLAY\n2 PLAY", &Limits::default()).unwrap();
        b.run("1 PLAY\n2 PLAY", &Limits::default()).unwrap();
        assert_eq!(a.board(), b.board());
    }

    #[test]
    fn test_mark_and_back() {
        let mut m = machine("");
        m.load("1 MARK\n1 PLAY\n1 BACK").unwrap();
        for _ in 0..3 {
            m.step().unwrap();
        }
        assert_eq!(m.pc(), 1);

        // Without a mark BACK does nothing.
        let mut m = machine("");
        m.load("1 BACK\n1 PLAY").unwrap();
        m.step().unwrap();
        assert_eq!(m.pc(), 1);
    }

    #[test]
    fn test_group_actions() {
        let cases = [
            ("1 TEACH", 250, 10, 4),
            ("1 FIGHT", 5, 10, 251),
            ("1 BOND", 16, 16, 0),
            ("1 EGO", 7, 2, 3),
            ("1 EGO", 7, 0, 7),
        ];
        for (code, before, actor, after) in cases {
            let mut m = on_row("");
            m.board_mut().monkey_mut(1).unwrap().set_value(actor);
            m.board_mut().monkey_mut(2).unwrap().set_value(before);
            m.run(&format!("1 RIGHT\n{code}"), &Limits::default()).unwrap();
            assert_eq!(value(&m, 2), after, "{code}");
        }
    }

    #[test]
    fn test_group_actions_skip_sleepers() {
        let mut m = on_row("");
        m.board_mut().monkey_mut(1).unwrap().set_value(3);
        m.run("1 RIGHT\n2 SLEEP\n1 TEACH", &Limits::default()).unwrap();
        assert_eq!(value(&m, 2), 0);
    }

    #[test]
    fn test_load_is_deterministic() {
        let src = "1 LEFT\n1 GRAB # lunch\n6 EAT\n2 MARK\n2 BACK";
        assert_eq!(parse(src, false), parse(src, false));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn line() -> impl Strategy<Value = String> {
        let actions = prop::sample::select(vec![
            "UP", "DOWN", "LEFT", "RIGHT", "PLAY", "SLEEP", "WAKE", "GRAB", "DROP", "EAT",
            "MARK", "TEACH", "FIGHT", "BOND", "EGO",
        ]);
        (1u8..=7, actions).prop_map(|(n, a)| format!("{n} {a}"))
    }

    proptest! {
        #[test]
        fn monkeys_never_share_a_cell(lines in prop::collection::vec(line(), 0..60)) {
            let mut m = Monkeys::new(&b""[..], Vec::<u8>::new(), MonkeysConfig { strict: true, seed: Some(2) });
            m.load(&lines.join("\n")).unwrap();
            let mut bananas = m.board().bananas().len();
            while m.step().unwrap() == Step::Continue {
                let mut cells: Vec<_> = (1..=7).map(|n| m.board().monkey(n).unwrap().position()).collect();
                prop_assert!(cells.iter().all(|&(x, y)| x < SIZE && y < SIZE));
                cells.sort();
                cells.dedup();
                prop_assert_eq!(cells.len(), MONKEY_COUNT);
                prop_assert!(m.board().bananas().len() <= bananas);
                bananas = m.board().bananas().len();
            }
        }
    }
}
